//! Minimal Solidity ABI encoding for the contract calls the task runner makes.
//!
//! Covers the argument kinds used by wallet factories, module managers,
//! multi-sig wallets and ERC-20 tokens: `address`, `uint256`, `bool`,
//! `bytes32`, `bytes`, `string` and dynamic arrays of those.

use sha3::{Digest, Keccak256};

use super::error::ValidationError;
use super::types::{Address, H256, U256};

/// A single ABI value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Address(Address),
    Uint(U256),
    Bool(bool),
    FixedBytes32([u8; 32]),
    Bytes(Vec<u8>),
    String(String),
    Array(Vec<Token>),
}

impl Token {
    fn is_dynamic(&self) -> bool {
        matches!(self, Token::Bytes(_) | Token::String(_) | Token::Array(_))
    }
}

#[must_use]
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

/// First four bytes of the keccak hash of a canonical function signature.
#[must_use]
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Topic zero of an event with the given canonical signature.
#[must_use]
pub fn event_topic(signature: &str) -> H256 {
    H256(keccak256(signature.as_bytes()))
}

/// EIP-191 `personal_sign` digest of a 32-byte hash.
#[must_use]
pub fn hash_personal_message(hash: &[u8; 32]) -> [u8; 32] {
    let mut prefixed = Vec::with_capacity(28 + 32);
    prefixed.extend_from_slice(b"\x19Ethereum Signed Message:\n32");
    prefixed.extend_from_slice(hash);
    keccak256(&prefixed)
}

fn word_from_usize(value: usize) -> [u8; 32] {
    U256::from_u64(value as u64).to_be_bytes()
}

fn pad_right(data: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(data);
    let rem = data.len() % 32;
    if rem != 0 {
        out.extend(std::iter::repeat_n(0u8, 32 - rem));
    }
}

fn encode_static(token: &Token, out: &mut Vec<u8>) {
    match token {
        Token::Address(address) => {
            out.extend_from_slice(&[0u8; 12]);
            out.extend_from_slice(address.as_bytes());
        }
        Token::Uint(value) => out.extend_from_slice(&value.to_be_bytes()),
        Token::Bool(flag) => out.extend_from_slice(&word_from_usize(usize::from(*flag))),
        Token::FixedBytes32(bytes) => out.extend_from_slice(bytes),
        Token::Bytes(_) | Token::String(_) | Token::Array(_) => {
            unreachable!("dynamic tokens are encoded in the tail")
        }
    }
}

fn encode_dynamic(token: &Token, out: &mut Vec<u8>) {
    match token {
        Token::Bytes(bytes) => {
            out.extend_from_slice(&word_from_usize(bytes.len()));
            pad_right(bytes, out);
        }
        Token::String(s) => {
            out.extend_from_slice(&word_from_usize(s.len()));
            pad_right(s.as_bytes(), out);
        }
        Token::Array(items) => {
            out.extend_from_slice(&word_from_usize(items.len()));
            out.extend_from_slice(&encode(items));
        }
        _ => encode_static(token, out),
    }
}

/// Encode a tuple of tokens using the head/tail layout.
#[must_use]
pub fn encode(tokens: &[Token]) -> Vec<u8> {
    let head_len = 32 * tokens.len();
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();

    for token in tokens {
        if token.is_dynamic() {
            head.extend_from_slice(&word_from_usize(head_len + tail.len()));
            encode_dynamic(token, &mut tail);
        } else {
            encode_static(token, &mut head);
        }
    }

    head.extend_from_slice(&tail);
    head
}

/// Selector followed by the encoded arguments.
#[must_use]
pub fn encode_call(signature: &str, tokens: &[Token]) -> Vec<u8> {
    let mut data = selector(signature).to_vec();
    data.extend_from_slice(&encode(tokens));
    data
}

fn word_at(data: &[u8], index: usize) -> Result<&[u8], ValidationError> {
    data.get(index * 32..(index + 1) * 32).ok_or_else(|| {
        ValidationError::InvalidFormat(format!(
            "return data too short: {} bytes, wanted word {}",
            data.len(),
            index
        ))
    })
}

/// Decode the `index`-th return word as `uint256`.
pub fn decode_uint(data: &[u8], index: usize) -> Result<U256, ValidationError> {
    U256::from_be_slice(word_at(data, index)?)
}

/// Decode a 32-byte word (return value or indexed topic) as an address.
pub fn decode_address(word: &[u8]) -> Result<Address, ValidationError> {
    if word.len() != 32 {
        return Err(ValidationError::InvalidFormat(format!(
            "address word must be 32 bytes, got {}",
            word.len()
        )));
    }
    if word[..12].iter().any(|b| *b != 0) {
        return Err(ValidationError::InvalidFormat(
            "address word has dirty high bytes".to_string(),
        ));
    }
    Address::from_slice(&word[12..])
        .ok_or_else(|| ValidationError::InvalidFormat("invalid address word".to_string()))
}
