//! RLP encoding and EIP-155 legacy transactions.

use crate::domain::abi::keccak256;
use crate::domain::{Address, Signature, TxHash, U256};

/// Recursive-length-prefix encoding.
pub mod rlp {
    fn encode_length(len: usize, offset: u8, out: &mut Vec<u8>) {
        if len <= 55 {
            out.push(offset + len as u8);
        } else {
            let len_bytes = len.to_be_bytes();
            let first = len_bytes.iter().position(|b| *b != 0).unwrap_or(len_bytes.len() - 1);
            let significant = &len_bytes[first..];
            out.push(offset + 55 + significant.len() as u8);
            out.extend_from_slice(significant);
        }
    }

    /// Encode a byte string.
    #[must_use]
    pub fn encode_bytes(bytes: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(bytes.len() + 9);
        if bytes.len() == 1 && bytes[0] < 0x80 {
            out.push(bytes[0]);
        } else {
            encode_length(bytes.len(), 0x80, &mut out);
            out.extend_from_slice(bytes);
        }
        out
    }

    /// Encode an unsigned integer as its minimal big-endian byte string.
    #[must_use]
    pub fn encode_uint(value: u64) -> Vec<u8> {
        let bytes = value.to_be_bytes();
        let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
        encode_bytes(&bytes[first..])
    }

    /// Encode a list whose items are already RLP-encoded.
    #[must_use]
    pub fn encode_list(items: &[Vec<u8>]) -> Vec<u8> {
        let payload_len: usize = items.iter().map(Vec::len).sum();
        let mut out = Vec::with_capacity(payload_len + 9);
        encode_length(payload_len, 0xc0, &mut out);
        for item in items {
            out.extend_from_slice(item);
        }
        out
    }
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[first..]
}

/// Pre-EIP-1559 transaction with EIP-155 replay protection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTransaction {
    pub nonce: u64,
    pub gas_price: U256,
    pub gas_limit: u64,
    pub to: Address,
    pub value: U256,
    pub data: Vec<u8>,
    pub chain_id: u64,
}

impl LegacyTransaction {
    fn base_fields(&self) -> Vec<Vec<u8>> {
        vec![
            rlp::encode_uint(self.nonce),
            rlp::encode_bytes(self.gas_price.to_minimal_bytes()),
            rlp::encode_uint(self.gas_limit),
            rlp::encode_bytes(self.to.as_bytes()),
            rlp::encode_bytes(self.value.to_minimal_bytes()),
            rlp::encode_bytes(&self.data),
        ]
    }

    /// RLP of `[nonce, gasPrice, gas, to, value, data, chainId, 0, 0]`.
    #[must_use]
    pub fn signing_payload(&self) -> Vec<u8> {
        let mut fields = self.base_fields();
        fields.push(rlp::encode_uint(self.chain_id));
        fields.push(rlp::encode_uint(0));
        fields.push(rlp::encode_uint(0));
        rlp::encode_list(&fields)
    }

    #[must_use]
    pub fn signing_hash(&self) -> [u8; 32] {
        keccak256(&self.signing_payload())
    }

    /// Raw signed transaction ready for `eth_sendRawTransaction`.
    #[must_use]
    pub fn encode_signed(&self, signature: &Signature) -> Vec<u8> {
        let v = u64::from(signature.recovery_id) + 35 + 2 * self.chain_id;
        let mut fields = self.base_fields();
        fields.push(rlp::encode_uint(v));
        fields.push(rlp::encode_bytes(strip_leading_zeros(&signature.r)));
        fields.push(rlp::encode_bytes(strip_leading_zeros(&signature.s)));
        rlp::encode_list(&fields)
    }
}

/// Hash of a raw signed transaction, as the network reports it.
#[must_use]
pub fn raw_transaction_hash(raw: &[u8]) -> TxHash {
    TxHash::from(keccak256(raw))
}
