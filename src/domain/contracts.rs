//! Call data builders and event decoders for the contracts the jobs drive.

use super::abi::{self, Token};
use super::error::ValidationError;
use super::types::{Address, TransactionReceipt, U256};

/// Counterfactual wallet factory.
pub mod wallet_factory {
    use super::*;

    pub const CREATE_COUNTERFACTUAL_WALLET: &str =
        "createCounterfactualWallet(address,address[],string,uint256)";
    pub const WALLET_CREATED: &str = "WalletCreated(address,address)";

    #[must_use]
    pub fn create_counterfactual_wallet(
        owner: Address,
        modules: &[Address],
        ens: &str,
        salt: U256,
    ) -> Vec<u8> {
        abi::encode_call(
            CREATE_COUNTERFACTUAL_WALLET,
            &[
                Token::Address(owner),
                Token::Array(modules.iter().copied().map(Token::Address).collect()),
                Token::String(ens.to_string()),
                Token::Uint(salt),
            ],
        )
    }

    /// Address of the wallet announced by `WalletCreated(address indexed _wallet, address indexed _owner)`.
    ///
    /// Only logs emitted by `factory` are considered.
    pub fn created_wallet(
        receipt: &TransactionReceipt,
        factory: Address,
    ) -> Result<Address, ValidationError> {
        let topic = abi::event_topic(WALLET_CREATED);
        let log = receipt
            .logs
            .iter()
            .find(|log| log.address == factory && log.topics.first() == Some(&topic))
            .ok_or_else(|| {
                ValidationError::MissingField(format!(
                    "WalletCreated event in transaction {}",
                    receipt.transaction_hash
                ))
            })?;
        let wallet_topic = log.topics.get(1).ok_or_else(|| {
            ValidationError::InvalidFormat("WalletCreated event without wallet topic".to_string())
        })?;
        abi::decode_address(wallet_topic.as_bytes())
    }
}

/// Module that changes a wallet's owner.
pub mod ownership_manager {
    use super::*;

    pub const MODULE_NAME: &str = "WalletOwnershipManager";
    pub const SET_OWNER: &str = "setOwner(address,address)";

    #[must_use]
    pub fn set_owner(wallet: Address, new_owner: Address) -> Vec<u8> {
        abi::encode_call(
            SET_OWNER,
            &[Token::Address(wallet), Token::Address(new_owner)],
        )
    }
}

/// Relayer multi-signature wallet.
pub mod multisig {
    use super::*;

    pub const EXECUTE: &str = "execute(address,uint256,bytes,bytes)";
    pub const NONCE: &str = "nonce()";

    #[must_use]
    pub fn execute(to: Address, value: U256, data: &[u8], signatures: &[u8]) -> Vec<u8> {
        abi::encode_call(
            EXECUTE,
            &[
                Token::Address(to),
                Token::Uint(value),
                Token::Bytes(data.to_vec()),
                Token::Bytes(signatures.to_vec()),
            ],
        )
    }

    #[must_use]
    pub fn nonce() -> Vec<u8> {
        abi::selector(NONCE).to_vec()
    }

    /// Hash the owners sign: `keccak256(0x19 || 0x00 || wallet || to || value || data || nonce)`.
    #[must_use]
    pub fn sign_hash(wallet: Address, to: Address, value: U256, data: &[u8], nonce: U256) -> [u8; 32] {
        let mut packed = Vec::with_capacity(2 + 20 + 20 + 32 + data.len() + 32);
        packed.push(0x19);
        packed.push(0x00);
        packed.extend_from_slice(wallet.as_bytes());
        packed.extend_from_slice(to.as_bytes());
        packed.extend_from_slice(&value.to_be_bytes());
        packed.extend_from_slice(data);
        packed.extend_from_slice(&nonce.to_be_bytes());
        abi::keccak256(&packed)
    }
}

/// ERC-20 token.
pub mod erc20 {
    use super::*;

    pub const TRANSFER: &str = "transfer(address,uint256)";

    #[must_use]
    pub fn transfer(to: Address, amount: U256) -> Vec<u8> {
        abi::encode_call(TRANSFER, &[Token::Address(to), Token::Uint(amount)])
    }
}
