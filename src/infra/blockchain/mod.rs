//! Blockchain client implementations.

pub mod nonce;
pub mod rpc;
pub mod signer;
pub mod tx;

pub use nonce::NonceManager;
pub use rpc::{EvmRpcClient, RpcClientConfig};
pub use signer::{LocalSigner, recover_address};
pub use tx::LegacyTransaction;
