//! Infrastructure layer implementations.

pub mod blockchain;
pub mod database;
pub mod notify;
pub mod observability;

pub use blockchain::{EvmRpcClient, LocalSigner, NonceManager, RpcClientConfig};
pub use database::{PostgresClient, PostgresConfig};
pub use notify::{HttpNotifier, NotifierConfig};
