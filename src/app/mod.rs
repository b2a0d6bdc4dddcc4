//! Application layer: job handlers, the job worker and the API use cases.

pub mod context;
pub mod multisig;
pub mod runner;
pub mod sender;
pub mod service;
pub mod state;
pub mod tasks;
pub mod worker;

pub use context::JobContext;
pub use multisig::MultiSigCoordinator;
pub use runner::{JobProcessor, ProcessorConfig, RetryPolicy};
pub use sender::{ChainClients, SentTransaction, TransactionSender};
pub use service::JobService;
pub use state::AppState;
pub use tasks::{Notifiers, TaskConfig, TaskRunner};
pub use worker::{JobWorker, WorkerConfig, spawn_worker};
