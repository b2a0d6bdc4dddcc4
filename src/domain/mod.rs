//! Domain layer containing core business types, traits, and error definitions.

pub mod abi;
pub mod contracts;
pub mod error;
pub mod traits;
pub mod types;

pub use error::{
    AppError, BlockchainError, ConfigError, DatabaseError, ExternalServiceError, JobError,
    ValidationError,
};
pub use traits::{
    BlockchainClient, DeepLinkProvider, JobRepository, SmsProvider, TransactionSigner,
    WalletRepository, WalletSubscriber,
};
pub use types::{
    Address, BONUS_RESERVED, BonusInfo, Community, Contact, CreateForeignWalletParams, CreateWalletParams,
    EnqueueJobRequest, EntityId, ErrorDetail, ErrorResponse, Fork, FundTokenParams,
    FundTransactionBody, H256, HealthResponse, HealthStatus, Invite, Job, JobListParams, JobName,
    JobStatus, Log, Network, NewJob, PaginatedResponse, RateLimitResponse, SetWalletOwnerParams,
    Signature, TransactionReceipt, TransactionRequest, TxHash, U256, UserWallet, UserWalletFilter,
    WalletModules,
};
