//! Application error types with proper error chaining.

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum DatabaseError {
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Query execution failed: {0}")]
    Query(String),
    #[error("Record not found: {0}")]
    NotFound(String),
    #[error("Duplicate record: {0}")]
    Duplicate(String),
    #[error("Pool exhausted: {0}")]
    PoolExhausted(String),
    #[error("Migration failed: {0}")]
    Migration(String),
}

#[derive(Error, Debug, Clone)]
pub enum BlockchainError {
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("RPC call failed: {0}")]
    RpcError(String),
    #[error("Transaction reverted: {0}")]
    Reverted(String),
    #[error("Nonce conflict: {0}")]
    NonceConflict(String),
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),
    #[error("Insufficient funds for transaction")]
    InsufficientFunds,
    #[error("Timeout waiting for confirmation: {0}")]
    Timeout(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },
    #[error("Missing required field: {0}")]
    MissingField(String),
    #[error("Invalid format: {0}")]
    InvalidFormat(String),
    #[error("Validation failed: {0}")]
    Multiple(String),
}

#[derive(Error, Debug)]
pub enum ExternalServiceError {
    #[error("HTTP request failed: {0}")]
    HttpError(String),
    #[error("Service unavailable: {0}")]
    Unavailable(String),
    #[error("Timeout: {0}")]
    Timeout(String),
    #[error("Rate limited: {0}")]
    RateLimited(String),
}

/// Failures raised by job handlers and the job lifecycle.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("Invalid parameters for job '{job}': {message}")]
    InvalidParams { job: String, message: String },
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),
    #[error("Job not found: {0}")]
    NotFound(String),
    #[error("Invalid job state: {0}")]
    InvalidState(String),
    #[error("Lease lost: {0}")]
    LeaseLost(String),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error(transparent)]
    Blockchain(#[from] BlockchainError),
    #[error(transparent)]
    ExternalService(#[from] ExternalServiceError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Job(#[from] JobError),
    #[error("Authentication failed: {0}")]
    Authentication(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Internal error: {0}")]
    Internal(String),
    #[error("Operation not supported: {0}")]
    NotSupported(String),
    #[error("Rate limit exceeded")]
    RateLimited,
}

impl AppError {
    /// Whether the job queue should run the failing job again later.
    ///
    /// Node outages, timeouts, nonce races and flaky collaborators are
    /// transient. Bad input, missing records, reverted transactions and
    /// unmet preconditions will fail the same way on every attempt.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Database(err) => matches!(
                err,
                DatabaseError::Connection(_)
                    | DatabaseError::PoolExhausted(_)
                    | DatabaseError::Query(_)
            ),
            AppError::Blockchain(err) => matches!(
                err,
                BlockchainError::Connection(_)
                    | BlockchainError::RpcError(_)
                    | BlockchainError::NonceConflict(_)
                    | BlockchainError::Timeout(_)
                    | BlockchainError::InsufficientFunds
            ),
            AppError::ExternalService(_) => true,
            AppError::Internal(_) | AppError::RateLimited => true,
            AppError::Config(_)
            | AppError::Validation(_)
            | AppError::Job(_)
            | AppError::Authentication(_)
            | AppError::Serialization(_)
            | AppError::NotSupported(_) => false,
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(ValidationError::Multiple(err.to_string()))
    }
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DatabaseError::NotFound("Row not found".to_string()),
            sqlx::Error::PoolTimedOut => DatabaseError::PoolExhausted("Pool timed out".to_string()),
            sqlx::Error::Io(io) => DatabaseError::Connection(io.to_string()),
            sqlx::Error::Database(db_err) => {
                if db_err.code().is_some_and(|code| code == "23505") {
                    return DatabaseError::Duplicate(db_err.message().to_string());
                }
                DatabaseError::Query(db_err.message().to_string())
            }
            _ => DatabaseError::Query(err.to_string()),
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Database(DatabaseError::from(err))
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        AppError::Database(DatabaseError::Migration(err.to_string()))
    }
}
