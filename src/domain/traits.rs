//! Domain traits defining contracts for external systems.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::abi::hash_personal_message;
use super::error::{AppError, BlockchainError};
use super::types::{
    Address, Community, Fork, Job, JobStatus, Network, NewJob, PaginatedResponse, Signature,
    TransactionReceipt, TransactionRequest, TxHash, UserWallet, UserWalletFilter,
};

/// Durable job queue.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Check storage connectivity
    async fn health_check(&self) -> Result<(), AppError>;

    /// Insert a job. When the idempotency key was already used, the
    /// existing job is returned unchanged.
    async fn enqueue(&self, job: &NewJob) -> Result<Job, AppError>;

    async fn get_job(&self, id: &str) -> Result<Option<Job>, AppError>;

    /// List jobs newest first with cursor-based pagination
    async fn list_jobs(
        &self,
        limit: i64,
        cursor: Option<&str>,
        status: Option<JobStatus>,
    ) -> Result<PaginatedResponse<Job>, AppError>;

    /// Atomically claim up to `limit` due jobs: pending jobs whose
    /// `next_run_at` has passed and running jobs whose lease expired.
    /// Claimed jobs are marked running, leased for `lease` and have their
    /// attempt counter incremented.
    async fn claim_due_jobs(&self, limit: i64, lease: Duration) -> Result<Vec<Job>, AppError>;

    /// Persist the job's data blob (checkpoint) without changing its status.
    ///
    /// `attempts` is the attempt counter the caller claimed the job with.
    /// When the job was reclaimed since, nothing is written and
    /// [`JobError::LeaseLost`](super::error::JobError::LeaseLost) is returned.
    async fn save_data(
        &self,
        id: &str,
        attempts: i32,
        data: &serde_json::Value,
    ) -> Result<(), AppError>;

    /// Mark a running job succeeded. Returns `false` when the job is no
    /// longer held under the claimed `attempts`.
    async fn complete_job(
        &self,
        id: &str,
        attempts: i32,
        result: Option<&serde_json::Value>,
    ) -> Result<bool, AppError>;

    /// Release the lease and make the job due again at `next_run_at`
    async fn schedule_retry(
        &self,
        id: &str,
        attempts: i32,
        error: &str,
        next_run_at: DateTime<Utc>,
    ) -> Result<bool, AppError>;

    async fn fail_job(&self, id: &str, attempts: i32, error: &str) -> Result<bool, AppError>;

    /// Move a failed job back to pending with a fresh attempt budget,
    /// replacing its data blob with `data`
    async fn reset_job(&self, id: &str, data: &serde_json::Value)
    -> Result<Option<Job>, AppError>;

    /// Atomically take one of `limit` payout slots for a bonus key on behalf
    /// of the `fundToken` job `job_id`.
    ///
    /// Slots are held by every other `fundToken` job for the same
    /// (identifier, bonus type, community) that carries the `bonusReserved`
    /// marker and has not failed. On success the marker is set on `job_id`;
    /// otherwise it is cleared. Returns whether the slot was granted.
    async fn reserve_bonus(
        &self,
        job_id: &str,
        identifier: &str,
        bonus_type: &str,
        community: &Address,
        limit: i64,
    ) -> Result<bool, AppError>;
}

/// Wallet, contact, invite, community and fork records.
#[async_trait]
pub trait WalletRepository: Send + Sync {
    async fn health_check(&self) -> Result<(), AppError>;

    async fn find_user_wallet(
        &self,
        filter: &UserWalletFilter,
    ) -> Result<Option<UserWallet>, AppError>;

    async fn find_by_wallet_address(&self, wallet: &Address)
    -> Result<Option<UserWallet>, AppError>;

    /// Record the deployed wallet address and salt, returning the updated record
    async fn set_wallet_address(
        &self,
        filter: &UserWalletFilter,
        wallet: &Address,
        salt: &str,
    ) -> Result<Option<UserWallet>, AppError>;

    async fn set_account_address(&self, wallet: &Address, owner: &Address)
    -> Result<(), AppError>;

    async fn mark_contract_deployed(
        &self,
        wallet: &Address,
        networks: &[String],
    ) -> Result<(), AppError>;

    /// Point every contact with `phone_number` at `wallet` and mark it NEW
    async fn update_contacts_wallet(
        &self,
        phone_number: &str,
        wallet: &Address,
    ) -> Result<u64, AppError>;

    async fn find_community(&self, community: &Address) -> Result<Option<Community>, AppError>;

    async fn find_fork(&self, app_name: &str) -> Result<Option<Fork>, AppError>;

    /// Set the invitee wallet on the most recent matching invite
    async fn set_invitee_wallet(
        &self,
        inviter: &Address,
        invitee_phone_number: &str,
        wallet: &Address,
    ) -> Result<bool, AppError>;
}

/// EVM chain client that owns a sending account.
#[async_trait]
pub trait BlockchainClient: Send + Sync {
    fn network(&self) -> Network;

    /// Account that signs and pays for transactions sent through this client
    fn sender_address(&self) -> Address;

    async fn health_check(&self) -> Result<(), AppError>;

    async fn block_number(&self) -> Result<u64, AppError>;

    /// Deployed bytecode at `address` (empty when nothing is deployed)
    async fn get_code(&self, address: &Address) -> Result<Vec<u8>, AppError>;

    /// Read-only contract call against the latest block
    async fn call(&self, to: &Address, data: &[u8]) -> Result<Vec<u8>, AppError>;

    /// Sign and broadcast a transaction, returning its hash without waiting
    async fn send_transaction(&self, request: &TransactionRequest) -> Result<TxHash, AppError>;

    async fn get_transaction_receipt(
        &self,
        hash: &TxHash,
    ) -> Result<Option<TransactionReceipt>, AppError>;

    /// Poll for a receipt until it appears or `timeout` elapses
    async fn wait_for_receipt(
        &self,
        hash: &TxHash,
        timeout: Duration,
    ) -> Result<TransactionReceipt, AppError> {
        let start = std::time::Instant::now();
        let poll_interval = Duration::from_millis(500);

        loop {
            if let Some(receipt) = self.get_transaction_receipt(hash).await? {
                return Ok(receipt);
            }
            if start.elapsed() >= timeout {
                return Err(AppError::Blockchain(BlockchainError::Timeout(format!(
                    "Transaction {} not mined within {}s",
                    hash,
                    timeout.as_secs()
                ))));
            }
            tokio::time::sleep(poll_interval).await;
        }
    }
}

/// Signing strategy for a single account.
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    fn address(&self) -> Address;

    /// Recoverable ECDSA signature over a 32-byte digest
    async fn sign_digest(&self, digest: &[u8; 32]) -> Result<Signature, BlockchainError>;

    /// EIP-191 `personal_sign` over a 32-byte hash
    async fn sign_personal_message(&self, hash: &[u8; 32]) -> Result<Signature, BlockchainError> {
        self.sign_digest(&hash_personal_message(hash)).await
    }
}

/// Creates app deep links that open a community.
#[async_trait]
pub trait DeepLinkProvider: Send + Sync {
    async fn create_deep_link(&self, community: &Address, app_name: &str)
    -> Result<String, AppError>;
}

#[async_trait]
pub trait SmsProvider: Send + Sync {
    async fn send_sms(&self, to: &str, body: &str) -> Result<(), AppError>;
}

/// Registers wallets with the services that watch them for incoming transfers.
#[async_trait]
pub trait WalletSubscriber: Send + Sync {
    async fn subscribe_wallet(
        &self,
        wallet: &Address,
        network: Network,
        from_block: Option<u64>,
    ) -> Result<(), AppError>;
}
