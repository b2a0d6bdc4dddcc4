//! Mock implementations for testing.
//!
//! In-memory implementations of the domain traits that can be configured to
//! simulate failures, unhealthy dependencies and reverted transactions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::domain::abi;
use crate::domain::contracts::wallet_factory;
use crate::domain::{
    Address, AppError, BONUS_RESERVED, BlockchainClient, BlockchainError, Community, Contact,
    DatabaseError, DeepLinkProvider, ExternalServiceError, Fork, H256, Invite, Job, JobError,
    JobName, JobRepository,
    JobStatus, Log, Network, NewJob, PaginatedResponse, SmsProvider, TransactionReceipt,
    TransactionRequest, TxHash, UserWallet, UserWalletFilter, ValidationError, WalletRepository,
    WalletSubscriber,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Configuration for mock behavior.
#[derive(Debug, Clone, Default)]
pub struct MockConfig {
    /// If true, operations will fail.
    pub should_fail: bool,
    /// Custom error message for failures.
    pub error_message: Option<String>,
    /// Simulated latency in milliseconds.
    pub latency_ms: Option<u64>,
}

impl MockConfig {
    /// Creates a config that always succeeds.
    #[must_use]
    pub fn success() -> Self {
        Self::default()
    }

    /// Creates a config that always fails.
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            should_fail: true,
            error_message: Some(message.into()),
            latency_ms: None,
        }
    }

    /// Adds simulated latency.
    #[must_use]
    pub fn with_latency(mut self, ms: u64) -> Self {
        self.latency_ms = Some(ms);
        self
    }

    async fn simulate(&self, default_message: &str) -> Result<(), String> {
        if let Some(ms) = self.latency_ms {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
        if self.should_fail {
            return Err(self
                .error_message
                .clone()
                .unwrap_or_else(|| default_message.to_string()));
        }
        Ok(())
    }
}

/// In-memory job queue.
///
/// # Example
///
/// ```
/// use wallet_jobs::test_utils::{MockJobRepository, mocks::MockConfig};
///
/// let repo = MockJobRepository::new();
/// let failing = MockJobRepository::with_config(MockConfig::failure("DB error"));
/// ```
pub struct MockJobRepository {
    jobs: Mutex<Vec<Job>>,
    config: MockConfig,
    call_count: AtomicU64,
    is_healthy: AtomicBool,
}

impl MockJobRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MockConfig::success())
    }

    #[must_use]
    pub fn with_config(config: MockConfig) -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
            config,
            call_count: AtomicU64::new(0),
            is_healthy: AtomicBool::new(true),
        }
    }

    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_config(MockConfig::failure(message))
    }

    pub fn call_count(&self) -> u64 {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.is_healthy.store(healthy, Ordering::Relaxed);
    }

    /// Every stored job in insertion order.
    pub fn all_jobs(&self) -> Vec<Job> {
        lock(&self.jobs).clone()
    }

    /// Makes a job scheduled for a later retry claimable now.
    pub fn make_due(&self, id: &str) {
        if let Some(job) = lock(&self.jobs).iter_mut().find(|job| job.id == id) {
            job.next_run_at = Utc::now();
        }
    }

    /// Moves a job straight to failed, as if its last attempt had failed.
    pub fn mark_failed(&self, id: &str, error: &str) {
        if let Some(job) = lock(&self.jobs).iter_mut().find(|job| job.id == id) {
            job.status = JobStatus::Failed;
            job.last_error = Some(error.to_string());
            job.locked_until = None;
        }
    }

    /// Expires the lease of a running job, as if its worker crashed.
    pub fn expire_lease(&self, id: &str) {
        if let Some(job) = lock(&self.jobs).iter_mut().find(|job| job.id == id) {
            job.locked_until = Some(Utc::now() - chrono::Duration::seconds(1));
        }
    }

    async fn check(&self) -> Result<(), AppError> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        self.config
            .simulate("Mock database error")
            .await
            .map_err(|msg| AppError::Database(DatabaseError::Query(msg)))
    }

    /// Apply a terminal or retry transition to a job still held under
    /// `attempts`, releasing its lease.
    fn settle<F: FnOnce(&mut Job)>(&self, id: &str, attempts: i32, change: F) -> bool {
        let mut jobs = lock(&self.jobs);
        let Some(job) = jobs.iter_mut().find(|job| {
            job.id == id && job.status == JobStatus::Running && job.attempts == attempts
        }) else {
            return false;
        };
        change(job);
        job.locked_until = None;
        job.updated_at = Utc::now();
        true
    }
}

impl Default for MockJobRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobRepository for MockJobRepository {
    async fn health_check(&self) -> Result<(), AppError> {
        if !self.is_healthy.load(Ordering::Relaxed) {
            return Err(AppError::Database(DatabaseError::Connection(
                "Mock database unhealthy".to_string(),
            )));
        }
        self.check().await
    }

    async fn enqueue(&self, new_job: &NewJob) -> Result<Job, AppError> {
        self.check().await?;
        let mut jobs = lock(&self.jobs);

        if let Some(key) = &new_job.idempotency_key
            && let Some(existing) = jobs
                .iter()
                .find(|job| job.idempotency_key.as_ref() == Some(key))
        {
            return Ok(existing.clone());
        }

        let now = Utc::now();
        let job = Job {
            id: uuid::Uuid::new_v4().to_string(),
            name: new_job.name,
            data: new_job.data.clone(),
            status: JobStatus::Pending,
            idempotency_key: new_job.idempotency_key.clone(),
            parent_id: new_job.parent_id.clone(),
            attempts: 0,
            max_attempts: new_job.max_attempts,
            last_error: None,
            result: None,
            next_run_at: now,
            locked_until: None,
            created_at: now,
            updated_at: now,
        };
        jobs.push(job.clone());
        Ok(job)
    }

    async fn get_job(&self, id: &str) -> Result<Option<Job>, AppError> {
        self.check().await?;
        Ok(lock(&self.jobs).iter().find(|job| job.id == id).cloned())
    }

    async fn list_jobs(
        &self,
        limit: i64,
        cursor: Option<&str>,
        status: Option<JobStatus>,
    ) -> Result<PaginatedResponse<Job>, AppError> {
        self.check().await?;
        let limit = usize::try_from(limit.clamp(1, 100)).unwrap_or(20);
        let jobs = lock(&self.jobs);

        let newest_first: Vec<&Job> = jobs.iter().rev().collect();
        let start = match cursor {
            Some(cursor) => {
                newest_first
                    .iter()
                    .position(|job| job.id == cursor)
                    .ok_or_else(|| {
                        AppError::Validation(ValidationError::InvalidField {
                            field: "cursor".to_string(),
                            message: "Invalid cursor".to_string(),
                        })
                    })?
                    + 1
            }
            None => 0,
        };

        let mut page: Vec<Job> = newest_first[start..]
            .iter()
            .filter(|job| status.is_none_or(|status| job.status == status))
            .take(limit + 1)
            .map(|job| (*job).clone())
            .collect();
        let has_more = page.len() > limit;
        page.truncate(limit);
        let next_cursor = if has_more {
            page.last().map(|job| job.id.clone())
        } else {
            None
        };
        Ok(PaginatedResponse::new(page, next_cursor, has_more))
    }

    async fn claim_due_jobs(&self, limit: i64, lease: Duration) -> Result<Vec<Job>, AppError> {
        self.check().await?;
        let now = Utc::now();
        let locked_until = now + chrono::Duration::from_std(lease).unwrap_or_default();
        let limit = usize::try_from(limit).unwrap_or(0);

        let mut jobs = lock(&self.jobs);
        let mut due: Vec<&mut Job> = jobs
            .iter_mut()
            .filter(|job| match job.status {
                JobStatus::Pending => job.next_run_at <= now,
                JobStatus::Running => job.locked_until.is_some_and(|until| until < now),
                _ => false,
            })
            .collect();
        due.sort_by_key(|job| (job.next_run_at, job.created_at));

        Ok(due
            .into_iter()
            .take(limit)
            .map(|job| {
                job.status = JobStatus::Running;
                job.attempts += 1;
                job.locked_until = Some(locked_until);
                job.updated_at = now;
                job.clone()
            })
            .collect())
    }

    async fn save_data(
        &self,
        id: &str,
        attempts: i32,
        data: &serde_json::Value,
    ) -> Result<(), AppError> {
        self.check().await?;
        let mut jobs = lock(&self.jobs);
        let job = jobs
            .iter_mut()
            .find(|job| job.id == id)
            .ok_or_else(|| AppError::Database(DatabaseError::NotFound(format!("job {id}"))))?;
        if job.attempts != attempts {
            return Err(AppError::Job(JobError::LeaseLost(format!(
                "job {id} was reclaimed at attempt {}",
                job.attempts
            ))));
        }
        job.data = data.clone();
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn complete_job(
        &self,
        id: &str,
        attempts: i32,
        result: Option<&serde_json::Value>,
    ) -> Result<bool, AppError> {
        self.check().await?;
        Ok(self.settle(id, attempts, |job| {
            job.status = JobStatus::Succeeded;
            job.result = result.cloned();
            job.last_error = None;
        }))
    }

    async fn schedule_retry(
        &self,
        id: &str,
        attempts: i32,
        error: &str,
        next_run_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        self.check().await?;
        Ok(self.settle(id, attempts, |job| {
            job.status = JobStatus::Pending;
            job.last_error = Some(error.to_string());
            job.next_run_at = next_run_at;
        }))
    }

    async fn fail_job(&self, id: &str, attempts: i32, error: &str) -> Result<bool, AppError> {
        self.check().await?;
        Ok(self.settle(id, attempts, |job| {
            job.status = JobStatus::Failed;
            job.last_error = Some(error.to_string());
        }))
    }

    async fn reset_job(
        &self,
        id: &str,
        data: &serde_json::Value,
    ) -> Result<Option<Job>, AppError> {
        self.check().await?;
        let mut jobs = lock(&self.jobs);
        let Some(job) = jobs
            .iter_mut()
            .find(|job| job.id == id && job.status == JobStatus::Failed)
        else {
            return Ok(None);
        };
        job.status = JobStatus::Pending;
        job.data = data.clone();
        job.attempts = 0;
        job.next_run_at = Utc::now();
        job.locked_until = None;
        job.updated_at = Utc::now();
        Ok(Some(job.clone()))
    }

    async fn reserve_bonus(
        &self,
        job_id: &str,
        identifier: &str,
        bonus_type: &str,
        community: &Address,
        limit: i64,
    ) -> Result<bool, AppError> {
        self.check().await?;
        let community = serde_json::to_value(community)?;
        let same_key = |job: &Job| {
            job.name == JobName::FundToken
                && job.data["identifier"] == identifier
                && job.data["bonusType"] == bonus_type
                && job.data["communityAddress"] == community
        };

        let mut jobs = lock(&self.jobs);
        let held = jobs
            .iter()
            .filter(|job| {
                job.id != job_id
                    && job.status != JobStatus::Failed
                    && job.data.get(BONUS_RESERVED).is_some()
                    && same_key(job)
            })
            .count();
        let granted = i64::try_from(held).unwrap_or(i64::MAX) < limit;

        let job = jobs
            .iter_mut()
            .find(|job| job.id == job_id)
            .ok_or_else(|| AppError::Database(DatabaseError::NotFound(format!("job {job_id}"))))?;
        if let Some(data) = job.data.as_object_mut() {
            if granted {
                data.insert(BONUS_RESERVED.to_string(), serde_json::Value::Bool(true));
            } else {
                data.remove(BONUS_RESERVED);
            }
        }
        job.updated_at = Utc::now();
        Ok(granted)
    }
}

/// In-memory user wallets, contacts, invites, communities and forks.
pub struct MockWalletRepository {
    wallets: Mutex<Vec<UserWallet>>,
    contacts: Mutex<Vec<Contact>>,
    invites: Mutex<Vec<Invite>>,
    communities: Mutex<Vec<Community>>,
    forks: Mutex<Vec<Fork>>,
    config: MockConfig,
}

impl MockWalletRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MockConfig::success())
    }

    #[must_use]
    pub fn with_config(config: MockConfig) -> Self {
        Self {
            wallets: Mutex::new(Vec::new()),
            contacts: Mutex::new(Vec::new()),
            invites: Mutex::new(Vec::new()),
            communities: Mutex::new(Vec::new()),
            forks: Mutex::new(Vec::new()),
            config,
        }
    }

    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_config(MockConfig::failure(message))
    }

    pub fn insert_wallet(&self, wallet: UserWallet) {
        lock(&self.wallets).push(wallet);
    }

    pub fn insert_contact(&self, contact: Contact) {
        lock(&self.contacts).push(contact);
    }

    pub fn insert_invite(&self, invite: Invite) {
        lock(&self.invites).push(invite);
    }

    pub fn insert_community(&self, community: Community) {
        lock(&self.communities).push(community);
    }

    pub fn insert_fork(&self, fork: Fork) {
        lock(&self.forks).push(fork);
    }

    pub fn wallets(&self) -> Vec<UserWallet> {
        lock(&self.wallets).clone()
    }

    pub fn contacts(&self) -> Vec<Contact> {
        lock(&self.contacts).clone()
    }

    pub fn invites(&self) -> Vec<Invite> {
        lock(&self.invites).clone()
    }

    async fn check(&self) -> Result<(), AppError> {
        self.config
            .simulate("Mock database error")
            .await
            .map_err(|msg| AppError::Database(DatabaseError::Query(msg)))
    }
}

impl Default for MockWalletRepository {
    fn default() -> Self {
        Self::new()
    }
}

fn matches_filter(wallet: &UserWallet, filter: &UserWalletFilter) -> bool {
    match filter {
        UserWalletFilter::ById(id) => &wallet.id == id,
        UserWalletFilter::ByPhoneAndOwner {
            phone_number,
            owner,
        } => {
            wallet.phone_number.as_ref() == Some(phone_number) && &wallet.account_address == owner
        }
        UserWalletFilter::ByOwner(owner) => &wallet.account_address == owner,
    }
}

#[async_trait]
impl WalletRepository for MockWalletRepository {
    async fn health_check(&self) -> Result<(), AppError> {
        self.check().await
    }

    async fn find_user_wallet(
        &self,
        filter: &UserWalletFilter,
    ) -> Result<Option<UserWallet>, AppError> {
        self.check().await?;
        Ok(lock(&self.wallets)
            .iter()
            .find(|wallet| matches_filter(wallet, filter))
            .cloned())
    }

    async fn find_by_wallet_address(
        &self,
        wallet: &Address,
    ) -> Result<Option<UserWallet>, AppError> {
        self.check().await?;
        Ok(lock(&self.wallets)
            .iter()
            .find(|record| record.wallet_address.as_ref() == Some(wallet))
            .cloned())
    }

    async fn set_wallet_address(
        &self,
        filter: &UserWalletFilter,
        wallet: &Address,
        salt: &str,
    ) -> Result<Option<UserWallet>, AppError> {
        self.check().await?;
        let mut wallets = lock(&self.wallets);
        Ok(wallets
            .iter_mut()
            .find(|record| matches_filter(record, filter))
            .map(|record| {
                record.wallet_address = Some(*wallet);
                record.salt = Some(salt.to_string());
                record.clone()
            }))
    }

    async fn set_account_address(
        &self,
        wallet: &Address,
        owner: &Address,
    ) -> Result<(), AppError> {
        self.check().await?;
        for record in lock(&self.wallets)
            .iter_mut()
            .filter(|record| record.wallet_address.as_ref() == Some(wallet))
        {
            record.account_address = *owner;
        }
        Ok(())
    }

    async fn mark_contract_deployed(
        &self,
        wallet: &Address,
        networks: &[String],
    ) -> Result<(), AppError> {
        self.check().await?;
        for record in lock(&self.wallets)
            .iter_mut()
            .filter(|record| record.wallet_address.as_ref() == Some(wallet))
        {
            record.networks = networks.to_vec();
            record.is_contract_deployed = true;
        }
        Ok(())
    }

    async fn update_contacts_wallet(
        &self,
        phone_number: &str,
        wallet: &Address,
    ) -> Result<u64, AppError> {
        self.check().await?;
        let mut updated = 0;
        for contact in lock(&self.contacts)
            .iter_mut()
            .filter(|contact| contact.phone_number == phone_number)
        {
            contact.wallet_address = Some(*wallet);
            contact.state = "NEW".to_string();
            updated += 1;
        }
        Ok(updated)
    }

    async fn find_community(&self, community: &Address) -> Result<Option<Community>, AppError> {
        self.check().await?;
        Ok(lock(&self.communities)
            .iter()
            .find(|record| &record.community_address == community)
            .cloned())
    }

    async fn find_fork(&self, app_name: &str) -> Result<Option<Fork>, AppError> {
        self.check().await?;
        Ok(lock(&self.forks)
            .iter()
            .find(|fork| fork.app_name == app_name)
            .cloned())
    }

    async fn set_invitee_wallet(
        &self,
        inviter: &Address,
        invitee_phone_number: &str,
        wallet: &Address,
    ) -> Result<bool, AppError> {
        self.check().await?;
        let mut invites = lock(&self.invites);
        let latest = invites
            .iter_mut()
            .filter(|invite| {
                &invite.inviter_wallet_address == inviter
                    && invite.invitee_phone_number == invitee_phone_number
            })
            .max_by_key(|invite| invite.created_at);
        Ok(match latest {
            Some(invite) => {
                invite.invitee_wallet_address = Some(*wallet);
                true
            }
            None => false,
        })
    }
}

#[derive(Default)]
struct ChainState {
    sent: Vec<TransactionRequest>,
    receipts: HashMap<TxHash, TransactionReceipt>,
    code: HashMap<Address, Vec<u8>>,
    call_results: HashMap<Address, Vec<u8>>,
    next_status: Option<bool>,
}

/// Simulated EVM chain.
///
/// Sent transactions are mined immediately. Calls to
/// `createCounterfactualWallet` emit `WalletCreated` from the called
/// contract and deploy code at [`MockBlockchainClient::counterfactual_address`].
///
/// # Example
///
/// ```
/// use wallet_jobs::domain::Network;
/// use wallet_jobs::test_utils::MockBlockchainClient;
///
/// let home = MockBlockchainClient::new(Network::Home);
/// home.set_should_fail(true);
/// ```
pub struct MockBlockchainClient {
    network: Network,
    state: Mutex<ChainState>,
    call_count: AtomicU64,
    block_number: AtomicU64,
    is_healthy: AtomicBool,
    should_fail: AtomicBool,
    emit_events: AtomicBool,
}

impl MockBlockchainClient {
    pub const SENDER: Address = Address([0x5d; 20]);

    #[must_use]
    pub fn new(network: Network) -> Self {
        Self {
            network,
            state: Mutex::new(ChainState::default()),
            call_count: AtomicU64::new(0),
            block_number: AtomicU64::new(1000),
            is_healthy: AtomicBool::new(true),
            should_fail: AtomicBool::new(false),
            emit_events: AtomicBool::new(true),
        }
    }

    /// Address the mock factory deploys a wallet to for the given call data.
    #[must_use]
    pub fn counterfactual_address(call_data: &[u8]) -> Address {
        let hash = abi::keccak256(call_data);
        let mut address = [0u8; 20];
        address.copy_from_slice(&hash[12..]);
        Address(address)
    }

    pub fn call_count(&self) -> u64 {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.is_healthy.store(healthy, Ordering::Relaxed);
    }

    /// Makes every RPC call fail with a connection error.
    pub fn set_should_fail(&self, should_fail: bool) {
        self.should_fail.store(should_fail, Ordering::Relaxed);
    }

    /// Receipt status of the next sent transaction only.
    pub fn set_next_status(&self, status: bool) {
        lock(&self.state).next_status = Some(status);
    }

    /// Whether factory calls emit `WalletCreated`.
    pub fn set_emit_events(&self, emit: bool) {
        self.emit_events.store(emit, Ordering::Relaxed);
    }

    pub fn set_code(&self, address: Address, code: Vec<u8>) {
        lock(&self.state).code.insert(address, code);
    }

    /// Return data of every `eth_call` to `to`.
    pub fn set_call_result(&self, to: Address, output: Vec<u8>) {
        lock(&self.state).call_results.insert(to, output);
    }

    pub fn set_block_number(&self, block: u64) {
        self.block_number.store(block, Ordering::Relaxed);
    }

    /// Transactions broadcast so far, in order.
    pub fn sent_transactions(&self) -> Vec<TransactionRequest> {
        lock(&self.state).sent.clone()
    }

    fn check(&self) -> Result<(), AppError> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        if self.should_fail.load(Ordering::Relaxed) {
            return Err(AppError::Blockchain(BlockchainError::Connection(format!(
                "Mock {} node unavailable",
                self.network
            ))));
        }
        Ok(())
    }

    fn factory_logs(&self, request: &TransactionRequest) -> Vec<Log> {
        let selector = abi::selector(wallet_factory::CREATE_COUNTERFACTUAL_WALLET);
        if !self.emit_events.load(Ordering::Relaxed)
            || request.data.len() < 36
            || request.data[..4] != selector
        {
            return Vec::new();
        }
        let wallet = Self::counterfactual_address(&request.data);
        let mut wallet_topic = [0u8; 32];
        wallet_topic[12..].copy_from_slice(wallet.as_bytes());
        let mut owner_topic = [0u8; 32];
        owner_topic.copy_from_slice(&request.data[4..36]);

        vec![Log {
            address: request.to,
            topics: vec![
                abi::event_topic(wallet_factory::WALLET_CREATED),
                H256(wallet_topic),
                H256(owner_topic),
            ],
            data: Vec::new(),
        }]
    }
}

#[async_trait]
impl BlockchainClient for MockBlockchainClient {
    fn network(&self) -> Network {
        self.network
    }

    fn sender_address(&self) -> Address {
        Self::SENDER
    }

    async fn health_check(&self) -> Result<(), AppError> {
        if !self.is_healthy.load(Ordering::Relaxed) {
            return Err(AppError::Blockchain(BlockchainError::Connection(
                "Mock blockchain unhealthy".to_string(),
            )));
        }
        self.check()
    }

    async fn block_number(&self) -> Result<u64, AppError> {
        self.check()?;
        Ok(self.block_number.load(Ordering::Relaxed))
    }

    async fn get_code(&self, address: &Address) -> Result<Vec<u8>, AppError> {
        self.check()?;
        Ok(lock(&self.state).code.get(address).cloned().unwrap_or_default())
    }

    async fn call(&self, to: &Address, _data: &[u8]) -> Result<Vec<u8>, AppError> {
        self.check()?;
        Ok(lock(&self.state)
            .call_results
            .get(to)
            .cloned()
            .unwrap_or_else(|| vec![0u8; 32]))
    }

    async fn send_transaction(&self, request: &TransactionRequest) -> Result<TxHash, AppError> {
        self.check()?;
        let logs = self.factory_logs(request);
        let block_number = self.block_number.fetch_add(1, Ordering::Relaxed) + 1;

        let mut state = lock(&self.state);
        let status = state.next_status.take().unwrap_or(true);

        let mut preimage = Vec::with_capacity(request.data.len() + 29);
        preimage.push(self.network as u8);
        preimage.extend_from_slice(&(state.sent.len() as u64).to_be_bytes());
        preimage.extend_from_slice(request.to.as_bytes());
        preimage.extend_from_slice(&request.data);
        let hash = H256(abi::keccak256(&preimage));

        let logs = if status { logs } else { Vec::new() };
        if !logs.is_empty() {
            let wallet = Self::counterfactual_address(&request.data);
            state.code.insert(wallet, vec![0x60, 0x80, 0x60, 0x40]);
        }
        state.sent.push(request.clone());
        state.receipts.insert(
            hash,
            TransactionReceipt {
                transaction_hash: hash,
                block_number,
                status,
                gas_used: request.gas_limit.unwrap_or(21_000).min(100_000),
                logs,
            },
        );
        Ok(hash)
    }

    async fn get_transaction_receipt(
        &self,
        hash: &TxHash,
    ) -> Result<Option<TransactionReceipt>, AppError> {
        self.check()?;
        Ok(lock(&self.state).receipts.get(hash).cloned())
    }
}

/// Records deep links, text messages and wallet subscriptions.
pub struct MockNotifier {
    deep_links: Mutex<Vec<(Address, String)>>,
    sms: Mutex<Vec<(String, String)>>,
    subscriptions: Mutex<Vec<(Address, Network, Option<u64>)>>,
    should_fail: AtomicBool,
}

impl MockNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self {
            deep_links: Mutex::new(Vec::new()),
            sms: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
            should_fail: AtomicBool::new(false),
        }
    }

    pub fn set_should_fail(&self, should_fail: bool) {
        self.should_fail.store(should_fail, Ordering::Relaxed);
    }

    pub fn deep_links(&self) -> Vec<(Address, String)> {
        lock(&self.deep_links).clone()
    }

    pub fn sms(&self) -> Vec<(String, String)> {
        lock(&self.sms).clone()
    }

    pub fn subscriptions(&self) -> Vec<(Address, Network, Option<u64>)> {
        lock(&self.subscriptions).clone()
    }

    fn check(&self, service: &str) -> Result<(), AppError> {
        if self.should_fail.load(Ordering::Relaxed) {
            return Err(AppError::ExternalService(ExternalServiceError::Unavailable(
                format!("Mock {service} unavailable"),
            )));
        }
        Ok(())
    }
}

impl Default for MockNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeepLinkProvider for MockNotifier {
    async fn create_deep_link(
        &self,
        community: &Address,
        app_name: &str,
    ) -> Result<String, AppError> {
        self.check("deep link provider")?;
        lock(&self.deep_links).push((*community, app_name.to_string()));
        Ok(format!("https://link.test/{app_name}/{community}"))
    }
}

#[async_trait]
impl SmsProvider for MockNotifier {
    async fn send_sms(&self, to: &str, body: &str) -> Result<(), AppError> {
        self.check("SMS provider")?;
        lock(&self.sms).push((to.to_string(), body.to_string()));
        Ok(())
    }
}

#[async_trait]
impl WalletSubscriber for MockNotifier {
    async fn subscribe_wallet(
        &self,
        wallet: &Address,
        network: Network,
        from_block: Option<u64>,
    ) -> Result<(), AppError> {
        self.check("subscription service")?;
        lock(&self.subscriptions).push((*wallet, network, from_block));
        Ok(())
    }
}
