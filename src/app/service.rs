//! Application service layer.
//!
//! Use cases behind the HTTP API: enqueueing jobs, inspecting them and
//! re-queueing failed ones. Jobs themselves run in the background worker.

use std::sync::Arc;
use tracing::{info, instrument, warn};
use validator::Validate;

use super::sender::{ChainClients, SentTransaction};
use crate::domain::{
    AppError, CreateForeignWalletParams, CreateWalletParams, EnqueueJobRequest, FundTokenParams,
    HealthResponse, HealthStatus, Job, JobError, JobListParams, JobName, JobRepository,
    JobStatus, NewJob, PaginatedResponse, SetWalletOwnerParams,
};
use crate::infra::observability::JOBS_ENQUEUED;

/// Application service for the job API.
///
/// # Example
///
/// ```ignore
/// let db = Arc::new(PostgresClient::new(&config).await?);
/// let service = JobService::new(db, ChainClients::new(home, foreign), 5);
///
/// let job = service
///     .enqueue(&EnqueueJobRequest::new(JobName::CreateWallet, data))
///     .await?;
/// ```
pub struct JobService {
    jobs: Arc<dyn JobRepository>,
    chains: ChainClients,
    default_max_attempts: i32,
}

impl JobService {
    #[must_use]
    pub fn new(jobs: Arc<dyn JobRepository>, chains: ChainClients, default_max_attempts: i32) -> Self {
        Self {
            jobs,
            chains,
            default_max_attempts,
        }
    }

    /// Validates the request and its job parameters, then queues the job.
    ///
    /// A request carrying an idempotency key that was seen before returns
    /// the job created the first time.
    ///
    /// # Errors
    ///
    /// Returns an `AppError` if:
    /// - The request fails validation
    /// - The data does not match the parameters of the named job
    /// - The database operation fails
    #[instrument(skip(self, request), fields(job = %request.name))]
    pub async fn enqueue(&self, request: &EnqueueJobRequest) -> Result<Job, AppError> {
        request.validate().map_err(|e| {
            warn!(error = %e, "Validation failed for enqueue request");
            AppError::from(e)
        })?;
        check_params(request.name, &request.data)?;

        let mut new_job = NewJob::new(
            request.name,
            request.data.clone(),
            request.max_attempts.unwrap_or(self.default_max_attempts),
        );
        if let Some(key) = &request.idempotency_key {
            new_job = new_job.with_idempotency_key(key.clone());
        }

        let job = self.jobs.enqueue(&new_job).await?;
        metrics::counter!(JOBS_ENQUEUED, "job" => request.name.as_str()).increment(1);
        info!(job_id = %job.id, status = %job.status.as_str(), "Job enqueued");
        Ok(job)
    }

    #[instrument(skip(self))]
    pub async fn get_job(&self, id: &str) -> Result<Option<Job>, AppError> {
        self.jobs.get_job(id).await
    }

    /// Lists jobs newest first. The limit is clamped to 1..=100.
    #[instrument(skip(self))]
    pub async fn list_jobs(&self, params: &JobListParams) -> Result<PaginatedResponse<Job>, AppError> {
        self.jobs
            .list_jobs(
                params.limit.clamp(1, 100),
                params.cursor.as_deref(),
                params.status,
            )
            .await
    }

    /// Moves a failed job back to pending with a fresh attempt budget.
    ///
    /// Settled checkpoints are kept, so the job resumes after its last
    /// settled step. Transactions that reverted or that the node never
    /// mined are forgotten so the step is broadcast again.
    #[instrument(skip(self))]
    pub async fn retry_job(&self, id: &str) -> Result<Job, AppError> {
        let job = self
            .jobs
            .get_job(id)
            .await?
            .ok_or_else(|| AppError::Job(JobError::NotFound(id.to_string())))?;
        if job.status != JobStatus::Failed {
            return Err(AppError::Job(JobError::InvalidState(format!(
                "job {id} is {}, only failed jobs can be retried",
                job.status.as_str()
            ))));
        }

        let mut data = job.data;
        self.forget_unsettled_transactions(id, &mut data).await?;

        let job = self.jobs.reset_job(id, &data).await?.ok_or_else(|| {
            AppError::Job(JobError::InvalidState(format!(
                "job {id} changed state while being retried"
            )))
        })?;
        info!(job_id = %id, "Job re-queued");
        Ok(job)
    }

    async fn forget_unsettled_transactions(
        &self,
        id: &str,
        data: &mut serde_json::Value,
    ) -> Result<(), AppError> {
        let Some(transactions) = data
            .get_mut("transactions")
            .and_then(serde_json::Value::as_object_mut)
        else {
            return Ok(());
        };

        let mut unsettled = Vec::new();
        for (step, value) in transactions.iter() {
            let Ok(sent) = serde_json::from_value::<SentTransaction>(value.clone()) else {
                continue;
            };
            let receipt = self
                .chains
                .get(sent.network)
                .get_transaction_receipt(&sent.hash)
                .await?;
            if receipt.is_none_or(|receipt| !receipt.status) {
                unsettled.push(step.clone());
            }
        }

        for step in unsettled {
            info!(job_id = %id, step = %step, "Forgetting unsettled transaction");
            transactions.remove(&step);
        }
        Ok(())
    }

    /// Performs a health check on the database and both chains.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> HealthResponse {
        let database = match self.jobs.health_check().await {
            Ok(()) => HealthStatus::Healthy,
            Err(e) => {
                warn!(error = ?e, "Database health check failed");
                HealthStatus::Unhealthy
            }
        };

        let home_chain = match self.chains.home.health_check().await {
            Ok(()) => HealthStatus::Healthy,
            Err(e) => {
                warn!(error = ?e, "Home chain health check failed");
                HealthStatus::Unhealthy
            }
        };

        let foreign_chain = match self.chains.foreign.health_check().await {
            Ok(()) => HealthStatus::Healthy,
            Err(e) => {
                warn!(error = ?e, "Foreign chain health check failed");
                HealthStatus::Unhealthy
            }
        };

        HealthResponse::new(database, home_chain, foreign_chain)
    }
}

/// Rejects data that the handler for `name` could not run with.
fn check_params(name: JobName, data: &serde_json::Value) -> Result<(), AppError> {
    fn parse<T: serde::de::DeserializeOwned>(
        name: JobName,
        data: &serde_json::Value,
    ) -> Result<T, AppError> {
        T::deserialize(data).map_err(|e| {
            AppError::Job(JobError::InvalidParams {
                job: name.to_string(),
                message: e.to_string(),
            })
        })
    }

    match name {
        JobName::CreateWallet => {
            let params: CreateWalletParams = parse(name, data)?;
            super::tasks::parse_salt(name, &params.salt)?;
        }
        JobName::SetWalletOwner => {
            parse::<SetWalletOwnerParams>(name, data)?;
        }
        JobName::CreateForeignWallet => {
            parse::<CreateForeignWalletParams>(name, data)?;
        }
        JobName::FundToken => {
            parse::<FundTokenParams>(name, data)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Address, BlockchainClient, H256, Network, TransactionRequest};
    use crate::test_utils::{MockBlockchainClient, MockJobRepository};
    use serde_json::json;

    struct Fixture {
        service: JobService,
        jobs: Arc<MockJobRepository>,
        home: Arc<MockBlockchainClient>,
        foreign: Arc<MockBlockchainClient>,
    }

    fn fixture() -> Fixture {
        let jobs = Arc::new(MockJobRepository::new());
        let home = Arc::new(MockBlockchainClient::new(Network::Home));
        let foreign = Arc::new(MockBlockchainClient::new(Network::Foreign));
        let service = JobService::new(
            jobs.clone(),
            ChainClients::new(home.clone(), foreign.clone()),
            5,
        );
        Fixture {
            service,
            jobs,
            home,
            foreign,
        }
    }

    fn create_wallet_request() -> EnqueueJobRequest {
        EnqueueJobRequest::new(
            JobName::CreateWallet,
            json!({ "owner": Address([1; 20]), "salt": "1" }),
        )
    }

    #[tokio::test]
    async fn test_enqueue_success() {
        let f = fixture();
        let job = f.service.enqueue(&create_wallet_request()).await.unwrap();

        assert_eq!(job.name, JobName::CreateWallet);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.max_attempts, 5);
        assert_eq!(job.attempts, 0);
    }

    #[tokio::test]
    async fn test_enqueue_duplicate_key_returns_original() {
        let f = fixture();
        let request = create_wallet_request().with_idempotency_key("owner-1");

        let first = f.service.enqueue(&request).await.unwrap();
        let second = f.service.enqueue(&request).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(f.jobs.all_jobs().len(), 1);
    }

    #[tokio::test]
    async fn test_enqueue_rejects_bad_params() {
        let f = fixture();
        let request = EnqueueJobRequest::new(JobName::SetWalletOwner, json!({ "newOwner": "0x01" }));

        let result = f.service.enqueue(&request).await;
        assert!(matches!(
            result,
            Err(AppError::Job(JobError::InvalidParams { .. }))
        ));
        assert!(f.jobs.all_jobs().is_empty());
    }

    #[tokio::test]
    async fn test_enqueue_rejects_bad_salt() {
        let f = fixture();
        let request = EnqueueJobRequest::new(
            JobName::CreateWallet,
            json!({ "owner": Address([1; 20]), "salt": "0xzz" }),
        );
        assert!(f.service.enqueue(&request).await.is_err());
    }

    #[tokio::test]
    async fn test_enqueue_validation_failure() {
        let f = fixture();
        let mut request = create_wallet_request();
        request.max_attempts = Some(0);

        let result = f.service.enqueue(&request).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_retry_only_failed_jobs() {
        let f = fixture();
        let job = f.service.enqueue(&create_wallet_request()).await.unwrap();

        let result = f.service.retry_job(&job.id).await;
        assert!(matches!(result, Err(AppError::Job(JobError::InvalidState(_)))));

        f.jobs.mark_failed(&job.id, "boom");
        let retried = f.service.retry_job(&job.id).await.unwrap();
        assert_eq!(retried.status, JobStatus::Pending);
        assert_eq!(retried.attempts, 0);

        let missing = f.service.retry_job("missing").await;
        assert!(matches!(missing, Err(AppError::Job(JobError::NotFound(_)))));
    }

    #[tokio::test]
    async fn test_retry_forgets_unsettled_transactions() {
        let f = fixture();
        let request = TransactionRequest::call(Address([0x01; 20]), vec![]);
        let mined = f.home.send_transaction(&request).await.unwrap();
        f.home.set_next_status(false);
        let reverted = f.home.send_transaction(&request).await.unwrap();

        let job = f.service.enqueue(&create_wallet_request()).await.unwrap();
        let mut data = job.data.clone();
        data["walletAddress"] = json!(Address([0x77; 20]));
        data["transactions"] = json!({
            "createWallet": { "hash": mined, "network": "home" },
            "setOwner": { "hash": reverted, "network": "home" },
            "createForeignWallet": { "hash": H256([0x99; 32]), "network": "foreign" },
        });
        f.jobs.save_data(&job.id, 0, &data).await.unwrap();
        f.jobs.mark_failed(&job.id, "reverted");

        let retried = f.service.retry_job(&job.id).await.unwrap();

        assert_eq!(retried.status, JobStatus::Pending);
        assert_eq!(
            retried.data["transactions"],
            json!({ "createWallet": { "hash": mined, "network": "home" } })
        );
        assert_eq!(retried.data["walletAddress"], json!(Address([0x77; 20])));
        let stored = f.jobs.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.data, retried.data);
    }

    #[tokio::test]
    async fn test_retry_keeps_job_failed_when_node_is_down() {
        let f = fixture();
        let job = f.service.enqueue(&create_wallet_request()).await.unwrap();
        let mut data = job.data.clone();
        data["transactions"] = json!({
            "createWallet": { "hash": H256([0x99; 32]), "network": "home" },
        });
        f.jobs.save_data(&job.id, 0, &data).await.unwrap();
        f.jobs.mark_failed(&job.id, "timeout");
        f.home.set_should_fail(true);

        assert!(f.service.retry_job(&job.id).await.is_err());
        let stored = f.jobs.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_list_jobs_filters_by_status() {
        let f = fixture();
        let first = f.service.enqueue(&create_wallet_request()).await.unwrap();
        f.service.enqueue(&create_wallet_request()).await.unwrap();
        f.jobs.mark_failed(&first.id, "boom");

        let failed = f
            .service
            .list_jobs(&JobListParams {
                status: Some(JobStatus::Failed),
                ..JobListParams::default()
            })
            .await
            .unwrap();
        assert_eq!(failed.items.len(), 1);
        assert_eq!(failed.items[0].id, first.id);

        let all = f.service.list_jobs(&JobListParams::default()).await.unwrap();
        assert_eq!(all.items.len(), 2);
    }

    #[tokio::test]
    async fn test_health_check_all_healthy() {
        let f = fixture();
        let health = f.service.health_check().await;

        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.database, HealthStatus::Healthy);
        assert_eq!(health.home_chain, HealthStatus::Healthy);
        assert_eq!(health.foreign_chain, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_health_check_db_unhealthy() {
        let f = fixture();
        f.jobs.set_healthy(false);

        let health = f.service.health_check().await;
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert_eq!(health.database, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_health_check_foreign_only_degrades() {
        let f = fixture();
        f.foreign.set_healthy(false);

        let health = f.service.health_check().await;
        assert_eq!(health.status, HealthStatus::Degraded);
        assert_eq!(health.home_chain, HealthStatus::Healthy);
        assert_eq!(health.foreign_chain, HealthStatus::Unhealthy);

        f.home.set_healthy(false);
        assert_eq!(f.service.health_check().await.status, HealthStatus::Unhealthy);
    }
}
