//! Claims due jobs and settles them after their handler ran.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use rand::Rng;
use serde_json::json;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};

use super::context::JobContext;
use super::tasks::TaskRunner;
use crate::domain::{AppError, Job, JobError, JobRepository, TransactionReceipt};
use crate::infra::observability::{
    JOB_DURATION_SECONDS, JOBS_CLAIMED, JOBS_FAILED, JOBS_RETRIED, JOBS_SUCCEEDED,
};

/// Exponential backoff between attempts of a failing job.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(600),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following `attempts` failed ones: the base
    /// delay doubled per attempt, capped, plus up to 20% jitter.
    #[must_use]
    pub fn delay(&self, attempts: i32) -> Duration {
        let exponent = u32::try_from(attempts.saturating_sub(1)).unwrap_or(0).min(16);
        let backoff = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.max_delay);
        let jitter_ms = backoff.as_millis() as u64 / 5;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        backoff + Duration::from_millis(jitter)
    }
}

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Jobs of one batch running at the same time
    pub concurrency: usize,
    /// How long a claimed job stays invisible to other workers
    pub lease: Duration,
    pub retry: RetryPolicy,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            lease: Duration::from_secs(300),
            retry: RetryPolicy::default(),
        }
    }
}

/// Runs claimed jobs and records their outcome.
#[derive(Clone)]
pub struct JobProcessor {
    tasks: Arc<TaskRunner>,
    repo: Arc<dyn JobRepository>,
    config: ProcessorConfig,
}

impl JobProcessor {
    pub fn new(tasks: Arc<TaskRunner>, repo: Arc<dyn JobRepository>, config: ProcessorConfig) -> Self {
        Self {
            tasks,
            repo,
            config,
        }
    }

    /// Claim up to `batch_size` due jobs and run them. Returns how many
    /// were claimed.
    pub async fn process_due(&self, batch_size: i64) -> Result<usize, AppError> {
        let jobs = self.repo.claim_due_jobs(batch_size, self.config.lease).await?;
        if jobs.is_empty() {
            return Ok(0);
        }
        let claimed = jobs.len();
        metrics::counter!(JOBS_CLAIMED).increment(claimed as u64);

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut running = JoinSet::new();
        for job in jobs {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|e| AppError::Internal(format!("job semaphore closed: {e}")))?;
            let processor = self.clone();
            running.spawn(async move {
                let _permit = permit;
                processor.process(job).await;
            });
        }

        while let Some(joined) = running.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Job task aborted");
            }
        }
        Ok(claimed)
    }

    /// Run one claimed job and settle it as succeeded, retried or failed.
    #[instrument(skip(self, job), fields(job_id = %job.id, job = %job.name, attempt = job.attempts))]
    pub async fn process(&self, job: Job) {
        let id = job.id.clone();
        let name = job.name;
        let attempts = job.attempts;
        let max_attempts = job.max_attempts;

        let started = Instant::now();
        let mut ctx = JobContext::new(job, Arc::clone(&self.repo));
        let outcome = self.tasks.run(&mut ctx).await;
        metrics::histogram!(JOB_DURATION_SECONDS, "job" => name.as_str())
            .record(started.elapsed().as_secs_f64());

        let settled = match outcome {
            Err(AppError::Job(JobError::LeaseLost(reason))) => {
                warn!(reason = %reason, "Job was reclaimed by another worker, dropping outcome");
                return;
            }
            Ok(receipt) => {
                info!("Job succeeded");
                metrics::counter!(JOBS_SUCCEEDED, "job" => name.as_str()).increment(1);
                let result = receipt.as_ref().map(receipt_summary);
                self.repo.complete_job(&id, attempts, result.as_ref()).await
            }
            Err(e) if e.is_retryable() && attempts < max_attempts => {
                let delay = self.config.retry.delay(attempts);
                warn!(error = %e, retry_in = ?delay, "Job failed, retrying");
                metrics::counter!(JOBS_RETRIED, "job" => name.as_str()).increment(1);
                let next_run_at = Utc::now()
                    + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
                self.repo
                    .schedule_retry(&id, attempts, &e.to_string(), next_run_at)
                    .await
            }
            Err(e) => {
                error!(error = %e, retryable = e.is_retryable(), "Job failed");
                metrics::counter!(JOBS_FAILED, "job" => name.as_str()).increment(1);
                self.repo.fail_job(&id, attempts, &e.to_string()).await
            }
        };

        match settled {
            Ok(true) => {}
            Ok(false) => warn!("Job was reclaimed by another worker, outcome not recorded"),
            // The lease expires and the job is claimed again
            Err(e) => error!(error = %e, "Could not record job outcome"),
        }
    }
}

fn receipt_summary(receipt: &TransactionReceipt) -> serde_json::Value {
    json!({
        "transactionHash": receipt.transaction_hash,
        "blockNumber": receipt.block_number,
        "gasUsed": receipt.gas_used,
        "status": receipt.status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::tasks::testing::{Fixture, fixture, fixture_with_jobs};
    use crate::domain::{Address, JobName, JobStatus, NewJob};
    use crate::test_utils::{MockConfig, MockJobRepository};
    use serde_json::json;

    fn processor(f: &Fixture) -> JobProcessor {
        JobProcessor::new(
            Arc::clone(&f.runner),
            f.jobs.clone(),
            ProcessorConfig {
                concurrency: 2,
                lease: Duration::from_secs(60),
                retry: RetryPolicy {
                    base_delay: Duration::from_secs(30),
                    max_delay: Duration::from_secs(60),
                },
            },
        )
    }

    fn fund_token(limit: u32) -> serde_json::Value {
        json!({
            "receiverAddress": Address([0x44; 20]),
            "identifier": "+15550001",
            "tokenAddress": Address([0x70; 20]),
            "communityAddress": Address([0xcc; 20]),
            "bonusType": "invite",
            "bonusAmount": "10",
            "bonusMaxTimesLimit": limit,
        })
    }

    #[test]
    fn test_retry_delay_grows_and_caps() {
        let policy = RetryPolicy {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        };
        let first = policy.delay(1);
        assert!(first >= Duration::from_secs(1) && first <= Duration::from_millis(1200));
        let third = policy.delay(3);
        assert!(third >= Duration::from_secs(4) && third <= Duration::from_millis(4800));
        let capped = policy.delay(30);
        assert!(capped >= Duration::from_secs(10) && capped <= Duration::from_secs(12));
    }

    #[tokio::test]
    async fn test_successful_job_records_receipt() {
        let f = fixture();
        let processor = processor(&f);
        let job = f
            .jobs
            .enqueue(&NewJob::new(JobName::FundToken, fund_token(1), 3))
            .await
            .unwrap();

        assert_eq!(processor.process_due(10).await.unwrap(), 1);

        let stored = f.jobs.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Succeeded);
        assert_eq!(stored.attempts, 1);
        let result = stored.result.unwrap();
        assert_eq!(result["status"], true);
        assert!(result["transactionHash"].is_string());
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried_then_failed() {
        let f = fixture();
        let processor = processor(&f);
        f.home.set_should_fail(true);
        let job = f
            .jobs
            .enqueue(&NewJob::new(JobName::FundToken, fund_token(1), 2))
            .await
            .unwrap();

        processor.process_due(10).await.unwrap();
        let stored = f.jobs.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Pending);
        assert!(stored.next_run_at > Utc::now());
        assert!(stored.last_error.is_some());

        f.jobs.make_due(&job.id);
        processor.process_due(10).await.unwrap();
        let stored = f.jobs.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.attempts, 2);
    }

    #[tokio::test]
    async fn test_precondition_failure_is_not_retried() {
        let f = fixture();
        let processor = processor(&f);
        let job = f
            .jobs
            .enqueue(&NewJob::new(
                JobName::SetWalletOwner,
                json!({ "walletAddress": Address([1; 20]), "newOwner": Address([2; 20]) }),
                5,
            ))
            .await
            .unwrap();

        processor.process_due(10).await.unwrap();
        let stored = f.jobs.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.attempts, 1);
    }

    #[tokio::test]
    async fn test_batch_runs_every_claimed_job() {
        let f = fixture();
        let processor = processor(&f);
        for _ in 0..5 {
            f.jobs
                .enqueue(&NewJob::new(JobName::FundToken, fund_token(100), 3))
                .await
                .unwrap();
        }

        assert_eq!(processor.process_due(3).await.unwrap(), 3);
        assert_eq!(processor.process_due(10).await.unwrap(), 2);
        assert_eq!(processor.process_due(10).await.unwrap(), 0);
        assert_eq!(f.home.sent_transactions().len(), 5);
    }

    #[tokio::test]
    async fn test_stale_worker_cannot_settle_reclaimed_job() {
        let f = fixture();
        let processor = processor(&f);
        let job = f
            .jobs
            .enqueue(&NewJob::new(
                JobName::SetWalletOwner,
                json!({ "walletAddress": Address([1; 20]), "newOwner": Address([2; 20]) }),
                5,
            ))
            .await
            .unwrap();

        let stale = f.jobs.claim_due_jobs(1, Duration::from_secs(60)).await.unwrap();
        f.jobs.expire_lease(&job.id);
        let reclaimed = f.jobs.claim_due_jobs(1, Duration::from_secs(60)).await.unwrap();
        assert_eq!(reclaimed[0].attempts, 2);
        assert!(f.jobs.complete_job(&job.id, 2, None).await.unwrap());

        processor.process(stale[0].clone()).await;

        let stored = f.jobs.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Succeeded);
        assert!(stored.last_error.is_none());
    }

    #[tokio::test]
    async fn test_stale_worker_checkpoint_is_rejected() {
        let f = fixture();
        let processor = processor(&f);
        let job = f
            .jobs
            .enqueue(&NewJob::new(JobName::FundToken, fund_token(1), 3))
            .await
            .unwrap();

        let stale = f.jobs.claim_due_jobs(1, Duration::from_secs(60)).await.unwrap();
        f.jobs.expire_lease(&job.id);
        f.jobs.claim_due_jobs(1, Duration::from_secs(60)).await.unwrap();

        processor.process(stale[0].clone()).await;

        let stored = f.jobs.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Running);
        assert_eq!(stored.attempts, 2);
        assert!(stored.data.get("transactions").is_none());
    }

    #[tokio::test]
    async fn test_concurrent_bonus_jobs_respect_limit() {
        let f = fixture_with_jobs(Arc::new(MockJobRepository::with_config(
            MockConfig::success().with_latency(5),
        )));
        let processor = JobProcessor::new(
            Arc::clone(&f.runner),
            f.jobs.clone(),
            ProcessorConfig::default(),
        );
        for _ in 0..3 {
            f.jobs
                .enqueue(&NewJob::new(JobName::FundToken, fund_token(1), 3))
                .await
                .unwrap();
        }

        assert_eq!(processor.process_due(10).await.unwrap(), 3);

        assert_eq!(f.home.sent_transactions().len(), 1);
        assert!(
            f.jobs
                .all_jobs()
                .iter()
                .all(|job| job.status == JobStatus::Succeeded)
        );
    }
}
