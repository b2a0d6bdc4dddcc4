//! Background worker that drains the job queue.

use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info};

use super::runner::JobProcessor;

/// Configuration for the background worker
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Interval between polls when the queue is idle
    pub poll_interval: Duration,
    /// Number of jobs claimed per poll
    pub batch_size: i64,
    /// Whether the worker is enabled
    pub enabled: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            batch_size: 10,
            enabled: true,
        }
    }
}

/// Background worker polling for due jobs
pub struct JobWorker {
    processor: JobProcessor,
    config: WorkerConfig,
    shutdown_rx: watch::Receiver<bool>,
}

impl JobWorker {
    pub fn new(
        processor: JobProcessor,
        config: WorkerConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            processor,
            config,
            shutdown_rx,
        }
    }

    /// Run the worker loop until shutdown is signalled.
    ///
    /// A full batch is followed by another poll right away; jobs claimed
    /// when shutdown arrives finish before the loop exits.
    pub async fn run(mut self) {
        if !self.config.enabled {
            info!("Job worker is disabled");
            return;
        }

        info!(
            poll_interval = ?self.config.poll_interval,
            batch_size = self.config.batch_size,
            "Starting job worker"
        );

        let mut delay = Duration::ZERO;
        loop {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    delay = if self.process_batch().await {
                        Duration::ZERO
                    } else {
                        self.config.poll_interval
                    };
                }
                result = self.shutdown_rx.changed() => {
                    if result.is_err() || *self.shutdown_rx.borrow() {
                        info!("Job worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Returns whether the batch was full.
    async fn process_batch(&self) -> bool {
        match self.processor.process_due(self.config.batch_size).await {
            Ok(0) => false,
            Ok(count) => {
                debug!(count, "Processed job batch");
                i64::try_from(count).is_ok_and(|count| count >= self.config.batch_size)
            }
            Err(e) => {
                error!(error = %e, "Error claiming due jobs");
                false
            }
        }
    }
}

/// Spawn the background worker as a tokio task
pub fn spawn_worker(
    processor: JobProcessor,
    config: WorkerConfig,
) -> (tokio::task::JoinHandle<()>, watch::Sender<bool>) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = JobWorker::new(processor, config, shutdown_rx);
    let handle = tokio::spawn(worker.run());
    (handle, shutdown_tx)
}
