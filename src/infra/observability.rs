//! Logging and Prometheus metrics.
//!
//! Job throughput, transaction sends and HTTP traffic are exported through the
//! `metrics` facade and rendered on GET /metrics.

use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Prometheus handle for on-demand scrape output (e.g. GET /metrics).
pub type PrometheusHandle = metrics_exporter_prometheus::PrometheusHandle;

pub const JOBS_ENQUEUED: &str = "wallet_jobs_enqueued_total";
pub const JOBS_CLAIMED: &str = "wallet_jobs_claimed_total";
pub const JOBS_SUCCEEDED: &str = "wallet_jobs_succeeded_total";
pub const JOBS_RETRIED: &str = "wallet_jobs_retried_total";
pub const JOBS_FAILED: &str = "wallet_jobs_failed_total";
pub const JOB_DURATION_SECONDS: &str = "wallet_job_duration_seconds";
pub const TRANSACTIONS_SENT: &str = "wallet_transactions_sent_total";
pub const TRANSACTIONS_RESUMED: &str = "wallet_transactions_resumed_total";

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides the default filter. With `json` set, events are
/// emitted as one JSON object per line.
pub fn init_tracing(json: bool) -> Result<(), tracing_subscriber::util::TryInitError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,wallet_jobs=debug,sqlx=warn"));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(fmt::layer().json().with_current_span(true))
            .try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    }
}

/// Install the global metrics recorder and return a handle for rendering.
///
/// Uses `PrometheusBuilder` without an HTTP listener; the application
/// exposes metrics via GET /metrics using `handle.render()`.
///
/// # Errors
/// Returns an error if a recorder is already installed or building fails.
pub fn init_metrics() -> Result<PrometheusHandle, metrics_exporter_prometheus::BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Handle backed by a recorder that is not installed globally, for tests.
#[must_use]
pub fn detached_metrics_handle() -> Arc<PrometheusHandle> {
    Arc::new(PrometheusBuilder::new().build_recorder().handle())
}
