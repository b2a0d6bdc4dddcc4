//! Application state management.
//!
//! The state handed to every request handler via Axum's State extractor.

use std::sync::Arc;

use secrecy::SecretString;

use super::service::JobService;
use crate::infra::observability::PrometheusHandle;

/// Shared application state for the Axum web server.
///
/// # Example
///
/// ```ignore
/// let service = Arc::new(JobService::new(db, chains, 5));
/// let state = AppState::new(service, api_key, metrics_handle);
///
/// let router = create_router(Arc::new(state));
/// ```
#[derive(Clone)]
pub struct AppState {
    /// Job use cases.
    pub service: Arc<JobService>,

    /// Key required in `x-api-key` on POST requests.
    pub api_auth_key: SecretString,

    /// Renders the Prometheus scrape output on GET /metrics.
    pub metrics: Arc<PrometheusHandle>,
}

impl AppState {
    #[must_use]
    pub fn new(
        service: Arc<JobService>,
        api_auth_key: SecretString,
        metrics: Arc<PrometheusHandle>,
    ) -> Self {
        Self {
            service,
            api_auth_key,
            metrics,
        }
    }
}
