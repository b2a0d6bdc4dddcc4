//! HTTP routing configuration with API key authentication and rate limiting.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderValue, Request, Response, StatusCode},
    middleware::{self, Next},
    response::IntoResponse,
    routing::{get, post},
};
use governor::{Quota, RateLimiter};
use tower::ServiceBuilder;
use tower_http::{
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::app::AppState;
use crate::domain::{ErrorDetail, RateLimitResponse};

use super::handlers::{
    enqueue_job_handler, get_job_handler, health_check_handler, list_jobs_handler,
    liveness_handler, metrics_handler, readiness_handler, retry_job_handler,
};
use super::middleware::auth_middleware;

/// Rate limiter configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Requests per second for job endpoints
    pub general_rps: u32,
    /// Burst size for job endpoints
    pub general_burst: u32,
    /// Requests per second for health endpoints
    pub health_rps: u32,
    /// Burst size for health endpoints
    pub health_burst: u32,
    /// How often idle client buckets are dropped
    pub prune_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            general_rps: 10,
            general_burst: 20,
            health_rps: 100,
            health_burst: 100,
            prune_interval: Duration::from_secs(60),
        }
    }
}

type KeyedLimiter = governor::RateLimiter<
    IpAddr,
    governor::state::keyed::DashMapStateStore<IpAddr>,
    governor::clock::DefaultClock,
>;

/// Shared rate limiter state, keyed by client IP
pub struct RateLimitState {
    jobs_limiter: KeyedLimiter,
    health_limiter: KeyedLimiter,
    config: RateLimitConfig,
}

fn quota(rps: u32, burst: u32) -> Quota {
    Quota::per_second(NonZeroU32::new(rps).unwrap_or(NonZeroU32::MIN))
        .allow_burst(NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN))
}

impl RateLimitState {
    /// Zero rates are raised to one request per second.
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            jobs_limiter: RateLimiter::dashmap(quota(config.general_rps, config.general_burst)),
            health_limiter: RateLimiter::dashmap(quota(config.health_rps, config.health_burst)),
            config,
        }
    }

    /// Drop buckets of clients whose quota has fully replenished.
    pub fn retain_recent(&self) {
        self.jobs_limiter.retain_recent();
        self.jobs_limiter.shrink_to_fit();
        self.health_limiter.retain_recent();
        self.health_limiter.shrink_to_fit();
    }

    /// Number of client buckets currently tracked.
    #[must_use]
    pub fn tracked_clients(&self) -> usize {
        self.jobs_limiter.len() + self.health_limiter.len()
    }

    /// Prune idle buckets every `prune_interval` until the state is dropped.
    pub fn spawn_pruner(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let state = Arc::downgrade(self);
        let period = self.config.prune_interval.max(Duration::from_millis(10));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(state) = state.upgrade() else {
                    break;
                };
                let before = state.tracked_clients();
                state.retain_recent();
                tracing::debug!(
                    before,
                    after = state.tracked_clients(),
                    "Pruned rate limiter buckets"
                );
            }
        })
    }
}

/// Extract client IP from request (X-Forwarded-For, X-Real-IP, or ConnectInfo).
/// Unknown clients share one bucket.
fn client_ip_from_request<B>(request: &Request<B>) -> IpAddr {
    let forwarded = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .and_then(|first| first.trim().parse::<IpAddr>().ok());
    if let Some(ip) = forwarded {
        return ip;
    }

    let real_ip = request
        .headers()
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<IpAddr>().ok());
    if let Some(ip) = real_ip {
        return ip;
    }

    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip();
    }
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

type DefaultInstant = <governor::clock::DefaultClock as governor::clock::Clock>::Instant;

fn retry_after_secs(not_until: &governor::NotUntil<DefaultInstant>) -> u64 {
    not_until
        .wait_time_from(governor::clock::Clock::now(
            &governor::clock::DefaultClock::default(),
        ))
        .as_secs()
}

/// Admit the request against `limiter` or answer 429 with a `Retry-After`.
/// `advertised` is echoed in `X-RateLimit-Limit` when set.
async fn throttle(
    limiter: &KeyedLimiter,
    advertised: Option<u32>,
    request: Request<Body>,
    next: Next,
) -> Response<Body> {
    let client_ip = client_ip_from_request(&request);
    let limit = advertised.map(HeaderValue::from);

    let mut response = match limiter.check_key(&client_ip) {
        Ok(_) => next.run(request).await,
        Err(not_until) => {
            let retry_after = retry_after_secs(&not_until);
            tracing::debug!(client_ip = %client_ip, retry_after, "Request throttled");
            let body = RateLimitResponse {
                error: ErrorDetail {
                    r#type: "rate_limited".to_string(),
                    message: format!("Too many requests from {client_ip}, retry in {retry_after}s"),
                },
                retry_after,
            };
            let mut rejected = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
            let headers = rejected.headers_mut();
            headers.insert("Retry-After", HeaderValue::from(retry_after));
            if limit.is_some() {
                headers.insert("X-RateLimit-Remaining", HeaderValue::from_static("0"));
            }
            rejected
        }
    };

    if let Some(limit) = limit {
        response.headers_mut().insert("X-RateLimit-Limit", limit);
    }
    response
}

async fn rate_limit_jobs_middleware(
    State(rate_limit): State<Arc<RateLimitState>>,
    request: Request<Body>,
    next: Next,
) -> Response<Body> {
    throttle(
        &rate_limit.jobs_limiter,
        Some(rate_limit.config.general_rps),
        request,
        next,
    )
    .await
}

/// Health probes and the metrics scrape share the looser limit.
async fn rate_limit_health_middleware(
    State(rate_limit): State<Arc<RateLimitState>>,
    request: Request<Body>,
    next: Next,
) -> Response<Body> {
    throttle(&rate_limit.health_limiter, None, request, next).await
}

fn job_routes(app_state: &Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(enqueue_job_handler).get(list_jobs_handler))
        .route("/{id}", get(get_job_handler))
        .route("/{id}/retry", post(retry_job_handler))
        .layer(middleware::from_fn_with_state(
            Arc::clone(app_state),
            auth_middleware,
        ))
}

fn health_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(health_check_handler))
        .route("/live", get(liveness_handler))
        .route("/ready", get(readiness_handler))
}

fn with_common_layers(router: Router<Arc<AppState>>, app_state: Arc<AppState>) -> Router {
    let middleware = ServiceBuilder::new()
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(30),
        ));

    router.layer(middleware).with_state(app_state)
}

/// Create router without rate limiting
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let router = Router::new()
        .nest("/jobs", job_routes(&app_state))
        .nest("/health", health_routes())
        .route("/metrics", get(metrics_handler));

    with_common_layers(router, app_state)
}

/// Create router with per-IP rate limiting
pub fn create_router_with_rate_limit(app_state: Arc<AppState>, config: RateLimitConfig) -> Router {
    let rate_limit_state = Arc::new(RateLimitState::new(config));
    rate_limit_state.spawn_pruner();

    let jobs = job_routes(&app_state).layer(middleware::from_fn_with_state(
        Arc::clone(&rate_limit_state),
        rate_limit_jobs_middleware,
    ));

    let health = health_routes().layer(middleware::from_fn_with_state(
        Arc::clone(&rate_limit_state),
        rate_limit_health_middleware,
    ));
    let metrics = Router::new()
        .route("/metrics", get(metrics_handler))
        .layer(middleware::from_fn_with_state(
            rate_limit_state,
            rate_limit_health_middleware,
        ));

    let router = Router::new()
        .nest("/jobs", jobs)
        .nest("/health", health)
        .merge(metrics);

    with_common_layers(router, app_state)
}

#[cfg(test)]
mod tests {
    use axum::{
        Router,
        body::Body,
        http::{Request, StatusCode},
        middleware,
        response::IntoResponse,
        routing::get,
    };
    use std::sync::Arc;
    use tower::ServiceExt;

    use super::*;

    mod test_utils {
        use std::sync::Arc;

        use secrecy::SecretString;

        use crate::app::{AppState, ChainClients, JobService};
        use crate::domain::Network;
        use crate::infra::observability::detached_metrics_handle;
        use crate::test_utils::{MockBlockchainClient, MockJobRepository};

        pub const API_KEY: &str = "test-api-key";

        pub fn test_state() -> Arc<AppState> {
            let chains = ChainClients::new(
                Arc::new(MockBlockchainClient::new(Network::Home)),
                Arc::new(MockBlockchainClient::new(Network::Foreign)),
            );
            let service = Arc::new(JobService::new(
                Arc::new(MockJobRepository::new()),
                chains,
                5,
            ));
            Arc::new(AppState::new(
                service,
                SecretString::from(API_KEY),
                detached_metrics_handle(),
            ))
        }
    }

    mod rate_limit_config_tests {
        use super::*;

        #[test]
        fn test_rate_limit_config_default() {
            let config = RateLimitConfig::default();
            assert_eq!(config.general_rps, 10);
            assert_eq!(config.general_burst, 20);
            assert_eq!(config.health_rps, 100);
            assert_eq!(config.health_burst, 100);
            assert_eq!(config.prune_interval, Duration::from_secs(60));
        }

        #[test]
        fn test_zero_rates_do_not_panic() {
            let state = RateLimitState::new(RateLimitConfig {
                general_rps: 0,
                general_burst: 0,
                health_rps: 0,
                health_burst: 0,
                ..Default::default()
            });
            assert!(
                state
                    .jobs_limiter
                    .check_key(&IpAddr::V4(Ipv4Addr::LOCALHOST))
                    .is_ok()
            );
        }
    }

    mod middleware_tests {
        use super::*;
        use http_body_util::BodyExt;

        async fn dummy_handler() -> impl IntoResponse {
            StatusCode::OK
        }

        fn limited_app(config: RateLimitConfig) -> Router {
            let state = Arc::new(RateLimitState::new(config));
            Router::new()
                .route("/", get(dummy_handler))
                .layer(middleware::from_fn_with_state(
                    state,
                    rate_limit_jobs_middleware,
                ))
        }

        fn get_root() -> Request<Body> {
            Request::builder().uri("/").body(Body::empty()).unwrap()
        }

        #[tokio::test]
        async fn test_rate_limit_success_includes_limit_header() {
            let app = limited_app(RateLimitConfig {
                general_rps: 100,
                general_burst: 100,
                ..Default::default()
            });

            let response = app.oneshot(get_root()).await.unwrap();

            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(response.headers().get("X-RateLimit-Limit").unwrap(), "100");
        }

        #[tokio::test]
        async fn test_rate_limit_exceeded_response() {
            let app = limited_app(RateLimitConfig {
                general_rps: 1,
                general_burst: 1,
                ..Default::default()
            });

            // Exhaust the limit
            app.clone().oneshot(get_root()).await.unwrap();
            let response = app.oneshot(get_root()).await.unwrap();

            assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
            assert!(response.headers().contains_key("Retry-After"));
            assert_eq!(
                response.headers().get("X-RateLimit-Remaining").unwrap(),
                "0"
            );

            let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
            let body: RateLimitResponse = serde_json::from_slice(&body_bytes).unwrap();
            assert_eq!(body.error.r#type, "rate_limited");
        }

        #[tokio::test]
        async fn test_rate_limit_is_per_ip() {
            let app = limited_app(RateLimitConfig {
                general_rps: 1,
                general_burst: 1,
                ..Default::default()
            });

            let from = |ip: &str| {
                Request::builder()
                    .uri("/")
                    .header("X-Forwarded-For", ip)
                    .body(Body::empty())
                    .unwrap()
            };

            app.clone().oneshot(from("192.168.1.1")).await.unwrap();
            let blocked = app.clone().oneshot(from("192.168.1.1")).await.unwrap();
            assert_eq!(blocked.status(), StatusCode::TOO_MANY_REQUESTS);

            let other = app.oneshot(from("10.0.0.1")).await.unwrap();
            assert_eq!(other.status(), StatusCode::OK);
        }

        #[tokio::test]
        async fn test_idle_client_buckets_are_pruned() {
            let state = Arc::new(RateLimitState::new(RateLimitConfig {
                general_rps: 1000,
                general_burst: 1,
                prune_interval: Duration::from_millis(20),
                ..Default::default()
            }));
            for last in 1..=50u8 {
                let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, last));
                assert!(state.jobs_limiter.check_key(&ip).is_ok());
            }
            assert_eq!(state.tracked_clients(), 50);

            let pruner = state.spawn_pruner();
            tokio::time::sleep(Duration::from_millis(200)).await;
            assert_eq!(state.tracked_clients(), 0);

            drop(state);
            tokio::time::timeout(Duration::from_secs(1), pruner)
                .await
                .expect("pruner stops once the limiter is dropped")
                .unwrap();
        }

        #[tokio::test]
        async fn test_health_rate_limit_eventually_blocks() {
            let state = Arc::new(RateLimitState::new(RateLimitConfig {
                health_rps: 1,
                health_burst: 1,
                ..Default::default()
            }));
            let app = Router::new()
                .route("/", get(dummy_handler))
                .layer(middleware::from_fn_with_state(
                    state,
                    rate_limit_health_middleware,
                ));

            let first = app.clone().oneshot(get_root()).await.unwrap();
            assert_eq!(first.status(), StatusCode::OK);

            let second = app.oneshot(get_root()).await.unwrap();
            assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
            assert!(second.headers().contains_key("Retry-After"));
        }

        #[test]
        fn test_client_ip_prefers_forwarded_header() {
            let request = Request::builder()
                .header("X-Forwarded-For", "203.0.113.7, 10.0.0.1")
                .header("X-Real-IP", "198.51.100.2")
                .body(())
                .unwrap();
            assert_eq!(
                client_ip_from_request(&request),
                "203.0.113.7".parse::<IpAddr>().unwrap()
            );

            let request = Request::builder().body(()).unwrap();
            assert_eq!(
                client_ip_from_request(&request),
                IpAddr::V4(Ipv4Addr::UNSPECIFIED)
            );
        }
    }

    mod router_tests {
        use super::test_utils::{API_KEY, test_state};
        use super::*;

        fn get(uri: &str) -> Request<Body> {
            Request::builder().uri(uri).body(Body::empty()).unwrap()
        }

        #[tokio::test]
        async fn test_router_health_endpoints() {
            let router = create_router(test_state());

            for uri in ["/health", "/health/live", "/health/ready", "/metrics"] {
                let res = router.clone().oneshot(get(uri)).await.unwrap();
                assert_eq!(res.status(), StatusCode::OK, "{uri}");
            }
        }

        #[tokio::test]
        async fn test_router_get_missing_job() {
            let router = create_router(test_state());

            let res = router.oneshot(get("/jobs/nonexistent-id")).await.unwrap();
            assert_eq!(res.status(), StatusCode::NOT_FOUND);
        }

        #[tokio::test]
        async fn test_router_post_requires_api_key() {
            let router = create_router(test_state());

            let request = Request::builder()
                .method("POST")
                .uri("/jobs/some-id/retry")
                .body(Body::empty())
                .unwrap();
            let res = router.clone().oneshot(request).await.unwrap();
            assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

            let request = Request::builder()
                .method("POST")
                .uri("/jobs/some-id/retry")
                .header("x-api-key", API_KEY)
                .body(Body::empty())
                .unwrap();
            let res = router.oneshot(request).await.unwrap();
            assert_eq!(res.status(), StatusCode::NOT_FOUND);
        }

        #[tokio::test]
        async fn test_router_with_rate_limit_routes_accessible() {
            let router = create_router_with_rate_limit(test_state(), RateLimitConfig::default());

            let res = router.clone().oneshot(get("/health/live")).await.unwrap();
            assert_eq!(res.status(), StatusCode::OK);

            let res = router.oneshot(get("/jobs/test-id")).await.unwrap();
            assert_eq!(res.status(), StatusCode::NOT_FOUND);
            assert!(res.headers().contains_key("X-RateLimit-Limit"));
        }

        #[tokio::test]
        async fn test_router_with_rate_limit_applies_limits() {
            let config = RateLimitConfig {
                general_rps: 1,
                general_burst: 1,
                ..Default::default()
            };
            let router = create_router_with_rate_limit(test_state(), config);

            let first = router.clone().oneshot(get("/jobs/test")).await.unwrap();
            assert_eq!(first.status(), StatusCode::NOT_FOUND);

            let second = router.clone().oneshot(get("/jobs/test")).await.unwrap();
            assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);

            // Health has its own bucket
            let health = router.oneshot(get("/health/live")).await.unwrap();
            assert_eq!(health.status(), StatusCode::OK);
        }
    }
}
