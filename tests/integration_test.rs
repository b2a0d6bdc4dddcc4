//! Integration tests for the HTTP API.

mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use serde_json::json;

use common::{API_KEY, OWNER, harness, json_body};
use wallet_jobs::domain::{
    ErrorResponse, HealthResponse, HealthStatus, Job, JobName, JobRepository, JobStatus,
    PaginatedResponse,
};

fn create_wallet_request(salt: &str) -> serde_json::Value {
    json!({
        "name": "createWallet",
        "data": { "owner": OWNER, "salt": salt },
    })
}

#[tokio::test]
async fn test_enqueue_job_success() {
    let h = harness();

    let response = h.post("/jobs", create_wallet_request("1")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let job: Job = json_body(response).await;
    assert_eq!(job.name, JobName::CreateWallet);
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.max_attempts, 3);
    assert_eq!(job.data["salt"], "1");
}

#[tokio::test]
async fn test_enqueue_requires_api_key() {
    let h = harness();

    let request = Request::builder()
        .method("POST")
        .uri("/jobs")
        .header("content-type", "application/json")
        .body(Body::from(create_wallet_request("1").to_string()))
        .unwrap();
    let response = h.send(request).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .method("POST")
        .uri("/jobs")
        .header("content-type", "application/json")
        .header("x-api-key", format!("{API_KEY}-wrong"))
        .body(Body::from(create_wallet_request("1").to_string()))
        .unwrap();
    let response = h.send(request).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let body: ErrorResponse = json_body(response).await;
    assert_eq!(body.error.r#type, "authentication_error");
    assert!(h.jobs.all_jobs().is_empty());
}

#[tokio::test]
async fn test_enqueue_duplicate_idempotency_key() {
    let h = harness();
    let mut request = create_wallet_request("1");
    request["idempotencyKey"] = json!("owner-0x11");

    let first: Job = json_body(h.post("/jobs", request.clone()).await).await;
    let second: Job = json_body(h.post("/jobs", request).await).await;

    assert_eq!(first.id, second.id);
    assert_eq!(h.jobs.all_jobs().len(), 1);
}

#[tokio::test]
async fn test_enqueue_invalid_params() {
    let h = harness();

    let response = h
        .post(
            "/jobs",
            json!({ "name": "fundToken", "data": { "identifier": "+1555" } }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body: ErrorResponse = json_body(response).await;
    assert_eq!(body.error.r#type, "invalid_params");
}

#[tokio::test]
async fn test_enqueue_validation_error() {
    let h = harness();
    let mut request = create_wallet_request("1");
    request["maxAttempts"] = json!(100);

    let response = h.post("/jobs", request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body: ErrorResponse = json_body(response).await;
    assert_eq!(body.error.r#type, "validation_error");
}

#[tokio::test]
async fn test_enqueue_unknown_job_name() {
    let h = harness();

    let response = h
        .post("/jobs", json!({ "name": "mintNft", "data": {} }))
        .await;
    assert!(response.status().is_client_error());
    assert!(h.jobs.all_jobs().is_empty());
}

#[tokio::test]
async fn test_get_job() {
    let h = harness();
    let created: Job = json_body(h.post("/jobs", create_wallet_request("1")).await).await;

    let response = h.get(&format!("/jobs/{}", created.id)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let fetched: Job = json_body(response).await;
    assert_eq!(fetched.id, created.id);

    let missing = h.get("/jobs/does-not-exist").await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    let body: ErrorResponse = json_body(missing).await;
    assert_eq!(body.error.r#type, "not_found");
}

#[tokio::test]
async fn test_list_jobs_pagination_and_filter() {
    let h = harness();
    for salt in ["1", "2", "3"] {
        h.post("/jobs", create_wallet_request(salt)).await;
    }
    let first_id = h.jobs.all_jobs()[0].id.clone();
    h.jobs.mark_failed(&first_id, "boom");

    let page: PaginatedResponse<Job> = json_body(h.get("/jobs?limit=2").await).await;
    assert_eq!(page.items.len(), 2);
    assert!(page.has_more);
    // Newest first
    assert_eq!(page.items[0].data["salt"], "3");

    let cursor = page.next_cursor.unwrap();
    let rest: PaginatedResponse<Job> =
        json_body(h.get(&format!("/jobs?limit=2&cursor={cursor}")).await).await;
    assert_eq!(rest.items.len(), 1);
    assert!(!rest.has_more);

    let failed: PaginatedResponse<Job> = json_body(h.get("/jobs?status=failed").await).await;
    assert_eq!(failed.items.len(), 1);
    assert_eq!(failed.items[0].id, first_id);
}

#[tokio::test]
async fn test_retry_endpoint() {
    let h = harness();
    let job: Job = json_body(h.post("/jobs", create_wallet_request("1")).await).await;

    // Pending jobs cannot be retried
    let response = h.post(&format!("/jobs/{}/retry", job.id), json!({})).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    h.jobs.mark_failed(&job.id, "boom");
    let response = h.post(&format!("/jobs/{}/retry", job.id), json!({})).await;
    assert_eq!(response.status(), StatusCode::OK);
    let retried: Job = json_body(response).await;
    assert_eq!(retried.status, JobStatus::Pending);
    assert_eq!(retried.attempts, 0);

    let response = h.post("/jobs/missing/retry", json!({})).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health_endpoints() {
    let h = harness();

    let health: HealthResponse = json_body(h.get("/health").await).await;
    assert_eq!(health.status, HealthStatus::Healthy);

    h.foreign.set_healthy(false);
    let health: HealthResponse = json_body(h.get("/health").await).await;
    assert_eq!(health.status, HealthStatus::Degraded);
    assert_eq!(h.get("/health/ready").await.status(), StatusCode::OK);

    h.jobs.set_healthy(false);
    assert_eq!(
        h.get("/health/ready").await.status(),
        StatusCode::SERVICE_UNAVAILABLE
    );
    assert_eq!(h.get("/health/live").await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let h = harness();

    let response = h.get("/metrics").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("text/plain")
    );
}
