//! HTTP middleware for the API layer.

use axum::{
    body::Body,
    extract::State,
    http::{Method, Request, Response},
    middleware::Next,
    response::IntoResponse,
};
use secrecy::ExposeSecret;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::warn;

use crate::app::AppState;
use crate::domain::AppError;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Constant-time comparison of two byte slices.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// Whether `provided` matches the configured key. Both sides are hashed
/// first so the comparison does not leak the key length.
fn key_matches(expected: &str, provided: &str) -> bool {
    let expected_hash = Sha256::digest(expected.as_bytes());
    let provided_hash = Sha256::digest(provided.as_bytes());
    constant_time_eq(expected_hash.as_slice(), provided_hash.as_slice())
}

/// API key authentication.
///
/// Requests that change jobs (POST) must carry the configured key in
/// `x-api-key`. Reads pass through.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response<Body> {
    if request.method() != Method::POST {
        return next.run(request).await;
    }

    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());

    let Some(provided) = provided else {
        warn!(path = %request.uri().path(), "API auth failed: missing x-api-key header");
        return AppError::Authentication("missing x-api-key header".to_string()).into_response();
    };

    if !key_matches(state.api_auth_key.expose_secret(), provided) {
        warn!(path = %request.uri().path(), "API auth failed: invalid x-api-key");
        return AppError::Authentication("invalid API key".to_string()).into_response();
    }

    next.run(request).await
}
