//! Bearer token middleware for the protocol endpoint

use std::sync::Arc;

use axum::{
    Json,
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use secrecy::ExposeSecret;
use sha2::{Digest, Sha256};

use super::ApiState;

/// Extract the bearer token from the Authorization header
fn extract_bearer(req: &Request) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Reject requests without the configured bearer token
///
/// When no token is configured every request passes.
pub async fn require_bearer(
    State(state): State<Arc<ApiState>>,
    req: Request,
    next: Next,
) -> Response {
    let Some(expected) = &state.bearer_token else {
        return next.run(req).await;
    };

    match extract_bearer(&req) {
        Some(provided) if tokens_match(expected.expose_secret(), provided) => next.run(req).await,
        Some(_) => {
            tracing::warn!("invalid bearer token");
            unauthorized()
        }
        None => {
            tracing::debug!("no bearer token provided");
            unauthorized()
        }
    }
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({ "error": "Unauthorized" })),
    )
        .into_response()
}

/// Compare tokens without leaking their contents or length through timing
fn tokens_match(expected: &str, provided: &str) -> bool {
    let expected = Sha256::digest(expected.as_bytes());
    let provided = Sha256::digest(provided.as_bytes());
    constant_time_eq(&expected, &provided)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn extract_bearer_token() {
        let mut req = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(extract_bearer(&req), None);

        req.headers_mut()
            .insert("authorization", HeaderValue::from_static("Bearer s3cret"));
        assert_eq!(extract_bearer(&req), Some("s3cret"));

        req.headers_mut()
            .insert("authorization", HeaderValue::from_static("Basic s3cret"));
        assert_eq!(extract_bearer(&req), None);
    }

    #[test]
    fn token_comparison() {
        assert!(tokens_match("s3cret", "s3cret"));
        assert!(!tokens_match("s3cret", "s3cre"));
        assert!(!tokens_match("s3cret", "S3cret"));
        assert!(!tokens_match("s3cret", ""));
    }
}
