//! The fallback router.
//!
//! Three local endpoints serve degraded responses when a circuit
//! breaker opens. They answer synchronously and unconditionally with
//! 503 and never touch an upstream. The same response builders back
//! both the HTTP surface and the in-process short-circuit taken when a
//! breaker rejects a call mid-chain.
use axum::{
    Json, Router,
    body::Body,
    http::{Response, StatusCode},
    response::IntoResponse,
    routing::get,
};
use chrono::Utc;
use serde_json::{Value, json};

pub const FALLBACK_MESSAGE: &str = "/fallback/message";
pub const FALLBACK_BACKEND: &str = "/fallback/backend";
pub const FALLBACK_CRITICAL: &str = "/fallback/critical";

fn message_body() -> Value {
    json!({
        "status": "degraded",
        "message": "Service temporarily unavailable. Please try again later.",
        "timestamp": Utc::now().to_rfc3339(),
        "reason": "Circuit breaker is open due to high failure rate",
    })
}

fn backend_body() -> Value {
    json!({
        "status": "degraded",
        "message": "Backend service is currently experiencing issues. \
                    Using cached data or degraded functionality.",
        "timestamp": Utc::now().to_rfc3339(),
        "service": "backend",
        "action": "Circuit breaker protection active",
    })
}

fn critical_body() -> Value {
    json!({
        "status": "critical_degraded",
        "message": "A critical service is temporarily unavailable. Our team has been notified.",
        "timestamp": Utc::now().to_rfc3339(),
        "service": "critical",
        "action": "Automatic recovery in progress",
    })
}

/// Body for a given fallback path; unknown paths get the generic one.
pub fn body_for(path: &str) -> Value {
    match path {
        FALLBACK_BACKEND => backend_body(),
        FALLBACK_CRITICAL => critical_body(),
        _ => message_body(),
    }
}

/// The 503 response a breaker short-circuit is answered with.
pub fn response_for(path: &str) -> Response<Body> {
    let body = body_for(path);
    Response::builder()
        .status(StatusCode::SERVICE_UNAVAILABLE)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

async fn fallback_message() -> impl IntoResponse {
    tracing::warn!("circuit breaker fallback activated, service temporarily unavailable");
    (StatusCode::SERVICE_UNAVAILABLE, Json(message_body()))
}

async fn fallback_backend() -> impl IntoResponse {
    tracing::warn!("backend service circuit breaker activated");
    (StatusCode::SERVICE_UNAVAILABLE, Json(backend_body()))
}

async fn fallback_critical() -> impl IntoResponse {
    tracing::error!("critical service circuit breaker activated, immediate attention required");
    (StatusCode::SERVICE_UNAVAILABLE, Json(critical_body()))
}

pub fn router() -> Router {
    Router::new()
        .route(FALLBACK_MESSAGE, get(fallback_message))
        .route(FALLBACK_BACKEND, get(fallback_backend))
        .route(FALLBACK_CRITICAL, get(fallback_critical))
}
