//! Per-request telemetry capture.
//!
//! Wraps the whole filter chain: wall-clock timestamp on entry, a
//! monotonic latency measurement on exit, and the resilience flags
//! pulled from the request context. A status is synthesized even on
//! error paths, so every request produces exactly one event.
use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::{core::filter::RequestContext, telemetry::event::TelemetryEvent};

pub struct TelemetryCapture {
    started: Instant,
    timestamp: DateTime<Utc>,
    path: String,
    method: String,
}

impl TelemetryCapture {
    /// Call on request entry, before any filter runs.
    pub fn begin(method: &http::Method, path: &str) -> Self {
        Self {
            started: Instant::now(),
            timestamp: Utc::now(),
            path: path.to_string(),
            method: method.to_string(),
        }
    }

    /// Call once the response (or the synthesized error response) is
    /// known. The handoff to the publisher must not block.
    pub fn finish(
        self,
        ctx: &RequestContext,
        route_id: Option<&str>,
        status: u16,
        error: Option<String>,
    ) -> TelemetryEvent {
        TelemetryEvent {
            route_id: route_id.map(str::to_string),
            path: self.path,
            method: self.method,
            status: Some(status),
            latency_ms: self.started.elapsed().as_millis() as u64,
            timestamp: self.timestamp,
            correlation_id: ctx.correlation_id.clone(),
            client_ip: ctx.client_ip.clone(),
            user_agent: ctx.user_agent.clone(),
            rate_limited: ctx.rate_limited(),
            circuit_breaker_triggered: ctx.breaker_triggered(),
            retry_count: ctx.retry_count(),
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn ctx() -> RequestContext {
        RequestContext::new(
            "cid-1",
            "10.0.0.9",
            Instant::now() + Duration::from_secs(30),
        )
    }

    #[test]
    fn captures_context_flags_and_counters() {
        let capture = TelemetryCapture::begin(&http::Method::GET, "/inventory/1");
        let ctx = ctx();
        ctx.record_retry();
        ctx.mark_rate_limited();

        let event = capture.finish(&ctx, Some("inv"), 429, None);
        assert_eq!(event.route_id.as_deref(), Some("inv"));
        assert_eq!(event.path, "/inventory/1");
        assert_eq!(event.method, "GET");
        assert_eq!(event.status, Some(429));
        assert_eq!(event.correlation_id, "cid-1");
        assert_eq!(event.client_ip, "10.0.0.9");
        assert!(event.rate_limited);
        assert!(!event.circuit_breaker_triggered);
        assert_eq!(event.retry_count, 1);
    }

    #[test]
    fn latency_is_monotonic_and_non_negative() {
        let capture = TelemetryCapture::begin(&http::Method::GET, "/x");
        std::thread::sleep(Duration::from_millis(5));
        let event = capture.finish(&ctx(), None, 200, None);
        assert!(event.latency_ms >= 5);
    }

    #[test]
    fn error_paths_still_produce_an_event() {
        let capture = TelemetryCapture::begin(&http::Method::POST, "/orders");
        let event = capture.finish(&ctx(), Some("orders"), 500, Some("boom".into()));
        assert_eq!(event.status, Some(500));
        assert_eq!(event.error.as_deref(), Some("boom"));
        assert!(event.is_error());
    }
}
