//! Lightweight metrics helpers for NeuraGate.
//!
//! This module exposes a small set of convenience functions wrapping
//! the `metrics` crate macros. It intentionally avoids embedding a
//! concrete exporter (the application can initialize any compatible
//! recorder externally) while still documenting and describing the
//! gateway-specific metric names.
//!
//! Provided metrics (labels vary by family):
//! * `neuragate_requests_total` (counter)
//! * `neuragate_request_duration_seconds` (histogram)
//! * `neuragate_upstream_requests_total` (counter)
//! * `neuragate_rate_limited_total` (counter per route)
//! * `neuragate_retries_total` (counter per route)
//! * `neuragate_breaker_state` (gauge per breaker: 0 closed, 1 open, 2 half-open)
//! * `neuragate_breaker_short_circuits_total` (counter per breaker)
//! * `neuragate_telemetry_dropped_total` (counter)
//! * `neuragate_telemetry_published_total` (counter)
//! * `neuragate_active_requests` (gauge)
use metrics::{Unit, counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use once_cell::sync::Lazy;

pub const REQUESTS_TOTAL: &str = "neuragate_requests_total";
pub const REQUEST_DURATION_SECONDS: &str = "neuragate_request_duration_seconds";
pub const UPSTREAM_REQUESTS_TOTAL: &str = "neuragate_upstream_requests_total";
pub const RATE_LIMITED_TOTAL: &str = "neuragate_rate_limited_total";
pub const RETRIES_TOTAL: &str = "neuragate_retries_total";
pub const BREAKER_STATE: &str = "neuragate_breaker_state";
pub const BREAKER_SHORT_CIRCUITS_TOTAL: &str = "neuragate_breaker_short_circuits_total";
pub const TELEMETRY_DROPPED_TOTAL: &str = "neuragate_telemetry_dropped_total";
pub const TELEMETRY_PUBLISHED_TOTAL: &str = "neuragate_telemetry_published_total";
pub const ACTIVE_REQUESTS: &str = "neuragate_active_requests";

static DESCRIPTIONS: Lazy<()> = Lazy::new(|| {
    describe_counter!(
        REQUESTS_TOTAL,
        Unit::Count,
        "Total number of HTTP requests processed by the gateway."
    );
    describe_histogram!(
        REQUEST_DURATION_SECONDS,
        Unit::Seconds,
        "Latency of HTTP requests processed by the gateway."
    );
    describe_counter!(
        UPSTREAM_REQUESTS_TOTAL,
        Unit::Count,
        "Total number of HTTP requests forwarded to upstream services."
    );
    describe_counter!(
        RATE_LIMITED_TOTAL,
        Unit::Count,
        "Requests rejected by the token-bucket rate limiter."
    );
    describe_counter!(
        RETRIES_TOTAL,
        Unit::Count,
        "Upstream attempts re-issued by the retry filter."
    );
    describe_gauge!(
        BREAKER_STATE,
        "Circuit breaker state per name (0 closed, 1 open, 2 half-open)."
    );
    describe_counter!(
        BREAKER_SHORT_CIRCUITS_TOTAL,
        Unit::Count,
        "Calls short-circuited to a fallback by an open breaker."
    );
    describe_counter!(
        TELEMETRY_DROPPED_TOTAL,
        Unit::Count,
        "Telemetry events dropped because the in-process queue was full."
    );
    describe_counter!(
        TELEMETRY_PUBLISHED_TOTAL,
        Unit::Count,
        "Telemetry records delivered to the bus."
    );
    describe_gauge!(
        ACTIVE_REQUESTS,
        "Number of requests currently in flight."
    );
});

/// Initialize metric descriptions (idempotent).
pub fn init_metrics() {
    Lazy::force(&DESCRIPTIONS);
    tracing::info!("metrics descriptions registered");
}

/// Count one completed inbound request.
pub fn increment_request_total(route_id: &str, method: &str, status: u16) {
    counter!(
        REQUESTS_TOTAL,
        "route" => route_id.to_string(),
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a completed inbound request's duration.
pub fn record_request_duration(route_id: &str, method: &str, duration: std::time::Duration) {
    histogram!(
        REQUEST_DURATION_SECONDS,
        "route" => route_id.to_string(),
        "method" => method.to_string()
    )
    .record(duration.as_secs_f64());
}

pub fn increment_upstream_request(route_id: &str, status: u16) {
    counter!(
        UPSTREAM_REQUESTS_TOTAL,
        "route" => route_id.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn increment_rate_limited(route_id: &str) {
    counter!(RATE_LIMITED_TOTAL, "route" => route_id.to_string()).increment(1);
}

pub fn increment_retries(route_id: &str) {
    counter!(RETRIES_TOTAL, "route" => route_id.to_string()).increment(1);
}

pub fn set_breaker_state(breaker: &str, state: u8) {
    gauge!(BREAKER_STATE, "breaker" => breaker.to_string()).set(state as f64);
}

pub fn increment_breaker_short_circuit(breaker: &str) {
    counter!(BREAKER_SHORT_CIRCUITS_TOTAL, "breaker" => breaker.to_string()).increment(1);
}

pub fn increment_telemetry_dropped() {
    counter!(TELEMETRY_DROPPED_TOTAL).increment(1);
}

pub fn increment_telemetry_published() {
    counter!(TELEMETRY_PUBLISHED_TOTAL).increment(1);
}

pub fn set_active_requests(count: usize) {
    gauge!(ACTIVE_REQUESTS).set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init_metrics();
        init_metrics();
    }

    #[test]
    fn recording_without_an_exporter_is_a_no_op() {
        increment_request_total("inv", "GET", 200);
        record_request_duration("inv", "GET", std::time::Duration::from_millis(3));
        increment_rate_limited("inv");
        increment_retries("inv");
        set_breaker_state("dynamicRoute", 1);
        increment_breaker_short_circuit("dynamicRoute");
        increment_telemetry_dropped();
        increment_telemetry_published();
        set_active_requests(4);
    }
}
