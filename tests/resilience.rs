//! Rate limiting, retry, and circuit breaking through the full chain.
mod common;

use common::{ScriptedUpstream, Step, TestGateway, route, route_with_fast_retry};
use http::StatusCode;
use neuragate::config::models::FilterDef;

#[tokio::test(flavor = "multi_thread")]
async fn rate_limit_trip_rejects_the_burst_overflow() {
    let upstream = ScriptedUpstream::always(200);
    let gateway = TestGateway::new(upstream.clone());

    // Defaults: replenish 10/s, burst 20, keyed by client IP.
    let mut def = route("inv", "/inventory/**", 1);
    def.metadata
        .insert("rate-limit-enabled".to_string(), "true".to_string());
    gateway.install(&def).await;

    let mut rejected = 0;
    for _ in 0..25 {
        let response = gateway.get("/inventory/1").await;
        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            rejected += 1;
            assert_eq!(response.headers().get("X-RateLimit-Remaining").unwrap(), "0");
            assert_eq!(
                response.headers().get("X-RateLimit-Replenish-Rate").unwrap(),
                "10"
            );
            assert_eq!(
                response.headers().get("X-RateLimit-Burst-Capacity").unwrap(),
                "20"
            );
        }
    }
    assert!(rejected >= 5, "expected at least 5 rejections, got {rejected}");

    // Rejections skipped the whole downstream chain.
    assert_eq!(upstream.request_count(), 25 - rejected);

    let events = gateway.telemetry_events().await;
    let limited = events.iter().filter(|e| e["rateLimited"] == true).count();
    assert_eq!(limited, rejected);
}

#[tokio::test(flavor = "multi_thread")]
async fn retry_recovers_from_a_transient_transport_error() {
    let upstream = ScriptedUpstream::script(vec![Step::Transport], Step::Status(200));
    let gateway = TestGateway::new(upstream.clone());
    gateway
        .install(&route_with_fast_retry("inv", "/inventory/**", 3))
        .await;

    let started = std::time::Instant::now();
    let response = gateway.get("/inventory/1").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(started.elapsed() < std::time::Duration::from_secs(1));

    // One failed attempt, one successful retry.
    assert_eq!(upstream.request_count(), 2);

    let events = gateway.telemetry_events().await;
    assert_eq!(events[0]["retryCount"], 1);
    assert_eq!(events[0]["status"], 200);
}

#[tokio::test(flavor = "multi_thread")]
async fn exhausted_retries_surface_a_bad_gateway() {
    let upstream = ScriptedUpstream::script(
        vec![Step::Transport, Step::Transport, Step::Transport, Step::Transport],
        Step::Status(200),
    );
    let gateway = TestGateway::new(upstream.clone());
    gateway
        .install(&route_with_fast_retry("inv", "/inventory/**", 3))
        .await;

    let response = gateway.get("/inventory/1").await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    // 1 initial + 3 retries, all failed.
    assert_eq!(upstream.request_count(), 4);

    let events = gateway.telemetry_events().await;
    assert_eq!(events[0]["retryCount"], 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn breaker_trip_short_circuits_to_the_fallback() {
    let upstream = ScriptedUpstream::always(503);
    let gateway = TestGateway::new(upstream.clone());

    // No retries so each request records exactly one breaker outcome.
    let mut def = route("flaky", "/flaky/**", 1);
    def.filters
        .push(FilterDef::new("Retry").arg("retries", "0"));
    gateway.install(&def).await;

    // dynamicRoute defaults: 60% over 15, min 5. Fifteen straight
    // failures leave the breaker open well before the 16th call.
    for _ in 0..15 {
        let response = gateway.get("/flaky/x").await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
    let contacted_before = upstream.request_count();
    assert!(contacted_before >= 5);

    // The 16th answer comes from /fallback/message without touching
    // the upstream.
    let response = gateway.get("/flaky/x").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(upstream.request_count(), contacted_before);

    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["reason"], "Circuit breaker is open due to high failure rate");

    let events = gateway.telemetry_events().await;
    let last = events.last().unwrap();
    assert_eq!(last["circuitBreakerTriggered"], true);
}

#[tokio::test(flavor = "multi_thread")]
async fn upstream_4xx_neither_retries_nor_counts_against_the_breaker() {
    let upstream = ScriptedUpstream::always(404);
    let gateway = TestGateway::new(upstream.clone());
    gateway
        .install(&route_with_fast_retry("inv", "/inventory/**", 3))
        .await;

    for _ in 0..20 {
        let response = gateway.get("/inventory/1").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    // One attempt per request: no retries, no short-circuits.
    assert_eq!(upstream.request_count(), 20);

    let states = gateway.breakers.states().await;
    assert!(states
        .iter()
        .all(|(_, s)| *s == neuragate::core::BreakerState::Closed));
}

#[tokio::test(flavor = "multi_thread")]
async fn named_breaker_uses_its_configured_fallback() {
    let upstream = ScriptedUpstream::always(502);
    let gateway = TestGateway::new(upstream.clone());

    let mut def = route("backend", "/backend/**", 1);
    def.filters
        .push(FilterDef::new("Retry").arg("retries", "0"));
    def.filters.push(
        FilterDef::new("CircuitBreaker")
            .arg("name", "backendService")
            .arg("fallbackUri", "forward:/fallback/backend"),
    );
    gateway.install(&def).await;

    // backendService: 50% over 10, min 5.
    for _ in 0..10 {
        gateway.get("/backend/x").await;
    }
    let response = gateway.get("/backend/x").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["service"], "backend");
}
