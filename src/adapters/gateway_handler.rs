//! The gateway request surface.
//!
//! One request flows: correlation id -> telemetry begin -> route
//! resolution -> filter chain (or error mapping) -> telemetry end ->
//! non-blocking publish. The resolved `CompiledRoute` is held for the
//! whole request, so a snapshot swap mid-flight never changes the
//! chain under a request. Errors never escape this handler: every
//! failure maps to a concrete HTTP response carrying the correlation
//! id.
use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::body::Body;
use http::{HeaderValue, Request, Response, StatusCode, header};
use tracing::Instrument;
use uuid::Uuid;

use crate::{
    adapters::fallback,
    core::{
        error::GatewayError,
        filter::{GatewayRequest, RequestContext},
        resolver::RouteResolver,
    },
    metrics as gw_metrics,
    telemetry::{TelemetryCapture, TelemetryPublisher},
    tracing_setup,
    utils::RequestTracker,
};

pub const CORRELATION_HEADER: &str = "X-Correlation-ID";

/// Prefixes owned by local surfaces; never routed to an upstream.
pub const RESERVED_PREFIXES: &[&str] = &["/admin", "/fallback", "/actuator", "/auth", "/dashboard"];

pub fn is_reserved(path: &str) -> bool {
    RESERVED_PREFIXES
        .iter()
        .any(|prefix| path == *prefix || path.starts_with(&format!("{prefix}/")))
}

pub struct GatewayHandler {
    resolver: Arc<RouteResolver>,
    publisher: TelemetryPublisher,
    tracker: Arc<RequestTracker>,
    deadline: Duration,
    max_body_bytes: usize,
}

impl GatewayHandler {
    pub fn new(
        resolver: Arc<RouteResolver>,
        publisher: TelemetryPublisher,
        tracker: Arc<RequestTracker>,
        deadline: Duration,
        max_body_bytes: usize,
    ) -> Self {
        Self {
            resolver,
            publisher,
            tracker,
            deadline,
            max_body_bytes,
        }
    }

    /// Handle one data-plane request end to end.
    pub async fn handle_request(
        &self,
        req: Request<Body>,
        client_addr: Option<SocketAddr>,
    ) -> Response<Body> {
        let _guard = self.tracker.track();

        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let query = req.uri().query().map(str::to_string);

        let correlation_id = req
            .headers()
            .get(CORRELATION_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let client_ip = client_addr
            .map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string());

        let span = tracing_setup::create_request_span(
            method.as_str(),
            &path,
            &correlation_id,
            Some(&client_ip),
        );

        let mut response = self
            .serve(req, method.as_str(), &path, query, &correlation_id, &client_ip)
            .instrument(span.clone())
            .await;

        if let Ok(value) = HeaderValue::from_str(&correlation_id) {
            response.headers_mut().insert(CORRELATION_HEADER, value);
        }
        span.record("http.status_code", response.status().as_u16());
        response
    }

    async fn serve(
        &self,
        req: Request<Body>,
        method: &str,
        path: &str,
        query: Option<String>,
        correlation_id: &str,
        client_ip: &str,
    ) -> Response<Body> {
        let capture = TelemetryCapture::begin(req.method(), path);

        let mut ctx = RequestContext::new(
            correlation_id,
            client_ip,
            std::time::Instant::now() + self.deadline,
        );
        ctx.user_agent = req
            .headers()
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let Some(route) = self.resolver.resolve(path) else {
            tracing::debug!("no route matched");
            let response = self.error_response(&GatewayError::NoRoute, correlation_id);
            self.finish(capture, &ctx, None, method, response.status(), None);
            return response;
        };

        let route_id = route.id().to_string();
        tracing::debug!(route_id = %route_id, "route resolved");

        let (parts, body) = req.into_parts();
        let body = match axum::body::to_bytes(body, self.max_body_bytes).await {
            Ok(bytes) => bytes,
            Err(error) => {
                tracing::warn!(error = %error, "failed to buffer request body");
                let response = self.synthesized(
                    StatusCode::PAYLOAD_TOO_LARGE,
                    "request body too large",
                    correlation_id,
                );
                self.finish(
                    capture,
                    &ctx,
                    Some(&route_id),
                    method,
                    response.status(),
                    Some(error.to_string()),
                );
                return response;
            }
        };

        let mut headers = parts.headers;
        if let Ok(value) = HeaderValue::from_str(correlation_id) {
            headers.insert(CORRELATION_HEADER, value);
        }

        let gateway_request = GatewayRequest {
            method: parts.method,
            path: path.to_string(),
            query,
            headers,
            body,
        };

        let outcome = tokio::time::timeout(self.deadline, route.handle(gateway_request, &ctx))
            .await
            .unwrap_or(Err(GatewayError::DeadlineExceeded));

        let (response, error) = match outcome {
            Ok(response) => (response, None),
            Err(error) => {
                let message = error.to_string();
                (self.error_response(&error, correlation_id), Some(message))
            }
        };

        self.finish(
            capture,
            &ctx,
            Some(&route_id),
            method,
            response.status(),
            error,
        );
        response
    }

    /// Record metrics and hand the event off without blocking the
    /// response write.
    fn finish(
        &self,
        capture: TelemetryCapture,
        ctx: &RequestContext,
        route_id: Option<&str>,
        method: &str,
        status: StatusCode,
        error: Option<String>,
    ) {
        let event = capture.finish(ctx, route_id, status.as_u16(), error);

        gw_metrics::increment_request_total(route_id.unwrap_or("none"), method, status.as_u16());
        gw_metrics::record_request_duration(
            route_id.unwrap_or("none"),
            method,
            Duration::from_millis(event.latency_ms),
        );
        tracing::info!(
            status = status.as_u16(),
            latency_ms = event.latency_ms,
            retry_count = event.retry_count,
            rate_limited = event.rate_limited,
            breaker = event.circuit_breaker_triggered,
            "request completed"
        );
        self.publisher.publish_event(event);
    }

    fn error_response(&self, error: &GatewayError, correlation_id: &str) -> Response<Body> {
        match error {
            // A breaker short-circuit is served from the local fallback
            // surface, not as a bare error.
            GatewayError::BreakerOpen { fallback: path, .. } => fallback::response_for(path),
            GatewayError::NoRoute => {
                self.synthesized(StatusCode::NOT_FOUND, "No route matched", correlation_id)
            }
            GatewayError::Transport(message) => {
                tracing::warn!(correlation.id = correlation_id, %message, "upstream failure");
                self.synthesized(StatusCode::BAD_GATEWAY, "Upstream request failed", correlation_id)
            }
            GatewayError::DeadlineExceeded => self.synthesized(
                StatusCode::GATEWAY_TIMEOUT,
                "Request deadline exceeded",
                correlation_id,
            ),
            GatewayError::Internal(message) => {
                tracing::error!(correlation.id = correlation_id, %message, "internal error");
                self.synthesized(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal gateway error",
                    correlation_id,
                )
            }
        }
    }

    fn synthesized(
        &self,
        status: StatusCode,
        message: &str,
        correlation_id: &str,
    ) -> Response<Body> {
        let body = serde_json::json!({
            "status": status.as_u16(),
            "message": message,
            "correlationId": correlation_id,
        });
        Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap_or_else(|_| Response::new(Body::empty()))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::{
        adapters::memory::MemoryBus,
        config::models::{PredicateDef, RouteDefinition, TelemetryConfig},
        core::{
            filter::test_support::StaticSink,
            route::{CompiledRoute, PathMatcher, RouteSnapshot},
        },
    };

    fn compiled(id: &str, pattern: &str, status: StatusCode) -> Arc<CompiledRoute> {
        let def = RouteDefinition {
            id: id.into(),
            uri: "http://upstream:9001".into(),
            predicates: vec![PredicateDef::path(pattern)],
            filters: vec![],
            order: 0,
            metadata: HashMap::new(),
            enabled: true,
        };
        Arc::new(CompiledRoute::new(
            def,
            vec![PathMatcher::new(pattern)],
            vec![],
            Arc::new(StaticSink::new(status)),
        ))
    }

    fn handler(routes: Vec<Arc<CompiledRoute>>) -> (GatewayHandler, Arc<MemoryBus>) {
        let resolver = Arc::new(RouteResolver::new(Arc::new(RouteSnapshot::new(routes))));
        let bus = Arc::new(MemoryBus::new());
        let (publisher, worker) = TelemetryPublisher::new(bus.clone(), &TelemetryConfig::default());
        tokio::spawn(worker.run());
        (
            GatewayHandler::new(
                resolver,
                publisher,
                Arc::new(RequestTracker::new()),
                Duration::from_secs(5),
                1024 * 1024,
            ),
            bus,
        )
    }

    fn request(path: &str) -> Request<Body> {
        Request::builder()
            .method(http::Method::GET)
            .uri(path)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn reserved_prefixes_are_detected() {
        assert!(is_reserved("/admin/routes"));
        assert!(is_reserved("/fallback/message"));
        assert!(is_reserved("/actuator/health"));
        assert!(is_reserved("/auth"));
        assert!(is_reserved("/dashboard/live"));
        assert!(!is_reserved("/administration"));
        assert!(!is_reserved("/inventory/1"));
    }

    #[tokio::test]
    async fn routed_request_gets_upstream_status_and_correlation_id() {
        let (handler, bus) = handler(vec![compiled("inv", "/inventory/**", StatusCode::OK)]);

        let response = handler.handle_request(request("/inventory/1"), None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let echoed = response.headers().get(CORRELATION_HEADER).unwrap();
        assert!(!echoed.to_str().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(50)).await;
        let records = bus.records();
        assert_eq!(records.len(), 1);
        let event: serde_json::Value = serde_json::from_slice(&records[0].payload).unwrap();
        assert_eq!(event["routeId"], "inv");
        assert_eq!(event["status"], 200);
        assert_eq!(event["retryCount"], 0);
        assert_eq!(event["rateLimited"], false);
        assert_eq!(event["circuitBreakerTriggered"], false);
    }

    #[tokio::test]
    async fn caller_correlation_id_is_reused() {
        let (handler, bus) = handler(vec![compiled("inv", "/inventory/**", StatusCode::OK)]);

        let req = Request::builder()
            .method(http::Method::GET)
            .uri("/inventory/1")
            .header(CORRELATION_HEADER, "caller-supplied-id")
            .body(Body::empty())
            .unwrap();

        let response = handler.handle_request(req, None).await;
        assert_eq!(
            response.headers().get(CORRELATION_HEADER).unwrap(),
            "caller-supplied-id"
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        let event: serde_json::Value =
            serde_json::from_slice(&bus.records()[0].payload).unwrap();
        assert_eq!(event["correlationId"], "caller-supplied-id");
    }

    #[tokio::test]
    async fn no_route_is_404_with_telemetry() {
        let (handler, bus) = handler(vec![]);

        let response = handler.handle_request(request("/nowhere"), None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let records = bus.records();
        // 404 is not a server error: telemetry topic only.
        assert_eq!(records.len(), 1);
        let event: serde_json::Value = serde_json::from_slice(&records[0].payload).unwrap();
        assert!(event.get("routeId").is_none());
        assert_eq!(event["status"], 404);
    }

    #[tokio::test]
    async fn upstream_5xx_fans_out_to_errors_topic() {
        let (handler, bus) = handler(vec![compiled(
            "inv",
            "/inventory/**",
            StatusCode::INTERNAL_SERVER_ERROR,
        )]);

        let response = handler.handle_request(request("/inventory/1"), None).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let topics: Vec<String> = bus.records().iter().map(|r| r.topic.clone()).collect();
        assert_eq!(topics, vec!["gateway-telemetry", "gateway-errors"]);
    }
}
