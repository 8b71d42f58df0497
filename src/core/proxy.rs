//! The proxy sink: terminal stage of every filter chain.
//!
//! Joins the route's upstream base with the (possibly prefix-stripped)
//! request path, forwards headers minus the hop-by-hop set, replays the
//! buffered request body, and streams the upstream response back
//! verbatim. Transport failures surface as retryable errors; the read
//! timeout is clamped to whatever remains of the request deadline.
use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::body::Body;
use http::{HeaderMap, HeaderValue, Request};

use crate::{
    core::{
        error::GatewayError,
        filter::{FilterResult, GatewayFilter, GatewayRequest, Next, ProxySink, RequestContext},
    },
    ports::http_client::{HttpClient, HttpClientError},
};

/// Headers that describe the connection rather than the message; never
/// forwarded in either direction.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

pub struct ProxyEngine {
    client: Arc<dyn HttpClient>,
    upstream: String,
    read_timeout: Duration,
}

impl ProxyEngine {
    pub fn new(client: Arc<dyn HttpClient>, upstream: impl Into<String>, read_timeout: Duration) -> Self {
        Self {
            client,
            upstream: upstream.into(),
            read_timeout,
        }
    }

    /// Upstream URL from the route base and the request path + query.
    fn upstream_url(&self, req: &GatewayRequest) -> String {
        let base = self.upstream.trim_end_matches('/');
        let path = if req.path.starts_with('/') {
            req.path.clone()
        } else {
            format!("/{}", req.path)
        };
        match &req.query {
            Some(query) => format!("{base}{path}?{query}"),
            None => format!("{base}{path}"),
        }
    }

    fn build_request(
        &self,
        req: &GatewayRequest,
        ctx: &RequestContext,
    ) -> Result<Request<Body>, GatewayError> {
        let url = self.upstream_url(req);
        let mut builder = Request::builder().method(req.method.clone()).uri(&url);

        let Some(headers) = builder.headers_mut() else {
            return Err(GatewayError::Internal(format!("invalid upstream url: {url}")));
        };
        *headers = req.headers.clone();
        strip_hop_by_hop(headers);
        headers.remove(http::header::HOST);
        if let Ok(value) = HeaderValue::from_str(&ctx.client_ip) {
            headers.insert("X-Forwarded-For", value);
        }

        builder
            .body(Body::from(req.body.clone()))
            .map_err(|e| GatewayError::Internal(format!("failed to build upstream request: {e}")))
    }
}

#[async_trait]
impl ProxySink for ProxyEngine {
    async fn forward(&self, req: GatewayRequest, ctx: &RequestContext) -> FilterResult {
        let upstream_request = self.build_request(&req, ctx)?;

        // The attempt gets the read timeout or the rest of the request
        // deadline, whichever is shorter.
        let limit = match ctx.remaining() {
            Some(remaining) => remaining.min(self.read_timeout),
            None => return Err(GatewayError::DeadlineExceeded),
        };

        let outcome = tokio::time::timeout(limit, self.client.send_request(upstream_request)).await;

        match outcome {
            Ok(Ok(response)) => {
                let (mut parts, body) = response.into_parts();
                strip_hop_by_hop(&mut parts.headers);
                Ok(http::Response::from_parts(parts, body))
            }
            Ok(Err(error)) => match error {
                HttpClientError::ConnectionError(msg) => Err(GatewayError::Transport(msg)),
                HttpClientError::Timeout(d) => {
                    Err(GatewayError::Transport(format!("upstream timeout after {d:?}")))
                }
                HttpClientError::InvalidRequest(msg) => Err(GatewayError::Internal(msg)),
            },
            Err(_) => {
                if ctx.remaining().is_none() {
                    Err(GatewayError::DeadlineExceeded)
                } else {
                    Err(GatewayError::Transport(format!(
                        "upstream read timed out after {limit:?}"
                    )))
                }
            }
        }
    }
}

/// The `StripPrefix` filter: removes the leading `parts` path segments
/// before the upstream URL is built.
pub struct StripPrefixFilter {
    parts: usize,
}

impl StripPrefixFilter {
    pub fn new(parts: usize) -> Self {
        Self { parts }
    }

    fn strip(&self, path: &str) -> String {
        let remaining: Vec<&str> = path
            .split('/')
            .filter(|s| !s.is_empty())
            .skip(self.parts)
            .collect();
        format!("/{}", remaining.join("/"))
    }
}

#[async_trait]
impl GatewayFilter for StripPrefixFilter {
    async fn apply(
        &self,
        mut req: GatewayRequest,
        ctx: &RequestContext,
        next: Next<'_>,
    ) -> FilterResult {
        req.path = self.strip(&req.path);
        next.run(req, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use axum::body::Bytes;
    use http::{Method, Response, StatusCode};

    use super::*;
    use crate::{core::filter::test_support::test_ctx, ports::http_client::HttpClientResult};

    /// Captures the outgoing request and answers with a canned status.
    struct RecordingClient {
        seen: Mutex<Vec<(Method, String, HeaderMap)>>,
        status: StatusCode,
    }

    impl RecordingClient {
        fn new(status: StatusCode) -> Self {
            Self {
                seen: Mutex::new(Vec::new()),
                status,
            }
        }
    }

    #[async_trait]
    impl HttpClient for RecordingClient {
        async fn send_request(&self, req: Request<Body>) -> HttpClientResult<Response<Body>> {
            self.seen.lock().unwrap().push((
                req.method().clone(),
                req.uri().to_string(),
                req.headers().clone(),
            ));
            let mut response = Response::builder()
                .status(self.status)
                .body(Body::empty())
                .unwrap();
            response
                .headers_mut()
                .insert("transfer-encoding", HeaderValue::from_static("chunked"));
            Ok(response)
        }
    }

    struct FailingClient;

    #[async_trait]
    impl HttpClient for FailingClient {
        async fn send_request(&self, _req: Request<Body>) -> HttpClientResult<Response<Body>> {
            Err(HttpClientError::ConnectionError("refused".into()))
        }
    }

    #[tokio::test]
    async fn joins_upstream_url_with_query() {
        let client = Arc::new(RecordingClient::new(StatusCode::OK));
        let engine = ProxyEngine::new(
            client.clone(),
            "http://upstream:9001/",
            Duration::from_secs(10),
        );
        let ctx = test_ctx();

        let mut req = GatewayRequest::new(Method::GET, "/inventory/1");
        req.query = Some("verbose=true".to_string());
        let response = engine.forward(req, &ctx).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let seen = client.seen.lock().unwrap();
        assert_eq!(seen[0].1, "http://upstream:9001/inventory/1?verbose=true");
    }

    #[tokio::test]
    async fn strips_hop_by_hop_headers_both_ways() {
        let client = Arc::new(RecordingClient::new(StatusCode::OK));
        let engine = ProxyEngine::new(client.clone(), "http://upstream:9001", Duration::from_secs(10));
        let ctx = test_ctx();

        let mut req = GatewayRequest::new(Method::GET, "/x");
        req.headers
            .insert("connection", HeaderValue::from_static("keep-alive"));
        req.headers
            .insert("te", HeaderValue::from_static("trailers"));
        req.headers
            .insert("x-app", HeaderValue::from_static("kept"));

        let response = engine.forward(req, &ctx).await.unwrap();
        // Response-side hop-by-hop headers removed.
        assert!(response.headers().get("transfer-encoding").is_none());

        let seen = client.seen.lock().unwrap();
        let headers = &seen[0].2;
        assert!(headers.get("connection").is_none());
        assert!(headers.get("te").is_none());
        assert_eq!(headers.get("x-app").unwrap(), "kept");
        assert_eq!(headers.get("X-Forwarded-For").unwrap(), "127.0.0.1");
    }

    #[tokio::test]
    async fn transport_failure_is_retryable() {
        let engine = ProxyEngine::new(
            Arc::new(FailingClient),
            "http://upstream:9001",
            Duration::from_secs(10),
        );
        let ctx = test_ctx();
        let err = engine
            .forward(GatewayRequest::new(Method::GET, "/x"), &ctx)
            .await
            .unwrap_err();
        assert!(err.is_retryable_transport());
    }

    #[tokio::test]
    async fn expired_deadline_short_circuits() {
        let engine = ProxyEngine::new(
            Arc::new(RecordingClient::new(StatusCode::OK)),
            "http://upstream:9001",
            Duration::from_secs(10),
        );
        let ctx = crate::core::filter::RequestContext::new(
            "c",
            "127.0.0.1",
            std::time::Instant::now() - Duration::from_secs(1),
        );
        let err = engine
            .forward(GatewayRequest::new(Method::GET, "/x"), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn body_is_replayed_from_buffer() {
        let client = Arc::new(RecordingClient::new(StatusCode::OK));
        let engine = ProxyEngine::new(client.clone(), "http://upstream:9001", Duration::from_secs(10));
        let ctx = test_ctx();

        let mut req = GatewayRequest::new(Method::POST, "/orders");
        req.body = Bytes::from_static(b"{\"qty\":2}");

        // Two forwards from the same buffered request must both succeed.
        engine.forward(req.clone(), &ctx).await.unwrap();
        engine.forward(req, &ctx).await.unwrap();
        assert_eq!(client.seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn strip_prefix_removes_leading_segments() {
        let filter = StripPrefixFilter::new(1);
        assert_eq!(filter.strip("/status/200"), "/200");
        assert_eq!(filter.strip("/status"), "/");

        let two = StripPrefixFilter::new(2);
        assert_eq!(two.strip("/api/v1/items"), "/items");
    }
}
