//! The filter chain contract.
//!
//! A compiled route is an ordered list of around-advices ending in a
//! proxy sink. Each filter receives the request, a request-scoped
//! context, and a `Next` handle; it may short-circuit with its own
//! response, invoke the rest of the chain (once, or several times for
//! retry), and observe the outcome on the way back out. The order is
//! fixed at compile time and never changes for the lifetime of a
//! `CompiledRoute`.
use std::{
    sync::atomic::{AtomicBool, AtomicU32, Ordering},
    time::Instant,
};

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use futures_util::future::BoxFuture;
use http::{HeaderMap, Method, Response};

use crate::core::error::GatewayError;

pub type FilterResult = Result<Response<Body>, GatewayError>;

/// The request as seen by the filter chain.
///
/// The body is buffered up front so retry attempts can replay it; the
/// response body streams through untouched.
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl GatewayRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: None,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }
}

/// Mutable per-request state shared by every filter and by the
/// telemetry capture wrapping the chain.
#[derive(Debug)]
pub struct RequestContext {
    pub correlation_id: String,
    pub client_ip: String,
    pub user_agent: Option<String>,
    /// Absolute deadline covering the whole chain, retries included.
    pub deadline: Instant,
    retry_count: AtomicU32,
    rate_limited: AtomicBool,
    breaker_triggered: AtomicBool,
}

impl RequestContext {
    pub fn new(
        correlation_id: impl Into<String>,
        client_ip: impl Into<String>,
        deadline: Instant,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            client_ip: client_ip.into(),
            user_agent: None,
            deadline,
            retry_count: AtomicU32::new(0),
            rate_limited: AtomicBool::new(false),
            breaker_triggered: AtomicBool::new(false),
        }
    }

    pub fn record_retry(&self) {
        self.retry_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count.load(Ordering::Relaxed)
    }

    pub fn mark_rate_limited(&self) {
        self.rate_limited.store(true, Ordering::Relaxed);
    }

    pub fn rate_limited(&self) -> bool {
        self.rate_limited.load(Ordering::Relaxed)
    }

    pub fn mark_breaker_triggered(&self) {
        self.breaker_triggered.store(true, Ordering::Relaxed);
    }

    pub fn breaker_triggered(&self) -> bool {
        self.breaker_triggered.load(Ordering::Relaxed)
    }

    /// Time left before the request deadline, if any.
    pub fn remaining(&self) -> Option<std::time::Duration> {
        self.deadline.checked_duration_since(Instant::now())
    }
}

/// The terminal stage of every chain: performs the upstream call.
#[async_trait]
pub trait ProxySink: Send + Sync {
    async fn forward(&self, req: GatewayRequest, ctx: &RequestContext) -> FilterResult;
}

/// One around-advice in the chain.
#[async_trait]
pub trait GatewayFilter: Send + Sync {
    async fn apply(&self, req: GatewayRequest, ctx: &RequestContext, next: Next<'_>)
    -> FilterResult;
}

/// Handle on the remainder of the chain. Copyable so a filter (retry)
/// can invoke the downstream stages more than once.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    filters: &'a [std::sync::Arc<dyn GatewayFilter>],
    sink: &'a dyn ProxySink,
}

impl<'a> Next<'a> {
    pub fn new(filters: &'a [std::sync::Arc<dyn GatewayFilter>], sink: &'a dyn ProxySink) -> Self {
        Self { filters, sink }
    }

    /// Run the rest of the chain, ending in the sink.
    pub fn run(self, req: GatewayRequest, ctx: &'a RequestContext) -> BoxFuture<'a, FilterResult> {
        Box::pin(async move {
            match self.filters.split_first() {
                Some((head, rest)) => {
                    head.apply(
                        req,
                        ctx,
                        Next {
                            filters: rest,
                            sink: self.sink,
                        },
                    )
                    .await
                }
                None => self.sink.forward(req, ctx).await,
            }
        })
    }
}


#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::{test_support::*, *};

    #[tokio::test]
    async fn chain_runs_filters_in_declared_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let filters: Vec<Arc<dyn GatewayFilter>> = vec![
            Arc::new(OrderProbe {
                label: "first",
                seen: seen.clone(),
            }),
            Arc::new(OrderProbe {
                label: "second",
                seen: seen.clone(),
            }),
        ];
        let sink = StaticSink::new(http::StatusCode::OK);
        let ctx = test_ctx();

        let next = Next::new(&filters, &sink);
        let response = next
            .run(GatewayRequest::new(Method::GET, "/x"), &ctx)
            .await
            .unwrap();

        assert_eq!(response.status(), http::StatusCode::OK);
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);
        assert_eq!(sink.calls(), 1);
    }

    #[tokio::test]
    async fn empty_chain_reaches_sink() {
        let filters: Vec<Arc<dyn GatewayFilter>> = Vec::new();
        let sink = StaticSink::new(http::StatusCode::NO_CONTENT);
        let ctx = test_ctx();

        let response = Next::new(&filters, &sink)
            .run(GatewayRequest::new(Method::DELETE, "/x"), &ctx)
            .await
            .unwrap();
        assert_eq!(response.status(), http::StatusCode::NO_CONTENT);
    }

    #[test]
    fn context_counters() {
        let ctx = test_ctx();
        assert_eq!(ctx.retry_count(), 0);
        ctx.record_retry();
        ctx.record_retry();
        assert_eq!(ctx.retry_count(), 2);

        assert!(!ctx.rate_limited());
        ctx.mark_rate_limited();
        assert!(ctx.rate_limited());

        assert!(!ctx.breaker_triggered());
        ctx.mark_breaker_triggered();
        assert!(ctx.breaker_triggered());
    }
}
