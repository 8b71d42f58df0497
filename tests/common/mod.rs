//! Shared fixtures: a scripted upstream and a fully wired gateway
//! backed by in-memory adapters.
#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use axum::body::Body;
use http::{Method, Request, Response, StatusCode};
use neuragate::{
    adapters::{
        GatewayHandler, SnapshotRebuilder,
        memory::{MemoryBus, MemoryRouteStore},
    },
    config::models::{FilterDef, GatewayConfig, PredicateDef, RouteDefinition},
    core::{
        BreakerRegistry, RateLimiterRegistry, RouteCompiler, RouteResolver,
        breaker::BreakerConfig,
    },
    ports::{
        http_client::{HttpClient, HttpClientError, HttpClientResult},
        route_store::RouteStore,
    },
    telemetry::TelemetryPublisher,
    utils::RequestTracker,
};

/// One scripted upstream behavior.
#[derive(Debug, Clone, Copy)]
pub enum Step {
    /// Answer with this status.
    Status(u16),
    /// Fail with a transport-class error.
    Transport,
    /// Sleep, then answer with this status.
    Delay(Duration, u16),
}

/// An upstream that plays back a script, then repeats a default step.
/// Records every request it receives.
pub struct ScriptedUpstream {
    steps: Mutex<VecDeque<Step>>,
    default: Step,
    requests: Mutex<Vec<(Method, String)>>,
    headers: Mutex<Vec<http::HeaderMap>>,
}

impl ScriptedUpstream {
    pub fn always(status: u16) -> Arc<Self> {
        Self::script(Vec::new(), Step::Status(status))
    }

    pub fn script(steps: Vec<Step>, default: Step) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            default,
            requests: Mutex::new(Vec::new()),
            headers: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<(Method, String)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn headers_seen(&self) -> Vec<http::HeaderMap> {
        self.headers.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl HttpClient for ScriptedUpstream {
    async fn send_request(&self, req: Request<Body>) -> HttpClientResult<Response<Body>> {
        self.requests
            .lock()
            .unwrap()
            .push((req.method().clone(), req.uri().to_string()));
        self.headers.lock().unwrap().push(req.headers().clone());

        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.default);

        match step {
            Step::Status(code) => Ok(canned(code)),
            Step::Transport => Err(HttpClientError::ConnectionError(
                "connection refused".into(),
            )),
            Step::Delay(wait, code) => {
                tokio::time::sleep(wait).await;
                Ok(canned(code))
            }
        }
    }
}

fn canned(code: u16) -> Response<Body> {
    Response::builder()
        .status(StatusCode::from_u16(code).unwrap())
        .body(Body::from("upstream"))
        .unwrap()
}

/// A gateway wired end to end on in-memory adapters.
pub struct TestGateway {
    pub store: Arc<MemoryRouteStore>,
    pub resolver: Arc<RouteResolver>,
    pub rebuilder: Arc<SnapshotRebuilder>,
    pub handler: GatewayHandler,
    pub bus: Arc<MemoryBus>,
    pub breakers: Arc<BreakerRegistry>,
}

impl TestGateway {
    pub fn new(upstream: Arc<ScriptedUpstream>) -> Self {
        let config = Arc::new(GatewayConfig::default());
        let store = Arc::new(MemoryRouteStore::new());
        let resolver = Arc::new(RouteResolver::empty());
        let breakers = Arc::new(BreakerRegistry::new(BreakerConfig::from(&config.breaker)));
        let compiler = Arc::new(RouteCompiler::new(
            Arc::new(RateLimiterRegistry::new(Duration::from_secs(600))),
            breakers.clone(),
            upstream,
            config.clone(),
        ));

        let bus = Arc::new(MemoryBus::new());
        let (publisher, worker) = TelemetryPublisher::new(bus.clone(), &config.telemetry);
        tokio::spawn(worker.run());

        let rebuilder = Arc::new(SnapshotRebuilder::new(
            store.clone(),
            compiler,
            resolver.clone(),
            publisher.clone(),
        ));

        let handler = GatewayHandler::new(
            resolver.clone(),
            publisher,
            Arc::new(RequestTracker::new()),
            Duration::from_secs(10),
            1024 * 1024,
        );

        Self {
            store,
            resolver,
            rebuilder,
            handler,
            bus,
            breakers,
        }
    }

    /// Persist a definition and rebuild the snapshot, as the reload
    /// task would after a route-changed event.
    pub async fn install(&self, def: &RouteDefinition) {
        self.store.put(def).await.unwrap();
        self.rebuilder.rebuild_once().await;
    }

    pub async fn get(&self, path: &str) -> Response<Body> {
        self.request(Method::GET, path, None).await
    }

    pub async fn request(
        &self,
        method: Method,
        path: &str,
        correlation: Option<&str>,
    ) -> Response<Body> {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(id) = correlation {
            builder = builder.header("X-Correlation-ID", id);
        }
        let req = builder.body(Body::empty()).unwrap();
        self.handler
            .handle_request(req, Some("10.1.2.3:55555".parse().unwrap()))
            .await
    }

    /// Wait for the telemetry worker to drain, then return the decoded
    /// events from the telemetry topic.
    pub async fn telemetry_events(&self) -> Vec<serde_json::Value> {
        tokio::time::sleep(Duration::from_millis(80)).await;
        self.bus
            .records()
            .iter()
            .filter(|r| r.topic == "gateway-telemetry")
            .map(|r| serde_json::from_slice(&r.payload).unwrap())
            .collect()
    }
}

pub fn route(id: &str, pattern: &str, order: i32) -> RouteDefinition {
    RouteDefinition {
        id: id.into(),
        uri: "http://upstream:9001".into(),
        predicates: vec![PredicateDef::path(pattern)],
        filters: vec![],
        order,
        metadata: HashMap::new(),
        enabled: true,
    }
}

/// A route whose retry filter is tuned for fast tests.
pub fn route_with_fast_retry(id: &str, pattern: &str, retries: u32) -> RouteDefinition {
    let mut def = route(id, pattern, 0);
    def.filters.push(
        FilterDef::new("Retry")
            .arg("retries", retries.to_string())
            .arg("base-ms", "5"),
    );
    def
}
