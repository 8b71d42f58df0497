//! NeuraGate - a reverse-proxy API gateway with dynamic routes.
//!
//! NeuraGate routes incoming HTTP requests to upstream services under
//! live-mutable configuration, protecting both ends with a stack of
//! resilience filters and emitting a durable telemetry stream for
//! downstream analysis. The crate follows a **hexagonal architecture**:
//! business logic lives in `core`, ports (traits) describe the store,
//! the upstream client, and the telemetry bus, and adapters provide the
//! concrete Redis / hyper implementations.
//!
//! # Features
//! - Dynamic route table in a remote hash with live reload; an
//!   in-memory critical fallback set covers store outages
//! - Per-route filter chain with a fixed resilience order:
//!   rate limiter, retry, circuit breaker, then the proxy sink
//! - Distributed-style token-bucket rate limiting keyed by IP, user,
//!   path, or IP+path
//! - Named sliding-window circuit breakers with scheduled recovery and
//!   local fallback responses
//! - Bounded retries with exponential backoff, jitter, and
//!   deadline-aware cancellation
//! - Correlation ids propagated through requests, responses, logs, and
//!   telemetry
//! - Non-blocking, at-least-once telemetry publishing with batching and
//!   local drop on saturation
//! - Health probe (UP / DEGRADED / DOWN) consumed by load balancers
//! - Graceful shutdown draining in-flight requests
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use neuragate::{
//!     adapters::MemoryRouteStore,
//!     config::models::GatewayConfig,
//! };
//!
//! # fn main() -> eyre::Result<()> {
//! let config = Arc::new(GatewayConfig::default());
//! let store = Arc::new(MemoryRouteStore::new());
//! // Wire the store, compiler, resolver, and handler as the binary does.
//! # let _ = (config, store); Ok(()) }
//! ```
//!
//! # Error Handling
//! Data-plane failures are `GatewayError` values carrying a
//! discriminated kind; retryability is a property of the kind. Adapter
//! and wire-up boundaries return `eyre::Result` with context attached.
//!
//! # Concurrency & Data Structures
//! The route snapshot sits behind an atomic pointer swap (`arc-swap`);
//! bucket and breaker registries use `scc::HashMap` for predictable
//! performance under contention; the telemetry queue is a bounded
//! multi-producer single-consumer channel where overflow drops rather
//! than blocks.
pub mod config;
pub mod metrics;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;
pub mod telemetry;

// Re-export the types the binary crate wires together.
pub use crate::{
    adapters::{GatewayHandler, HttpClientAdapter, RedisRouteStore, RedisStreamBus, SnapshotRebuilder},
    core::{BreakerRegistry, RateLimiterRegistry, RouteCompiler, RouteResolver},
    telemetry::{TelemetryPublisher, TelemetryWorker},
    utils::{GracefulShutdown, RequestTracker},
};
