//! Configuration data structures for NeuraGate.
//!
//! Two families of types live here. `GatewayConfig` maps directly to the
//! YAML / JSON / TOML startup file and carries the process-wide knobs
//! (listen address, store coordinates, bus coordinates, resilience
//! defaults). `RouteDefinition` is the admin-facing route record stored
//! in the remote hash and exchanged over the admin REST surface. Both
//! are intentionally serde-friendly with defaults so minimal configs
//! stay concise.
use std::{collections::HashMap, time::Duration};

use serde::{Deserialize, Serialize};

fn default_listen_addr() -> String {
    "127.0.0.1:8080".to_string()
}

/// Top-level gateway configuration.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct GatewayConfig {
    pub listen_addr: String,
    pub store: StoreConfig,
    pub telemetry: TelemetryConfig,
    pub proxy: ProxyConfig,
    pub request: RequestConfig,
    pub breaker: BreakerDefaults,
    pub retry: RetryDefaults,
    pub rate_limit: RateLimitDefaults,
    pub shutdown: ShutdownConfig,
    /// Local file holding the critical fallback route set, loaded at boot.
    pub fallback_routes_path: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            store: StoreConfig::default(),
            telemetry: TelemetryConfig::default(),
            proxy: ProxyConfig::default(),
            request: RequestConfig::default(),
            breaker: BreakerDefaults::default(),
            retry: RetryDefaults::default(),
            rate_limit: RateLimitDefaults::default(),
            shutdown: ShutdownConfig::default(),
            fallback_routes_path: None,
        }
    }
}

/// Remote route store coordinates.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    /// Redis-style connection URL.
    pub address: String,
    /// Hash key under which route definitions are stored.
    pub route_key: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            address: "redis://127.0.0.1:6379".to_string(),
            route_key: "routes.hash".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct TelemetryConfig {
    pub bus: BusConfig,
    /// Bounded in-process queue between request tasks and the publisher.
    pub queue_capacity: usize,
    /// Backoff applied when the bus rejects a delivery.
    pub publish_backoff: BackoffConfig,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            bus: BusConfig::default(),
            queue_capacity: 8192,
            publish_backoff: BackoffConfig::default(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct BusConfig {
    /// Bus bootstrap address.
    pub bootstrap: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            bootstrap: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct BackoffConfig {
    pub initial_ms: u64,
    pub max_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: 200,
            max_ms: 15_000,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ProxyConfig {
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub max_idle_per_host: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 2,
            read_timeout_secs: 10,
            max_idle_per_host: 32,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RequestConfig {
    /// Overall per-request deadline, covering every retry attempt.
    pub deadline_secs: u64,
    /// Upper bound on a buffered request body.
    pub max_body_bytes: usize,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            deadline_secs: 30,
            max_body_bytes: 2 * 1024 * 1024,
        }
    }
}

/// Defaults applied when a route has no explicit `CircuitBreaker` filter.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct BreakerDefaults {
    pub failure_rate_threshold: f64,
    pub wait_duration_secs: u64,
    pub sliding_window_size: usize,
    pub minimum_number_of_calls: usize,
    pub permitted_calls_in_half_open: usize,
}

impl Default for BreakerDefaults {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 0.6,
            wait_duration_secs: 15,
            sliding_window_size: 15,
            minimum_number_of_calls: 5,
            permitted_calls_in_half_open: 3,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RetryDefaults {
    pub retries: u32,
    pub base_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryDefaults {
    fn default() -> Self {
        Self {
            retries: 3,
            base_ms: 500,
            multiplier: 2.0,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RateLimitDefaults {
    pub replenish_rate: u64,
    pub burst_capacity: u64,
    /// Idle buckets are discarded past this TTL, e.g. "10m".
    pub ttl: String,
}

impl RateLimitDefaults {
    pub fn ttl_duration(&self) -> Duration {
        humantime::parse_duration(&self.ttl).unwrap_or(Duration::from_secs(600))
    }
}

impl Default for RateLimitDefaults {
    fn default() -> Self {
        Self {
            replenish_rate: 10,
            burst_capacity: 20,
            ttl: "10m".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ShutdownConfig {
    pub drain_timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout_secs: 30,
        }
    }
}

/// The admin-facing route record. Serialized as UTF-8 JSON into the
/// remote hash; unknown keys are tolerated on read.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RouteDefinition {
    pub id: String,
    pub uri: String,
    pub predicates: Vec<PredicateDef>,
    #[serde(default)]
    pub filters: Vec<FilterDef>,
    #[serde(default)]
    pub order: i32,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl RouteDefinition {
    /// Whether this definition belongs to the critical fallback set.
    pub fn is_critical(&self) -> bool {
        self.metadata
            .get("critical")
            .map(|v| v == "true")
            .unwrap_or(false)
    }

    pub fn rate_limit_enabled(&self) -> bool {
        self.metadata
            .get("rate-limit-enabled")
            .map(|v| v == "true")
            .unwrap_or(false)
    }

    pub fn has_filter(&self, name: &str) -> bool {
        self.filters.iter().any(|f| f.name == name)
    }
}

/// A named predicate with string arguments, e.g. `Path` with
/// `pattern = "/inventory/**"`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PredicateDef {
    pub name: String,
    #[serde(default)]
    pub args: HashMap<String, String>,
}

impl PredicateDef {
    pub fn path(pattern: impl Into<String>) -> Self {
        Self {
            name: "Path".to_string(),
            args: HashMap::from([("pattern".to_string(), pattern.into())]),
        }
    }
}

/// A named filter with string arguments, e.g. `Retry` with `retries = "3"`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FilterDef {
    pub name: String,
    #[serde(default)]
    pub args: HashMap<String, String>,
}

impl FilterDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: HashMap::new(),
        }
    }

    pub fn arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }
}
