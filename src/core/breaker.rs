//! Count-based sliding-window circuit breakers.
//!
//! Each named breaker keeps a fixed-size ring of the most recent call
//! outcomes. Window mutation and state transitions happen under a
//! per-breaker mutex (no await is held across it); the current state is
//! mirrored into an atomic so reads never take the lock. In OPEN every
//! call short-circuits; after the wait duration the breaker moves to
//! HALF_OPEN and issues a limited number of trial permits. All permits
//! succeeding closes the breaker with a fresh window; any failure
//! reopens it.
use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicU8, Ordering},
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;

use crate::{
    core::{
        error::GatewayError,
        filter::{FilterResult, GatewayFilter, GatewayRequest, Next, RequestContext},
    },
    metrics as gw_metrics,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    fn as_u8(self) -> u8 {
        match self {
            BreakerState::Closed => 0,
            BreakerState::Open => 1,
            BreakerState::HalfOpen => 2,
        }
    }

    fn from_u8(tag: u8) -> Self {
        match tag {
            1 => BreakerState::Open,
            2 => BreakerState::HalfOpen,
            _ => BreakerState::Closed,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BreakerState::Closed => "CLOSED",
            BreakerState::Open => "OPEN",
            BreakerState::HalfOpen => "HALF_OPEN",
        }
    }
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Failure rate in `[0, 1]` at which the breaker opens.
    pub failure_rate_threshold: f64,
    pub wait_duration: Duration,
    pub sliding_window_size: usize,
    pub minimum_number_of_calls: usize,
    pub permitted_calls_in_half_open: usize,
}

impl BreakerConfig {
    pub fn backend_service() -> Self {
        Self {
            failure_rate_threshold: 0.5,
            wait_duration: Duration::from_secs(10),
            sliding_window_size: 10,
            minimum_number_of_calls: 5,
            permitted_calls_in_half_open: 3,
        }
    }

    pub fn critical_service() -> Self {
        Self {
            failure_rate_threshold: 0.7,
            wait_duration: Duration::from_secs(30),
            sliding_window_size: 20,
            minimum_number_of_calls: 10,
            permitted_calls_in_half_open: 3,
        }
    }

    pub fn dynamic_route() -> Self {
        Self {
            failure_rate_threshold: 0.6,
            wait_duration: Duration::from_secs(15),
            sliding_window_size: 15,
            minimum_number_of_calls: 5,
            permitted_calls_in_half_open: 3,
        }
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self::dynamic_route()
    }
}

impl From<&crate::config::models::BreakerDefaults> for BreakerConfig {
    fn from(defaults: &crate::config::models::BreakerDefaults) -> Self {
        Self {
            failure_rate_threshold: defaults.failure_rate_threshold,
            wait_duration: Duration::from_secs(defaults.wait_duration_secs),
            sliding_window_size: defaults.sliding_window_size,
            minimum_number_of_calls: defaults.minimum_number_of_calls,
            permitted_calls_in_half_open: defaults.permitted_calls_in_half_open,
        }
    }
}

#[derive(Debug)]
struct BreakerCore {
    state: BreakerState,
    /// Ring of the last N outcomes; `true` marks a failure.
    ring: Vec<bool>,
    next_slot: usize,
    filled: usize,
    opened_at: Instant,
    half_open_permits_left: usize,
    half_open_successes: usize,
}

impl BreakerCore {
    fn failure_rate(&self) -> f64 {
        if self.filled == 0 {
            return 0.0;
        }
        let failures = self.ring[..self.filled].iter().filter(|f| **f).count();
        failures as f64 / self.filled as f64
    }

    fn record_outcome(&mut self, failure: bool, window: usize) {
        if self.ring.len() < window {
            self.ring.push(failure);
        } else {
            self.ring[self.next_slot] = failure;
        }
        self.next_slot = (self.next_slot + 1) % window;
        self.filled = (self.filled + 1).min(window);
    }

    fn reset_window(&mut self) {
        self.ring.clear();
        self.next_slot = 0;
        self.filled = 0;
    }
}

/// One named breaker instance.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    core: Mutex<BreakerCore>,
    state_tag: AtomicU8,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            core: Mutex::new(BreakerCore {
                state: BreakerState::Closed,
                ring: Vec::new(),
                next_slot: 0,
                filled: 0,
                opened_at: Instant::now(),
                half_open_permits_left: 0,
                half_open_successes: 0,
            }),
            state_tag: AtomicU8::new(BreakerState::Closed.as_u8()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lock-free state read via the atomic mirror.
    pub fn state(&self) -> BreakerState {
        BreakerState::from_u8(self.state_tag.load(Ordering::Acquire))
    }

    /// Whether a call may proceed right now. Consumes a half-open
    /// permit when applicable.
    pub fn try_acquire(&self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    pub fn try_acquire_at(&self, now: Instant) -> bool {
        let mut core = self.core.lock().expect("breaker lock");
        match core.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                if now.saturating_duration_since(core.opened_at) >= self.config.wait_duration {
                    self.transition(&mut core, BreakerState::HalfOpen, now);
                    core.half_open_permits_left -= 1;
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => {
                if core.half_open_permits_left > 0 {
                    core.half_open_permits_left -= 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a call outcome observed by an admitted attempt.
    pub fn record(&self, success: bool) {
        self.record_at(success, Instant::now());
    }

    pub fn record_at(&self, success: bool, now: Instant) {
        let mut core = self.core.lock().expect("breaker lock");
        match core.state {
            BreakerState::Closed => {
                core.record_outcome(!success, self.config.sliding_window_size);
                if core.filled >= self.config.minimum_number_of_calls
                    && core.failure_rate() >= self.config.failure_rate_threshold
                {
                    self.transition(&mut core, BreakerState::Open, now);
                }
            }
            BreakerState::HalfOpen => {
                if success {
                    core.half_open_successes += 1;
                    if core.half_open_successes >= self.config.permitted_calls_in_half_open {
                        self.transition(&mut core, BreakerState::Closed, now);
                    }
                } else {
                    self.transition(&mut core, BreakerState::Open, now);
                }
            }
            // An outcome from an attempt admitted before the breaker
            // opened; the window is already settled.
            BreakerState::Open => {}
        }
    }

    fn transition(&self, core: &mut BreakerCore, to: BreakerState, now: Instant) {
        let from = core.state;
        core.state = to;
        self.state_tag.store(to.as_u8(), Ordering::Release);

        match to {
            BreakerState::Open => {
                core.opened_at = now;
                tracing::error!(
                    breaker = %self.name,
                    from = from.as_str(),
                    to = to.as_str(),
                    "circuit breaker opened, serving fallback"
                );
            }
            BreakerState::HalfOpen => {
                core.half_open_permits_left = self.config.permitted_calls_in_half_open;
                core.half_open_successes = 0;
                tracing::warn!(
                    breaker = %self.name,
                    from = from.as_str(),
                    to = to.as_str(),
                    "circuit breaker half-open, testing recovery"
                );
            }
            BreakerState::Closed => {
                core.reset_window();
                tracing::info!(
                    breaker = %self.name,
                    from = from.as_str(),
                    to = to.as_str(),
                    "circuit breaker closed, service recovered"
                );
            }
        }
        gw_metrics::set_breaker_state(&self.name, to.as_u8());
    }
}

/// Process-wide registry of named breakers. Well-known names carry
/// their recommended configurations; everything else uses the
/// configured defaults.
pub struct BreakerRegistry {
    breakers: scc::HashMap<String, Arc<CircuitBreaker>>,
    default_config: BreakerConfig,
}

impl BreakerRegistry {
    pub fn new(default_config: BreakerConfig) -> Self {
        Self {
            breakers: scc::HashMap::new(),
            default_config,
        }
    }

    fn config_for(&self, name: &str) -> BreakerConfig {
        match name {
            "backendService" => BreakerConfig::backend_service(),
            "criticalService" => BreakerConfig::critical_service(),
            "dynamicRoute" => BreakerConfig::dynamic_route(),
            _ => self.default_config.clone(),
        }
    }

    pub async fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(entry) = self.breakers.get_async(name).await {
            return entry.get().clone();
        }
        let breaker = Arc::new(CircuitBreaker::new(name, self.config_for(name)));
        match self
            .breakers
            .insert_async(name.to_string(), breaker.clone())
            .await
        {
            Ok(()) => breaker,
            Err(_) => self
                .breakers
                .get_async(name)
                .await
                .map(|e| e.get().clone())
                .unwrap_or(breaker),
        }
    }

    /// Snapshot of every breaker's current state, for the health probe.
    pub async fn states(&self) -> Vec<(String, BreakerState)> {
        let mut states = Vec::new();
        self.breakers
            .scan_async(|name, breaker| {
                states.push((name.clone(), breaker.state()));
            })
            .await;
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }
}

/// The `CircuitBreaker` chain filter: sits between retry and the proxy
/// sink so each attempt is individually admitted and recorded.
pub struct BreakerFilter {
    registry: Arc<BreakerRegistry>,
    name: String,
    fallback: String,
}

impl BreakerFilter {
    pub fn new(
        registry: Arc<BreakerRegistry>,
        name: impl Into<String>,
        fallback: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            name: name.into(),
            fallback: fallback.into(),
        }
    }
}

#[async_trait]
impl GatewayFilter for BreakerFilter {
    async fn apply(
        &self,
        req: GatewayRequest,
        ctx: &RequestContext,
        next: Next<'_>,
    ) -> FilterResult {
        let breaker = self.registry.get_or_create(&self.name).await;

        if !breaker.try_acquire() {
            ctx.mark_breaker_triggered();
            gw_metrics::increment_breaker_short_circuit(&self.name);
            return Err(GatewayError::BreakerOpen {
                breaker: self.name.clone(),
                fallback: self.fallback.clone(),
            });
        }

        let result = next.run(req, ctx).await;
        let success = match &result {
            // Upstream 4xx is a client problem, not an upstream failure.
            Ok(response) => response.status().as_u16() < 500,
            Err(_) => false,
        };
        breaker.record(success);
        result
    }
}
