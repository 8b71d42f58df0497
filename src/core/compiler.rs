//! Route compilation.
//!
//! Turns validated `RouteDefinition`s into immutable `CompiledRoute`s
//! and whole `RouteSnapshot`s. Compilation is pure: it touches shared
//! registries only to hand filters their handles, never the network.
//!
//! Filter names form a closed registry. The chain order is a contract,
//! outermost first: RateLimiter -> Retry -> CircuitBreaker -> user
//! filters -> proxy sink. Rate-limit rejections therefore never spend
//! retry or breaker budget, and the breaker sees per-attempt outcomes
//! rather than the retry's final one.
use std::{sync::Arc, time::Duration};

use http::Method;

use crate::{
    config::models::{FilterDef, GatewayConfig, RouteDefinition},
    config::validation::{RouteDefinitionValidator, ValidationError},
    core::{
        breaker::{BreakerFilter, BreakerRegistry},
        filter::GatewayFilter,
        proxy::{ProxyEngine, StripPrefixFilter},
        rate_limit::{KeyStrategy, RateLimitFilter, RateLimiterRegistry},
        retry::{RetryFilter, RetryPolicy},
        route::{CompiledRoute, PathMatcher, RouteSnapshot},
    },
    ports::http_client::HttpClient,
};

const FILTER_RATE_LIMITER: &str = "RequestRateLimiter";
const FILTER_RETRY: &str = "Retry";
const FILTER_CIRCUIT_BREAKER: &str = "CircuitBreaker";
const FILTER_STRIP_PREFIX: &str = "StripPrefix";

const DEFAULT_BREAKER_NAME: &str = "dynamicRoute";
const DEFAULT_FALLBACK: &str = "/fallback/message";

/// Builds compiled routes against the process-wide registries.
pub struct RouteCompiler {
    rate_limiters: Arc<RateLimiterRegistry>,
    breakers: Arc<BreakerRegistry>,
    client: Arc<dyn HttpClient>,
    config: Arc<GatewayConfig>,
}

impl RouteCompiler {
    pub fn new(
        rate_limiters: Arc<RateLimiterRegistry>,
        breakers: Arc<BreakerRegistry>,
        client: Arc<dyn HttpClient>,
        config: Arc<GatewayConfig>,
    ) -> Self {
        Self {
            rate_limiters,
            breakers,
            client,
            config,
        }
    }

    /// Compile one definition. Bad definitions are rejected here and
    /// never installed into a snapshot.
    pub fn compile(&self, def: &RouteDefinition) -> Result<CompiledRoute, ValidationError> {
        RouteDefinitionValidator::validate(def)?;

        let matchers = def
            .predicates
            .iter()
            .filter(|p| p.name == "Path")
            .filter_map(|p| p.args.get("pattern"))
            .map(|pattern| PathMatcher::new(pattern))
            .collect::<Vec<_>>();

        let mut filters: Vec<Option<Arc<dyn GatewayFilter>>> = Vec::new();
        filters.push(self.build_rate_limiter(def));
        filters.push(self.build_retry(def));
        filters.push(self.build_breaker(def));
        filters.extend(self.build_user_filters(def));

        // Default-injected stages are optional; drop the unused slots.
        let filters: Vec<Arc<dyn GatewayFilter>> = filters.into_iter().flatten().collect();

        let sink = Arc::new(ProxyEngine::new(
            self.client.clone(),
            def.uri.clone(),
            Duration::from_secs(self.config.proxy.read_timeout_secs),
        ));

        Ok(CompiledRoute::new(def.clone(), matchers, filters, sink))
    }

    /// Compile the full enabled set into a snapshot. Invalid
    /// definitions are skipped with an error log.
    pub fn compile_snapshot(&self, defs: &[RouteDefinition]) -> RouteSnapshot {
        let mut routes = Vec::with_capacity(defs.len());
        for def in defs {
            if !def.enabled {
                tracing::debug!(route_id = %def.id, "skipping disabled route");
                continue;
            }
            match self.compile(def) {
                Ok(route) => routes.push(Arc::new(route)),
                Err(error) => {
                    tracing::error!(
                        route_id = %def.id,
                        error = %error,
                        "rejected route definition, not installing"
                    );
                }
            }
        }
        RouteSnapshot::new(routes)
    }

    fn build_rate_limiter(&self, def: &RouteDefinition) -> Option<Arc<dyn GatewayFilter>> {
        let defaults = &self.config.rate_limit;
        let explicit = def.filters.iter().find(|f| f.name == FILTER_RATE_LIMITER);

        match explicit {
            Some(filter) => {
                let replenish = arg_u64(filter, "replenish-rate", defaults.replenish_rate);
                let burst = arg_u64(filter, "burst-capacity", defaults.burst_capacity);
                let strategy = KeyStrategy::parse(filter.args.get("key").map(String::as_str));
                Some(Arc::new(RateLimitFilter::new(
                    self.rate_limiters.clone(),
                    def.id.clone(),
                    replenish,
                    burst,
                    strategy,
                )))
            }
            None if def.rate_limit_enabled() => Some(Arc::new(RateLimitFilter::new(
                self.rate_limiters.clone(),
                def.id.clone(),
                defaults.replenish_rate,
                defaults.burst_capacity,
                KeyStrategy::ClientIp,
            ))),
            None => None,
        }
    }

    fn build_retry(&self, def: &RouteDefinition) -> Option<Arc<dyn GatewayFilter>> {
        let defaults = &self.config.retry;
        let base_policy = RetryPolicy {
            retries: defaults.retries,
            base: Duration::from_millis(defaults.base_ms),
            multiplier: defaults.multiplier,
            ..RetryPolicy::default()
        };

        let policy = match def.filters.iter().find(|f| f.name == FILTER_RETRY) {
            Some(filter) => RetryPolicy {
                retries: arg_u64(filter, "retries", defaults.retries as u64) as u32,
                statuses: filter
                    .args
                    .get("statuses")
                    .map(|s| parse_statuses(s))
                    .unwrap_or(base_policy.statuses.clone()),
                methods: filter
                    .args
                    .get("methods")
                    .map(|s| parse_methods(s))
                    .unwrap_or(base_policy.methods.clone()),
                base: filter
                    .args
                    .get("base-ms")
                    .and_then(|v| v.parse().ok())
                    .map(Duration::from_millis)
                    .unwrap_or(base_policy.base),
                multiplier: filter
                    .args
                    .get("multiplier")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(base_policy.multiplier),
            },
            None => base_policy,
        };

        Some(Arc::new(RetryFilter::new(def.id.clone(), policy)))
    }

    fn build_breaker(&self, def: &RouteDefinition) -> Option<Arc<dyn GatewayFilter>> {
        let (name, fallback) = match def.filters.iter().find(|f| f.name == FILTER_CIRCUIT_BREAKER) {
            Some(filter) => (
                filter
                    .args
                    .get("name")
                    .cloned()
                    .unwrap_or_else(|| DEFAULT_BREAKER_NAME.to_string()),
                filter
                    .args
                    .get("fallbackUri")
                    .map(|uri| parse_fallback_uri(uri))
                    .unwrap_or_else(|| DEFAULT_FALLBACK.to_string()),
            ),
            None => (
                DEFAULT_BREAKER_NAME.to_string(),
                DEFAULT_FALLBACK.to_string(),
            ),
        };

        Some(Arc::new(BreakerFilter::new(
            self.breakers.clone(),
            name,
            fallback,
        )))
    }

    fn build_user_filters(&self, def: &RouteDefinition) -> Vec<Option<Arc<dyn GatewayFilter>>> {
        def.filters
            .iter()
            .filter(|f| {
                !matches!(
                    f.name.as_str(),
                    FILTER_RATE_LIMITER | FILTER_RETRY | FILTER_CIRCUIT_BREAKER
                )
            })
            .map(|filter| match filter.name.as_str() {
                FILTER_STRIP_PREFIX => {
                    let parts = arg_u64(filter, "parts", 1) as usize;
                    Some(Arc::new(StripPrefixFilter::new(parts)) as Arc<dyn GatewayFilter>)
                }
                // Unknown names are rejected by validation before this point.
                _ => None,
            })
            .collect()
    }
}

fn arg_u64(filter: &FilterDef, key: &str, default: u64) -> u64 {
    filter
        .args
        .get(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Accepts both numeric codes and the symbolic status names the admin
/// surface historically used.
fn parse_statuses(raw: &str) -> Vec<u16> {
    raw.split(',')
        .filter_map(|part| {
            let part = part.trim();
            part.parse::<u16>().ok().or(match part {
                "INTERNAL_SERVER_ERROR" => Some(500),
                "BAD_GATEWAY" => Some(502),
                "SERVICE_UNAVAILABLE" => Some(503),
                "GATEWAY_TIMEOUT" => Some(504),
                _ => None,
            })
        })
        .collect()
}

fn parse_methods(raw: &str) -> Vec<Method> {
    raw.split(',')
        .filter_map(|part| part.trim().parse::<Method>().ok())
        .collect()
}

/// `forward:/fallback/message` and plain `/fallback/message` are both
/// accepted.
fn parse_fallback_uri(raw: &str) -> String {
    raw.strip_prefix("forward:").unwrap_or(raw).to_string()
}
