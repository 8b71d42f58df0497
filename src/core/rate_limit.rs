//! Token-bucket rate limiting.
//!
//! Buckets live in a process-wide concurrent map, created lazily on the
//! first request for a key and discarded once idle past the TTL. Each
//! bucket's whole `(tokens, last-refill)` state is packed into one
//! `AtomicU64`, and refill-and-consume is a lock-free compare-exchange
//! retry loop: concurrent requests on one key race on the CAS and the
//! loser recomputes, so admission never over-counts. Rejections answer
//! 429 immediately and skip every downstream filter, so they consume
//! neither retry budget nor breaker slots.
use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;
use axum::body::Body;
use http::{HeaderValue, Response, StatusCode};

use crate::{
    core::filter::{FilterResult, GatewayFilter, GatewayRequest, Next, RequestContext},
    metrics as gw_metrics,
};

pub const HEADER_REMAINING: &str = "X-RateLimit-Remaining";
pub const HEADER_REPLENISH_RATE: &str = "X-RateLimit-Replenish-Rate";
pub const HEADER_BURST_CAPACITY: &str = "X-RateLimit-Burst-Capacity";

/// One admitted request costs this many milli-tokens.
const MILLI: u64 = 1000;

/// Pack `(milli_tokens, last_refill_ms)` into the high and low halves
/// of one state word.
fn pack(milli_tokens: u32, stamp_ms: u32) -> u64 {
    ((milli_tokens as u64) << 32) | stamp_ms as u64
}

fn unpack(state: u64) -> (u32, u32) {
    ((state >> 32) as u32, state as u32)
}

/// A single token bucket. `0 <= tokens <= capacity` holds after every
/// operation.
///
/// Tokens are tracked in milli-token units so refill arithmetic stays
/// integral: at `replenish` tokens per second, exactly `replenish`
/// milli-tokens accrue per millisecond. The refill stamp is a wrapping
/// u32 of milliseconds since the bucket was created; TTL eviction keeps
/// live buckets many orders of magnitude below the ~49-day wrap.
#[derive(Debug)]
pub struct TokenBucket {
    capacity_milli: u64,
    replenish_per_sec: u64,
    /// `(milli_tokens, last_refill_ms)` packed; see `pack`.
    state: AtomicU64,
    created: Instant,
    /// Millis since the registry epoch, for idle eviction.
    last_used: AtomicU64,
}

impl TokenBucket {
    pub fn new(replenish_per_sec: u64, capacity: u64, now: Instant) -> Self {
        let capacity_milli = capacity.saturating_mul(MILLI).min(u32::MAX as u64);
        Self {
            capacity_milli,
            replenish_per_sec,
            state: AtomicU64::new(pack(capacity_milli as u32, 0)),
            created: now,
            last_used: AtomicU64::new(0),
        }
    }

    fn stamp_ms(&self, now: Instant) -> u32 {
        now.saturating_duration_since(self.created).as_millis() as u32
    }

    /// Refill to `min(capacity, tokens + elapsed * rate)` and try to
    /// take one token. Returns the whole tokens remaining on success.
    ///
    /// The compare-exchange loop retries whenever another request won
    /// the race for the same state word; a rejection writes nothing, so
    /// pending refill keeps accruing against the old stamp.
    pub fn try_acquire_at(&self, now: Instant) -> Result<u64, ()> {
        let now_ms = self.stamp_ms(now);
        let mut observed = self.state.load(Ordering::Acquire);
        loop {
            let (milli_tokens, last_ms) = unpack(observed);
            let elapsed_ms = now_ms.wrapping_sub(last_ms) as u64;
            let refilled = (milli_tokens as u64)
                .saturating_add(elapsed_ms.saturating_mul(self.replenish_per_sec))
                .min(self.capacity_milli);

            if refilled < MILLI {
                return Err(());
            }

            let remaining = refilled - MILLI;
            let next = pack(remaining as u32, now_ms);
            match self.state.compare_exchange_weak(
                observed,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(remaining / MILLI),
                Err(actual) => observed = actual,
            }
        }
    }

    pub fn tokens(&self) -> f64 {
        let (milli_tokens, _) = unpack(self.state.load(Ordering::Acquire));
        milli_tokens as f64 / MILLI as f64
    }
}

/// Process-wide bucket registry keyed by resolved request dimension.
pub struct RateLimiterRegistry {
    buckets: scc::HashMap<String, Arc<TokenBucket>>,
    epoch: Instant,
    ttl: Duration,
}

impl RateLimiterRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            buckets: scc::HashMap::new(),
            epoch: Instant::now(),
            ttl,
        }
    }

    fn touch(&self, bucket: &TokenBucket, now: Instant) {
        let millis = now.saturating_duration_since(self.epoch).as_millis() as u64;
        bucket.last_used.store(millis, Ordering::Relaxed);
    }

    /// Fetch or lazily create the bucket for `key`.
    pub async fn bucket(
        &self,
        key: &str,
        replenish_per_sec: u64,
        capacity: u64,
    ) -> Arc<TokenBucket> {
        if let Some(entry) = self.buckets.get_async(key).await {
            return entry.get().clone();
        }
        let bucket = Arc::new(TokenBucket::new(replenish_per_sec, capacity, Instant::now()));
        match self.buckets.insert_async(key.to_string(), bucket.clone()).await {
            Ok(()) => bucket,
            // Lost the race; use whoever won.
            Err(_) => self
                .buckets
                .get_async(key)
                .await
                .map(|e| e.get().clone())
                .unwrap_or(bucket),
        }
    }

    pub async fn try_acquire(
        &self,
        key: &str,
        replenish_per_sec: u64,
        capacity: u64,
    ) -> Result<u64, ()> {
        let bucket = self.bucket(key, replenish_per_sec, capacity).await;
        let now = Instant::now();
        self.touch(&bucket, now);
        bucket.try_acquire_at(now)
    }

    /// Drop buckets idle longer than the TTL. Driven by an interval
    /// task owned by the lifecycle.
    pub async fn evict_idle(&self) {
        let cutoff_millis = Instant::now()
            .saturating_duration_since(self.epoch)
            .saturating_sub(self.ttl)
            .as_millis() as u64;

        self.buckets
            .retain_async(|_, bucket| bucket.last_used.load(Ordering::Relaxed) >= cutoff_millis)
            .await;
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

/// How the bucket key is derived from the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyStrategy {
    ClientIp,
    /// Keyed by a user-identifying header value.
    UserHeader(String),
    Path,
    IpAndPath,
}

impl KeyStrategy {
    /// Parse the `key` filter arg; unknown values fall back to client-ip.
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some("user") => KeyStrategy::UserHeader("X-User-Id".to_string()),
            Some("path") => KeyStrategy::Path,
            Some("ip-path") => KeyStrategy::IpAndPath,
            _ => KeyStrategy::ClientIp,
        }
    }

    fn resolve(&self, req: &GatewayRequest, ctx: &RequestContext) -> Option<String> {
        match self {
            KeyStrategy::ClientIp => Some(ctx.client_ip.clone()),
            KeyStrategy::UserHeader(name) => req
                .headers
                .get(name.as_str())
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            KeyStrategy::Path => Some(req.path.clone()),
            KeyStrategy::IpAndPath => Some(format!("{}:{}", ctx.client_ip, req.path)),
        }
    }
}

/// The `RequestRateLimiter` chain filter. Outermost in every compiled
/// chain.
pub struct RateLimitFilter {
    registry: Arc<RateLimiterRegistry>,
    route_id: String,
    replenish_per_sec: u64,
    burst_capacity: u64,
    strategy: KeyStrategy,
}

impl RateLimitFilter {
    pub fn new(
        registry: Arc<RateLimiterRegistry>,
        route_id: impl Into<String>,
        replenish_per_sec: u64,
        burst_capacity: u64,
        strategy: KeyStrategy,
    ) -> Self {
        Self {
            registry,
            route_id: route_id.into(),
            replenish_per_sec,
            burst_capacity,
            strategy,
        }
    }

    fn rejected_response(&self, ctx: &RequestContext) -> Response<Body> {
        let body = serde_json::json!({
            "status": 429,
            "message": "Too Many Requests",
            "correlationId": ctx.correlation_id,
        });
        let mut response = Response::builder()
            .status(StatusCode::TOO_MANY_REQUESTS)
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap_or_else(|_| Response::new(Body::empty()));
        self.set_limit_headers(&mut response, 0);
        response
    }

    fn set_limit_headers(&self, response: &mut Response<Body>, remaining: u64) {
        let headers = response.headers_mut();
        if let Ok(v) = HeaderValue::from_str(&remaining.to_string()) {
            headers.insert(HEADER_REMAINING, v);
        }
        if let Ok(v) = HeaderValue::from_str(&self.replenish_per_sec.to_string()) {
            headers.insert(HEADER_REPLENISH_RATE, v);
        }
        if let Ok(v) = HeaderValue::from_str(&self.burst_capacity.to_string()) {
            headers.insert(HEADER_BURST_CAPACITY, v);
        }
    }
}

#[async_trait]
impl GatewayFilter for RateLimitFilter {
    async fn apply(
        &self,
        req: GatewayRequest,
        ctx: &RequestContext,
        next: Next<'_>,
    ) -> FilterResult {
        let Some(dimension) = self.strategy.resolve(&req, ctx) else {
            // No key could be derived; fail open and admit.
            tracing::warn!(
                route_id = %self.route_id,
                "rate limit key unavailable, admitting request"
            );
            return next.run(req, ctx).await;
        };

        let key = format!("{}:{}", self.route_id, dimension);
        match self
            .registry
            .try_acquire(&key, self.replenish_per_sec, self.burst_capacity)
            .await
        {
            Ok(remaining) => {
                let mut response = next.run(req, ctx).await?;
                self.set_limit_headers(&mut response, remaining);
                Ok(response)
            }
            Err(()) => {
                ctx.mark_rate_limited();
                gw_metrics::increment_rate_limited(&self.route_id);
                tracing::debug!(
                    route_id = %self.route_id,
                    key = %dimension,
                    "rate limit exceeded"
                );
                Ok(self.rejected_response(ctx))
            }
        }
    }
}
