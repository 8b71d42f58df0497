//! Bounded retry with exponential backoff and jitter.
//!
//! The retry filter wraps the breaker and proxy stages: every attempt
//! re-enters the breaker so it observes per-attempt outcomes, and a
//! rate-limit rejection upstream of this filter never spends retry
//! budget. A failure is re-attempted only when the method is allowed,
//! the outcome is in the retryable set (listed statuses or a
//! transport-class error), budget remains, and the backoff still fits
//! inside the request deadline.
use std::time::Duration;

use async_trait::async_trait;
use http::Method;
use rand::Rng;

use crate::{
    core::filter::{FilterResult, GatewayFilter, GatewayRequest, Next, RequestContext},
    metrics as gw_metrics,
};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Additional attempts after the first.
    pub retries: u32,
    pub statuses: Vec<u16>,
    pub methods: Vec<Method>,
    pub base: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            statuses: vec![502, 503],
            methods: vec![Method::GET, Method::POST, Method::PUT, Method::DELETE],
            base: Duration::from_millis(500),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Backoff before attempt `k + 1`, where `k` counts completed
    /// attempts starting at 1: `base * multiplier^(k-1)` plus uniform
    /// jitter in `[0, wait/2]`.
    pub fn backoff(&self, completed_attempts: u32) -> Duration {
        let exponent = completed_attempts.saturating_sub(1);
        let wait = self.base.as_secs_f64() * self.multiplier.powi(exponent as i32);
        let jitter = rand::rng().random_range(0.0..=wait / 2.0);
        Duration::from_secs_f64(wait + jitter)
    }
}

pub struct RetryFilter {
    route_id: String,
    policy: RetryPolicy,
}

impl RetryFilter {
    pub fn new(route_id: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            route_id: route_id.into(),
            policy,
        }
    }

    fn is_retryable(&self, method_allowed: bool, result: &FilterResult) -> bool {
        if !method_allowed {
            return false;
        }
        match result {
            Ok(response) => self.policy.statuses.contains(&response.status().as_u16()),
            Err(error) => error.is_retryable_transport(),
        }
    }

    fn log_attempt(&self, attempt: u32, delay: Duration, outcome: &str) {
        match attempt {
            1 => tracing::warn!(
                route_id = %self.route_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                outcome,
                "retrying request"
            ),
            2 => tracing::warn!(
                route_id = %self.route_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                outcome,
                "retrying request again"
            ),
            _ => tracing::error!(
                route_id = %self.route_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                outcome,
                "retry budget nearly exhausted"
            ),
        }
    }
}

#[async_trait]
impl GatewayFilter for RetryFilter {
    async fn apply(
        &self,
        req: GatewayRequest,
        ctx: &RequestContext,
        next: Next<'_>,
    ) -> FilterResult {
        let method_allowed = self.policy.methods.contains(&req.method);
        let mut completed = 0u32;

        loop {
            let result = next.run(req.clone(), ctx).await;
            completed += 1;

            if !self.is_retryable(method_allowed, &result) || completed > self.policy.retries {
                return result;
            }

            let delay = self.policy.backoff(completed);
            // Never schedule an attempt the deadline cannot accommodate.
            match ctx.remaining() {
                Some(remaining) if remaining > delay => {}
                _ => {
                    tracing::debug!(
                        route_id = %self.route_id,
                        "deadline reached, abandoning retry"
                    );
                    return result;
                }
            }

            let outcome = match &result {
                Ok(response) => response.status().as_str().to_string(),
                Err(error) => error.to_string(),
            };
            self.log_attempt(completed, delay, &outcome);

            tokio::time::sleep(delay).await;
            ctx.record_retry();
            gw_metrics::increment_retries(&self.route_id);
        }
    }
}
