use thiserror::Error;

/// Discriminated error kinds flowing through the filter chain.
///
/// Retryability is a property of the kind, never of a panic or a thrown
/// type: transport-class upstream failures retry, everything else
/// surfaces as-is. Every variant maps to a concrete HTTP response at
/// the top of the chain, so errors never escape the request handler.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GatewayError {
    /// No enabled route matched the request.
    #[error("No route matched")]
    NoRoute,

    /// The upstream call failed at the transport layer (connect, IO,
    /// or timeout). Always retryable.
    #[error("Upstream transport failure: {0}")]
    Transport(String),

    /// The request deadline elapsed; no further attempts are scheduled.
    #[error("Request deadline exceeded")]
    DeadlineExceeded,

    /// A circuit breaker short-circuited the call. Carries the local
    /// fallback path the response is served from.
    #[error("Circuit breaker '{breaker}' is open")]
    BreakerOpen { breaker: String, fallback: String },

    /// Anything else; surfaces as a synthesized 500.
    #[error("Internal gateway error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Transport-class failures may be retried by the retry filter.
    pub fn is_retryable_transport(&self) -> bool {
        matches!(self, GatewayError::Transport(_))
    }

    /// The status synthesized when this error reaches the top of the chain.
    pub fn status(&self) -> http::StatusCode {
        match self {
            GatewayError::NoRoute => http::StatusCode::NOT_FOUND,
            GatewayError::Transport(_) => http::StatusCode::BAD_GATEWAY,
            GatewayError::DeadlineExceeded => http::StatusCode::GATEWAY_TIMEOUT,
            GatewayError::BreakerOpen { .. } => http::StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Internal(_) => http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
