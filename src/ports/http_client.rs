use async_trait::async_trait;
use axum::body::Body;
use hyper::{Request, Response};
use thiserror::Error;

/// Custom error type for upstream HTTP client operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpClientError {
    /// Error when connection to the upstream fails
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Error when the request exceeds its timeout
    #[error("Timeout error after {0:?}")]
    Timeout(std::time::Duration),

    /// Error when the request is invalid
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl HttpClientError {
    /// Transport-class failures are retryable; malformed requests are not.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            HttpClientError::ConnectionError(_) | HttpClientError::Timeout(_)
        )
    }
}

/// Result type alias for HTTP client operations
pub type HttpClientResult<T> = Result<T, HttpClientError>;

/// HttpClient defines the port (interface) for making HTTP requests to
/// upstream services. Implementations must pool connections per host.
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    /// Send an HTTP request to an upstream server.
    async fn send_request(&self, req: Request<Body>) -> HttpClientResult<Response<Body>>;
}
