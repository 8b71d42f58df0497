use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BusError {
    #[error("Bus unavailable: {0}")]
    Unavailable(String),
}

pub type BusResult<T> = Result<T, BusError>;

/// TelemetryBus defines the port for delivering telemetry records to a
/// partitioned message bus.
///
/// Delivery is at-least-once: callers may re-send a record after an
/// error and consumers must tolerate duplicates. Records carrying the
/// same key land on the same partition, preserving per-partition order.
#[async_trait]
pub trait TelemetryBus: Send + Sync + 'static {
    /// Publish one record to `topic` on the partition derived from `key`.
    async fn publish(&self, topic: &str, partition: u32, key: &str, payload: &[u8])
    -> BusResult<()>;
}
