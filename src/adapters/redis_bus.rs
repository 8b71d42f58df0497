//! Stream-backed telemetry bus adapter.
//!
//! Each `(topic, partition)` pair maps to one stream named
//! `{topic}.{partition}`; records are appended with `XADD`, carrying
//! the key and the JSON payload as fields. Appends are atomic and
//! acknowledged by the leader, which together with the publisher's
//! retry loop gives at-least-once delivery; consumers dedupe by stream
//! entry id when they care.
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;

use crate::ports::telemetry_bus::{BusError, BusResult, TelemetryBus};

const BUS_TIMEOUT: Duration = Duration::from_secs(2);

pub struct RedisStreamBus {
    client: redis::Client,
    manager: tokio::sync::RwLock<Option<ConnectionManager>>,
}

impl RedisStreamBus {
    pub fn new(bootstrap: &str) -> BusResult<Self> {
        let client = redis::Client::open(bootstrap)
            .map_err(|e| BusError::Unavailable(format!("invalid bus address: {e}")))?;
        Ok(Self {
            client,
            manager: tokio::sync::RwLock::new(None),
        })
    }

    async fn connection(&self) -> BusResult<ConnectionManager> {
        if let Some(manager) = self.manager.read().await.as_ref() {
            return Ok(manager.clone());
        }

        let mut slot = self.manager.write().await;
        if let Some(manager) = slot.as_ref() {
            return Ok(manager.clone());
        }

        let manager = tokio::time::timeout(BUS_TIMEOUT, self.client.get_connection_manager())
            .await
            .map_err(|_| BusError::Unavailable("bus connection timed out".into()))?
            .map_err(|e| BusError::Unavailable(format!("bus connection failed: {e}")))?;

        tracing::info!("telemetry bus connection established");
        *slot = Some(manager.clone());
        Ok(manager)
    }
}

#[async_trait]
impl TelemetryBus for RedisStreamBus {
    async fn publish(
        &self,
        topic: &str,
        partition: u32,
        key: &str,
        payload: &[u8],
    ) -> BusResult<()> {
        let mut conn = self.connection().await?;
        let stream = format!("{topic}.{partition}");

        tokio::time::timeout(
            BUS_TIMEOUT,
            redis::cmd("XADD")
                .arg(&stream)
                .arg("*")
                .arg("key")
                .arg(key)
                .arg("payload")
                .arg(payload)
                .query_async::<String>(&mut conn),
        )
        .await
        .map_err(|_| BusError::Unavailable("bus publish timed out".into()))?
        .map_err(|e| BusError::Unavailable(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_bootstrap() {
        assert!(RedisStreamBus::new("definitely not a url").is_err());
    }

    #[tokio::test]
    async fn unreachable_bus_reports_unavailable() {
        let bus = RedisStreamBus::new("redis://127.0.0.1:1").unwrap();
        assert!(matches!(
            bus.publish("gateway-telemetry", 0, "inv", b"{}").await,
            Err(BusError::Unavailable(_))
        ));
    }
}
