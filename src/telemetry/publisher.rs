//! Non-blocking, at-least-once event publishing.
//!
//! Request tasks hand events to a bounded in-process queue with
//! `try_send`: a full queue drops the event and bumps a counter, never
//! blocking a response write. A single background worker drains the
//! queue in batches and delivers to the bus, retrying each record with
//! exponential backoff while producers keep enqueueing (and dropping on
//! overflow). Duplicates on the bus are possible and tolerated.
use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::sync::mpsc;

use crate::{
    config::models::TelemetryConfig,
    metrics as gw_metrics,
    ports::telemetry_bus::TelemetryBus,
    telemetry::event::{
        ERRORS_PARTITIONS, ROUTES_PARTITIONS, RouteChangeRecord, TELEMETRY_PARTITIONS,
        TOPIC_ERRORS, TOPIC_ROUTES, TOPIC_TELEMETRY, TelemetryEvent, partition_for,
    },
};

#[derive(Debug, Clone)]
pub enum QueueItem {
    Event(TelemetryEvent),
    RouteChanged(RouteChangeRecord),
}

/// Producer half, cheap to clone into every request task.
#[derive(Clone)]
pub struct TelemetryPublisher {
    tx: mpsc::Sender<QueueItem>,
    dropped: Arc<AtomicU64>,
}

impl TelemetryPublisher {
    /// Build the publisher and its worker. The caller spawns
    /// `TelemetryWorker::run` on the runtime.
    pub fn new(
        bus: Arc<dyn TelemetryBus>,
        config: &TelemetryConfig,
    ) -> (Self, TelemetryWorker) {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let dropped = Arc::new(AtomicU64::new(0));
        let publisher = Self {
            tx,
            dropped: dropped.clone(),
        };
        let worker = TelemetryWorker {
            rx,
            bus,
            backoff_initial: Duration::from_millis(config.publish_backoff.initial_ms),
            backoff_max: Duration::from_millis(config.publish_backoff.max_ms),
        };
        (publisher, worker)
    }

    /// Enqueue without blocking; overflow is a drop, not a wait.
    pub fn publish_event(&self, event: TelemetryEvent) {
        self.submit(QueueItem::Event(event));
    }

    pub fn publish_route_change(&self, record: RouteChangeRecord) {
        self.submit(QueueItem::RouteChanged(record));
    }

    fn submit(&self, item: QueueItem) {
        if self.tx.try_send(item).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            gw_metrics::increment_telemetry_dropped();
            tracing::debug!("telemetry queue full, dropping event");
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Consumer half: drains the queue and talks to the bus.
pub struct TelemetryWorker {
    rx: mpsc::Receiver<QueueItem>,
    bus: Arc<dyn TelemetryBus>,
    backoff_initial: Duration,
    backoff_max: Duration,
}

impl TelemetryWorker {
    const BATCH_SIZE: usize = 64;

    /// Run until every producer handle is gone and the queue is drained.
    pub async fn run(mut self) {
        tracing::info!("telemetry worker started");
        let mut batch = Vec::with_capacity(Self::BATCH_SIZE);
        loop {
            batch.clear();
            let received = self.rx.recv_many(&mut batch, Self::BATCH_SIZE).await;
            if received == 0 {
                break;
            }
            for item in batch.drain(..) {
                self.deliver_with_backoff(item).await;
            }
        }
        tracing::info!("telemetry worker stopped");
    }

    /// At-least-once: keep retrying one record until the bus takes it.
    async fn deliver_with_backoff(&self, item: QueueItem) {
        let mut backoff = self.backoff_initial;
        loop {
            match self.deliver(&item).await {
                Ok(()) => {
                    gw_metrics::increment_telemetry_published();
                    return;
                }
                Err(error) => {
                    tracing::warn!(
                        error = %error,
                        backoff_ms = backoff.as_millis() as u64,
                        "bus delivery failed, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.backoff_max);
                }
            }
        }
    }

    async fn deliver(&self, item: &QueueItem) -> Result<(), crate::ports::telemetry_bus::BusError> {
        match item {
            QueueItem::Event(event) => {
                let key = event.key().to_string();
                let payload = serde_json::to_vec(event).unwrap_or_default();
                self.bus
                    .publish(
                        TOPIC_TELEMETRY,
                        partition_for(&key, TELEMETRY_PARTITIONS),
                        &key,
                        &payload,
                    )
                    .await?;

                if event.is_error() {
                    self.bus
                        .publish(
                            TOPIC_ERRORS,
                            partition_for(&key, ERRORS_PARTITIONS),
                            &key,
                            &payload,
                        )
                        .await?;
                }
                Ok(())
            }
            QueueItem::RouteChanged(record) => {
                let payload = serde_json::to_vec(record).unwrap_or_default();
                self.bus
                    .publish(
                        TOPIC_ROUTES,
                        partition_for(&record.route_id, ROUTES_PARTITIONS),
                        &record.route_id,
                        &payload,
                    )
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::adapters::memory::MemoryBus;

    fn config(capacity: usize) -> TelemetryConfig {
        TelemetryConfig {
            queue_capacity: capacity,
            ..TelemetryConfig::default()
        }
    }

    fn event(route_id: &str, status: u16) -> TelemetryEvent {
        TelemetryEvent {
            route_id: Some(route_id.into()),
            path: "/x".into(),
            method: "GET".into(),
            status: Some(status),
            latency_ms: 1,
            timestamp: Utc::now(),
            correlation_id: "cid".into(),
            client_ip: "1.2.3.4".into(),
            user_agent: None,
            rate_limited: false,
            circuit_breaker_triggered: false,
            retry_count: 0,
            error: None,
        }
    }

    #[tokio::test]
    async fn delivers_events_to_the_telemetry_topic() {
        let bus = Arc::new(MemoryBus::new());
        let (publisher, worker) = TelemetryPublisher::new(bus.clone(), &config(16));

        publisher.publish_event(event("inv", 200));
        drop(publisher);
        worker.run().await;

        let records = bus.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].topic, TOPIC_TELEMETRY);
        assert_eq!(records[0].key, "inv");
        assert!(records[0].partition < TELEMETRY_PARTITIONS);
    }

    #[tokio::test]
    async fn server_errors_fan_out_to_errors_topic() {
        let bus = Arc::new(MemoryBus::new());
        let (publisher, worker) = TelemetryPublisher::new(bus.clone(), &config(16));

        publisher.publish_event(event("inv", 503));
        drop(publisher);
        worker.run().await;

        let topics: Vec<String> = bus.records().iter().map(|r| r.topic.clone()).collect();
        assert_eq!(topics, vec![TOPIC_TELEMETRY, TOPIC_ERRORS]);
    }

    #[tokio::test]
    async fn overflow_drops_and_counts_instead_of_blocking() {
        let bus = Arc::new(MemoryBus::new());
        let (publisher, _worker) = TelemetryPublisher::new(bus, &config(2));

        // Worker never runs: the queue holds 2, the rest must drop.
        for _ in 0..10 {
            publisher.publish_event(event("inv", 200));
        }
        assert_eq!(publisher.dropped(), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn bus_outage_is_retried_until_delivery() {
        let bus = Arc::new(MemoryBus::failing(3));
        let (publisher, worker) = TelemetryPublisher::new(bus.clone(), &config(16));

        publisher.publish_event(event("inv", 200));
        drop(publisher);
        worker.run().await;

        // Three rejections, then success: at-least-once achieved.
        assert_eq!(bus.records().len(), 1);
        assert_eq!(bus.failures_seen(), 3);
    }

    #[tokio::test]
    async fn route_changes_land_on_the_routes_topic() {
        let bus = Arc::new(MemoryBus::new());
        let (publisher, worker) = TelemetryPublisher::new(bus.clone(), &config(16));

        publisher.publish_route_change(RouteChangeRecord {
            route_id: "inv".into(),
            operation: "PUT".into(),
            route_definition: Some(serde_json::json!({"id": "inv"})),
            timestamp: Utc::now(),
        });
        drop(publisher);
        worker.run().await;

        let records = bus.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].topic, TOPIC_ROUTES);
        assert_eq!(records[0].partition, 0);
    }

    #[tokio::test]
    async fn same_key_always_hits_same_partition() {
        let bus = Arc::new(MemoryBus::new());
        let (publisher, worker) = TelemetryPublisher::new(bus.clone(), &config(64));

        for _ in 0..10 {
            publisher.publish_event(event("inv", 200));
        }
        drop(publisher);
        worker.run().await;

        let partitions: std::collections::HashSet<u32> =
            bus.records().iter().map(|r| r.partition).collect();
        assert_eq!(partitions.len(), 1);
    }
}
