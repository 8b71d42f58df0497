//! In-memory adapters.
//!
//! `MemoryRouteStore` keeps the full route set in process. It backs the
//! test suites and store-less deployments, and its availability toggle
//! makes outage behavior exercisable without a real backend.
//! `MemoryBus` records published telemetry instead of shipping it.
use std::{
    collections::HashMap,
    sync::{
        Mutex, RwLock,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
};

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::{
    config::models::RouteDefinition,
    ports::{
        route_store::{RouteChange, RouteChangeOp, RouteStore, StoreError, StoreResult},
        telemetry_bus::{BusError, BusResult, TelemetryBus},
    },
};

pub struct MemoryRouteStore {
    routes: RwLock<HashMap<String, RouteDefinition>>,
    fallback: RwLock<HashMap<String, RouteDefinition>>,
    available: AtomicBool,
    events: broadcast::Sender<RouteChange>,
}

impl MemoryRouteStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            routes: RwLock::new(HashMap::new()),
            fallback: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
            events,
        }
    }

    /// Seed the critical fallback set, normally loaded from a local file.
    pub fn seed_fallback(&self, defs: Vec<RouteDefinition>) {
        let mut fallback = self.fallback.write().expect("fallback lock");
        for def in defs {
            fallback.insert(def.id.clone(), def);
        }
    }

    /// Simulate (or clear) a store outage.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store marked down".into()))
        }
    }

    fn notify(&self, id: &str, op: RouteChangeOp) {
        let _ = self.events.send(RouteChange {
            id: id.to_string(),
            op,
        });
    }
}

impl Default for MemoryRouteStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RouteStore for MemoryRouteStore {
    async fn put(&self, def: &RouteDefinition) -> StoreResult<()> {
        self.check_available()?;
        self.routes
            .write()
            .expect("routes lock")
            .insert(def.id.clone(), def.clone());
        if def.is_critical() {
            self.fallback
                .write()
                .expect("fallback lock")
                .insert(def.id.clone(), def.clone());
        }
        self.notify(&def.id, RouteChangeOp::Put);
        Ok(())
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        self.check_available()?;
        self.routes.write().expect("routes lock").remove(id);
        self.fallback.write().expect("fallback lock").remove(id);
        self.notify(id, RouteChangeOp::Delete);
        Ok(())
    }

    async fn load_all(&self) -> StoreResult<Vec<RouteDefinition>> {
        self.check_available()?;
        Ok(self
            .routes
            .read()
            .expect("routes lock")
            .values()
            .cloned()
            .collect())
    }

    fn fallback_defs(&self) -> Vec<RouteDefinition> {
        self.fallback
            .read()
            .expect("fallback lock")
            .values()
            .cloned()
            .collect()
    }

    async fn ping(&self) -> StoreResult<()> {
        self.check_available()
    }

    fn subscribe(&self) -> broadcast::Receiver<RouteChange> {
        self.events.subscribe()
    }
}

/// One record as the bus saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedMessage {
    pub topic: String,
    pub partition: u32,
    pub key: String,
    pub payload: Vec<u8>,
}

pub struct MemoryBus {
    records: Mutex<Vec<RecordedMessage>>,
    fail_remaining: AtomicU32,
    failures_seen: AtomicU32,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::failing(0)
    }

    /// Reject the first `failures` publishes, then accept everything.
    pub fn failing(failures: u32) -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            fail_remaining: AtomicU32::new(failures),
            failures_seen: AtomicU32::new(0),
        }
    }

    pub fn records(&self) -> Vec<RecordedMessage> {
        self.records.lock().expect("records lock").clone()
    }

    pub fn failures_seen(&self) -> u32 {
        self.failures_seen.load(Ordering::Relaxed)
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TelemetryBus for MemoryBus {
    async fn publish(
        &self,
        topic: &str,
        partition: u32,
        key: &str,
        payload: &[u8],
    ) -> BusResult<()> {
        if self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            self.failures_seen.fetch_add(1, Ordering::Relaxed);
            return Err(BusError::Unavailable("simulated bus outage".into()));
        }

        self.records.lock().expect("records lock").push(RecordedMessage {
            topic: topic.to_string(),
            partition,
            key: key.to_string(),
            payload: payload.to_vec(),
        });
        Ok(())
    }
}
