//! Snapshot rebuilds: the configuration flow.
//!
//! Admin writes land in the store; the store emits route-changed
//! events; this task reloads the definition set, compiles a fresh
//! snapshot, and swaps it into the resolver. A periodic reconcile tick
//! covers missed events and store outages: while the store is down the
//! snapshot is rebuilt from the critical fallback set, and a successful
//! reload promotes the gateway back to the full remote set.
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use chrono::Utc;
use tokio::sync::broadcast;

use crate::{
    config::models::RouteDefinition,
    core::{compiler::RouteCompiler, resolver::RouteResolver},
    ports::route_store::{RouteChange, RouteStore},
    telemetry::{RouteChangeRecord, TelemetryPublisher},
};

pub struct SnapshotRebuilder {
    store: Arc<dyn RouteStore>,
    compiler: Arc<RouteCompiler>,
    resolver: Arc<RouteResolver>,
    publisher: TelemetryPublisher,
    store_available: AtomicBool,
}

impl SnapshotRebuilder {
    pub fn new(
        store: Arc<dyn RouteStore>,
        compiler: Arc<RouteCompiler>,
        resolver: Arc<RouteResolver>,
        publisher: TelemetryPublisher,
    ) -> Self {
        Self {
            store,
            compiler,
            resolver,
            publisher,
            store_available: AtomicBool::new(true),
        }
    }

    pub fn store_available(&self) -> bool {
        self.store_available.load(Ordering::Relaxed)
    }

    /// Reload, compile, and swap. Returns the remote definitions when
    /// the store answered.
    pub async fn rebuild_once(&self) -> Option<Vec<RouteDefinition>> {
        match self.store.load_all().await {
            Ok(defs) => {
                let was_down = !self.store_available.swap(true, Ordering::Relaxed);
                if was_down {
                    tracing::info!("route store recovered, resuming dynamic routing");
                }
                let snapshot = self.compiler.compile_snapshot(&defs);
                self.resolver.install(Arc::new(snapshot));
                Some(defs)
            }
            Err(error) => {
                let was_up = self.store_available.swap(false, Ordering::Relaxed);
                if was_up {
                    tracing::warn!(
                        error = %error,
                        "route store unavailable, compiling fallback set"
                    );
                }
                let fallback = self.store.fallback_defs();
                let snapshot = self.compiler.compile_snapshot(&fallback);
                self.resolver.install(Arc::new(snapshot));
                None
            }
        }
    }

    /// React to one route-changed event: rebuild, then publish the
    /// lifecycle record onto the routes topic.
    pub async fn handle_change(&self, change: &RouteChange) {
        let remote = self.rebuild_once().await;

        let definition = remote.as_ref().and_then(|defs| {
            defs.iter()
                .find(|d| d.id == change.id)
                .and_then(|d| serde_json::to_value(d).ok())
        });

        self.publisher.publish_route_change(RouteChangeRecord {
            route_id: change.id.clone(),
            operation: change.op.as_str().to_string(),
            route_definition: definition,
            timestamp: Utc::now(),
        });
    }

    /// Drive rebuilds until the change channel closes. The reconcile
    /// interval reacts to outages and recoveries between events.
    pub async fn run(
        self: Arc<Self>,
        mut changes: broadcast::Receiver<RouteChange>,
        reconcile_every: Duration,
    ) {
        tracing::info!("snapshot rebuild task started");
        self.rebuild_once().await;

        let mut reconcile = tokio::time::interval(reconcile_every);
        reconcile.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        reconcile.tick().await; // the immediate first tick

        loop {
            tokio::select! {
                change = changes.recv() => match change {
                    Ok(change) => self.handle_change(&change).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "route change stream lagged, rebuilding");
                        self.rebuild_once().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = reconcile.tick() => {
                    self.rebuild_once().await;
                }
            }
        }
        tracing::info!("snapshot rebuild task stopped");
    }
}
