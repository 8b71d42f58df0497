//! Redis-backed route store.
//!
//! Definitions live in a single hash: field name is the route id, field
//! value is the UTF-8 JSON document. A `ConnectionManager` handles
//! reconnection after transient failures; if the very first connection
//! attempt fails the manager is created lazily on a later call, so a
//! gateway booted during a store outage promotes itself back to Up
//! without a restart.
//!
//! The store also owns the in-memory critical fallback set: seeded from
//! a local file at boot and kept in sync with upserts and deletes of
//! definitions marked `critical`.
use std::{collections::HashMap, sync::RwLock, time::Duration};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tokio::sync::broadcast;

use crate::{
    config::models::RouteDefinition,
    ports::route_store::{RouteChange, RouteChangeOp, RouteStore, StoreError, StoreResult},
};

const STORE_TIMEOUT: Duration = Duration::from_secs(2);

pub struct RedisRouteStore {
    client: redis::Client,
    manager: tokio::sync::RwLock<Option<ConnectionManager>>,
    route_key: String,
    fallback: RwLock<HashMap<String, RouteDefinition>>,
    events: broadcast::Sender<RouteChange>,
}

impl RedisRouteStore {
    pub fn new(address: &str, route_key: impl Into<String>) -> StoreResult<Self> {
        let client = redis::Client::open(address)
            .map_err(|e| StoreError::Unavailable(format!("invalid store address: {e}")))?;
        let (events, _) = broadcast::channel(64);
        Ok(Self {
            client,
            manager: tokio::sync::RwLock::new(None),
            route_key: route_key.into(),
            fallback: RwLock::new(HashMap::new()),
            events,
        })
    }

    /// Seed the critical fallback set from the local source.
    pub fn seed_fallback(&self, defs: Vec<RouteDefinition>) {
        let mut fallback = self.fallback.write().expect("fallback lock");
        for def in defs {
            fallback.insert(def.id.clone(), def);
        }
    }

    /// The cached connection manager, connecting lazily on first use.
    async fn connection(&self) -> StoreResult<ConnectionManager> {
        if let Some(manager) = self.manager.read().await.as_ref() {
            return Ok(manager.clone());
        }

        let mut slot = self.manager.write().await;
        // Double-checked: another task may have connected meanwhile.
        if let Some(manager) = slot.as_ref() {
            return Ok(manager.clone());
        }

        let manager = tokio::time::timeout(STORE_TIMEOUT, self.client.get_connection_manager())
            .await
            .map_err(|_| StoreError::Unavailable("store connection timed out".into()))?
            .map_err(|e| StoreError::Unavailable(format!("store connection failed: {e}")))?;

        tracing::info!("route store connection established");
        *slot = Some(manager.clone());
        Ok(manager)
    }

    fn notify(&self, id: &str, op: RouteChangeOp) {
        let _ = self.events.send(RouteChange {
            id: id.to_string(),
            op,
        });
    }

    fn update_fallback_on_put(&self, def: &RouteDefinition) {
        let mut fallback = self.fallback.write().expect("fallback lock");
        if def.is_critical() {
            fallback.insert(def.id.clone(), def.clone());
        } else {
            fallback.remove(&def.id);
        }
    }
}

#[async_trait]
impl RouteStore for RedisRouteStore {
    async fn put(&self, def: &RouteDefinition) -> StoreResult<()> {
        let json = serde_json::to_string(def)
            .map_err(|e| StoreError::Serialize(format!("route '{}': {e}", def.id)))?;

        let mut conn = self.connection().await?;
        redis::cmd("HSET")
            .arg(&self.route_key)
            .arg(&def.id)
            .arg(json)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        self.update_fallback_on_put(def);
        self.notify(&def.id, RouteChangeOp::Put);
        tracing::info!(route_id = %def.id, uri = %def.uri, "route definition saved");
        Ok(())
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        let mut conn = self.connection().await?;
        redis::cmd("HDEL")
            .arg(&self.route_key)
            .arg(id)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        self.fallback.write().expect("fallback lock").remove(id);
        self.notify(id, RouteChangeOp::Delete);
        tracing::info!(route_id = %id, "route definition deleted");
        Ok(())
    }

    async fn load_all(&self) -> StoreResult<Vec<RouteDefinition>> {
        let mut conn = self.connection().await?;
        let raw: Vec<String> = redis::cmd("HVALS")
            .arg(&self.route_key)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let mut defs = Vec::with_capacity(raw.len());
        for value in raw {
            match serde_json::from_str::<RouteDefinition>(&value) {
                Ok(def) => defs.push(def),
                // One corrupt entry must not take down the whole set.
                Err(error) => {
                    tracing::warn!(error = %error, "skipping unparseable route definition");
                }
            }
        }
        Ok(defs)
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
        let mut conn = self.connection().await?;
        let pong: String = tokio::time::timeout(
            STORE_TIMEOUT,
            redis::cmd("PING").query_async(&mut conn),
        )
        .await
        .map_err(|_| StoreError::Unavailable("store ping timed out".into()))?
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        if pong == "PONG" {
            Ok(())
        } else {
            Err(StoreError::Unavailable(format!(
                "unexpected ping reply: {pong}"
            )))
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<RouteChange> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::models::PredicateDef;

    fn critical_def(id: &str) -> RouteDefinition {
        RouteDefinition {
            id: id.into(),
            uri: "http://auth:9000".into(),
            predicates: vec![PredicateDef::path("/auth/**")],
            filters: vec![],
            order: 0,
            metadata: HashMap::from([("critical".to_string(), "true".to_string())]),
            enabled: true,
        }
    }

    #[test]
    fn rejects_malformed_address() {
        assert!(RedisRouteStore::new("not-a-redis-url", "routes.hash").is_err());
    }

    #[test]
    fn fallback_set_survives_without_a_connection() {
        let store = RedisRouteStore::new("redis://127.0.0.1:6379", "routes.hash").unwrap();
        store.seed_fallback(vec![critical_def("emergency-auth")]);

        let fallback = store.fallback_defs();
        assert_eq!(fallback.len(), 1);
        assert_eq!(fallback[0].id, "emergency-auth");
    }

    #[tokio::test]
    async fn unreachable_store_reports_unavailable() {
        // Nothing listens on this port; the lazy connect must fail fast.
        let store = RedisRouteStore::new("redis://127.0.0.1:1", "routes.hash").unwrap();
        assert!(matches!(
            store.ping().await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.load_all().await.is_err());
    }
}
