//! Gateway self-awareness probe.
//!
//! `GET /actuator/health` checks store reachability lazily on each
//! probe with a 2s hard timeout. UP means the store answered; DEGRADED
//! means the store is down but the critical fallback set is loaded, so
//! the data plane keeps serving and load balancers should keep the
//! instance in rotation; DOWN means neither.
use std::{sync::Arc, time::Duration};

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use serde_json::{Map, Value, json};

use crate::{core::breaker::BreakerRegistry, ports::route_store::RouteStore};

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Up,
    Degraded,
    Down,
}

impl HealthStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            HealthStatus::Up => "UP",
            HealthStatus::Degraded => "DEGRADED",
            HealthStatus::Down => "DOWN",
        }
    }
}

pub struct HealthState {
    pub store: Arc<dyn RouteStore>,
    pub breakers: Arc<BreakerRegistry>,
}

impl HealthState {
    pub async fn assess(&self) -> HealthStatus {
        let reachable = matches!(
            tokio::time::timeout(PROBE_TIMEOUT, self.store.ping()).await,
            Ok(Ok(()))
        );
        if reachable {
            HealthStatus::Up
        } else if !self.store.fallback_defs().is_empty() {
            tracing::warn!("store unreachable, serving from the fallback route set");
            HealthStatus::Degraded
        } else {
            HealthStatus::Down
        }
    }

    async fn breaker_component(&self) -> Value {
        let mut breakers = Map::new();
        for (name, state) in self.breakers.states().await {
            breakers.insert(name, Value::String(state.as_str().to_string()));
        }
        Value::Object(breakers)
    }
}

async fn health(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let status = state.assess().await;

    let gateway = match status {
        HealthStatus::Up => json!({
            "store": "connected",
            "routing": "dynamic",
            "fallback": "available",
        }),
        HealthStatus::Degraded => json!({
            "store": "disconnected",
            "routing": "fallback",
            "fallback": "active",
        }),
        HealthStatus::Down => json!({
            "store": "disconnected",
            "routing": "unavailable",
            "fallback": "empty",
        }),
    };

    let body = json!({
        "status": status.as_str(),
        "components": {
            "gateway": gateway,
            "circuitBreakers": state.breaker_component().await,
        },
    });

    let code = match status {
        // DEGRADED instances stay in rotation.
        HealthStatus::Up | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Down => StatusCode::SERVICE_UNAVAILABLE,
    };
    (code, Json(body))
}

pub fn router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/actuator/health", get(health))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::{
        adapters::memory::MemoryRouteStore,
        config::models::{PredicateDef, RouteDefinition},
        core::breaker::BreakerConfig,
        ports::route_store::RouteStore,
    };

    fn critical_def() -> RouteDefinition {
        RouteDefinition {
            id: "crit".into(),
            uri: "http://auth:9000".into(),
            predicates: vec![PredicateDef::path("/auth/**")],
            filters: vec![],
            order: 0,
            metadata: HashMap::from([("critical".to_string(), "true".to_string())]),
            enabled: true,
        }
    }

    fn state(store: Arc<MemoryRouteStore>) -> HealthState {
        HealthState {
            store,
            breakers: Arc::new(BreakerRegistry::new(BreakerConfig::default())),
        }
    }

    #[tokio::test]
    async fn reachable_store_is_up() {
        let store = Arc::new(MemoryRouteStore::new());
        assert_eq!(state(store).assess().await, HealthStatus::Up);
    }

    #[tokio::test]
    async fn outage_with_fallback_is_degraded() {
        let store = Arc::new(MemoryRouteStore::new());
        store.put(&critical_def()).await.unwrap();
        store.set_available(false);
        assert_eq!(state(store).assess().await, HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn outage_without_fallback_is_down() {
        let store = Arc::new(MemoryRouteStore::new());
        store.set_available(false);
        assert_eq!(state(store).assess().await, HealthStatus::Down);
    }

    #[tokio::test]
    async fn recovery_promotes_back_to_up() {
        let store = Arc::new(MemoryRouteStore::new());
        store.put(&critical_def()).await.unwrap();
        store.set_available(false);
        let health = state(store.clone());
        assert_eq!(health.assess().await, HealthStatus::Degraded);

        store.set_available(true);
        assert_eq!(health.assess().await, HealthStatus::Up);
    }
}
