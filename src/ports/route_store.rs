use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::config::models::RouteDefinition;

/// Errors surfaced by a route store backend.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StoreError {
    /// The backing store cannot be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A stored definition could not be serialized or parsed.
    #[error("Serialization error: {0}")]
    Serialize(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A single route-changed notification, emitted after every successful
/// mutation so the compiler can rebuild the snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteChange {
    pub id: String,
    pub op: RouteChangeOp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteChangeOp {
    Put,
    Delete,
}

impl RouteChangeOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteChangeOp::Put => "PUT",
            RouteChangeOp::Delete => "DELETE",
        }
    }
}

/// RouteStore defines the port for durable route definition storage.
///
/// The remote set is authoritative while the store is reachable. The
/// fallback set holds critical definitions that must remain servable
/// through an outage; implementations keep it in memory.
#[async_trait]
pub trait RouteStore: Send + Sync {
    /// Upsert a definition by id, then emit a route-changed event.
    async fn put(&self, def: &RouteDefinition) -> StoreResult<()>;

    /// Remove a definition, then emit a route-changed event.
    async fn delete(&self, id: &str) -> StoreResult<()>;

    /// Load every definition currently in the remote set.
    async fn load_all(&self) -> StoreResult<Vec<RouteDefinition>>;

    /// The in-memory critical fallback set.
    fn fallback_defs(&self) -> Vec<RouteDefinition>;

    /// A PING-class reachability check against the backing store.
    async fn ping(&self) -> StoreResult<()>;

    /// Subscribe to route-changed notifications.
    fn subscribe(&self) -> broadcast::Receiver<RouteChange>;
}
