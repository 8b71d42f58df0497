//! Snapshot-based route resolution.
//!
//! The resolver holds the current `RouteSnapshot` behind an atomic
//! pointer. The compiler (single writer) swaps in complete snapshots;
//! request tasks (many readers) load the pointer once per request and
//! keep their `Arc<CompiledRoute>` until the response completes, so a
//! mid-flight swap never changes a request's filter chain.
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::core::route::{CompiledRoute, RouteSnapshot};

pub struct RouteResolver {
    snapshot: ArcSwap<RouteSnapshot>,
}

impl RouteResolver {
    pub fn new(initial: Arc<RouteSnapshot>) -> Self {
        Self {
            snapshot: ArcSwap::new(initial),
        }
    }

    pub fn empty() -> Self {
        Self::new(Arc::new(RouteSnapshot::default()))
    }

    /// The snapshot currently being served.
    pub fn current(&self) -> Arc<RouteSnapshot> {
        self.snapshot.load_full()
    }

    /// Install a freshly compiled snapshot. Readers pick it up on their
    /// next request; in-flight requests finish on the old one.
    pub fn install(&self, snapshot: Arc<RouteSnapshot>) {
        tracing::info!(routes = snapshot.len(), "installed route snapshot");
        self.snapshot.store(snapshot);
    }

    /// Pick at most one route for the request path.
    pub fn resolve(&self, path: &str) -> Option<Arc<CompiledRoute>> {
        self.snapshot.load().resolve(path)
    }
}
