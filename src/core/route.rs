//! Compiled routes and path matching.
//!
//! A `CompiledRoute` is the immutable, request-path form of a
//! `RouteDefinition`: the original record plus an anchored path matcher
//! and the fully ordered filter chain ending in a proxy sink. Identity
//! is `(id, content_hash)`; any change to the definition yields a new
//! compiled instance while in-flight requests keep a reference to the
//! old one.
use std::{
    hash::{Hash, Hasher},
    sync::Arc,
};

use crate::{
    config::models::RouteDefinition,
    core::filter::{FilterResult, GatewayFilter, GatewayRequest, Next, ProxySink, RequestContext},
};

/// Anchored path pattern supporting `*` (exactly one segment) and `**`
/// (zero or more segments).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMatcher {
    segments: Vec<PatternSegment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PatternSegment {
    Literal(String),
    Single,
    Tail,
}

impl PathMatcher {
    pub fn new(pattern: &str) -> Self {
        let segments = pattern
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| match s {
                "*" => PatternSegment::Single,
                "**" => PatternSegment::Tail,
                lit => PatternSegment::Literal(lit.to_string()),
            })
            .collect();
        Self { segments }
    }

    pub fn matches(&self, path: &str) -> bool {
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        Self::match_from(&self.segments, &parts)
    }

    fn match_from(pattern: &[PatternSegment], path: &[&str]) -> bool {
        match pattern.split_first() {
            None => path.is_empty(),
            Some((PatternSegment::Tail, rest)) => {
                // `**` may swallow any number of segments, including none.
                (0..=path.len()).any(|skip| Self::match_from(rest, &path[skip..]))
            }
            Some((head, rest)) => match path.split_first() {
                None => false,
                Some((part, path_rest)) => {
                    let matched = match head {
                        PatternSegment::Literal(lit) => lit == part,
                        PatternSegment::Single => true,
                        PatternSegment::Tail => unreachable!(),
                    };
                    matched && Self::match_from(rest, path_rest)
                }
            },
        }
    }
}

/// Stable content hash over the serialized definition, part of the
/// compiled route's identity.
pub fn content_hash(def: &RouteDefinition) -> u64 {
    let serialized = serde_json::to_string(def).unwrap_or_default();
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    serialized.hash(&mut hasher);
    hasher.finish()
}

/// An immutable, ready-to-serve route. Every matcher must accept the
/// request path for the route to match.
pub struct CompiledRoute {
    definition: RouteDefinition,
    content_hash: u64,
    matchers: Vec<PathMatcher>,
    filters: Vec<Arc<dyn GatewayFilter>>,
    sink: Arc<dyn ProxySink>,
}

impl CompiledRoute {
    pub fn new(
        definition: RouteDefinition,
        matchers: Vec<PathMatcher>,
        filters: Vec<Arc<dyn GatewayFilter>>,
        sink: Arc<dyn ProxySink>,
    ) -> Self {
        let content_hash = content_hash(&definition);
        Self {
            definition,
            content_hash,
            matchers,
            filters,
            sink,
        }
    }

    pub fn id(&self) -> &str {
        &self.definition.id
    }

    pub fn order(&self) -> i32 {
        self.definition.order
    }

    pub fn content_hash(&self) -> u64 {
        self.content_hash
    }

    pub fn definition(&self) -> &RouteDefinition {
        &self.definition
    }

    pub fn matches(&self, path: &str) -> bool {
        !self.matchers.is_empty() && self.matchers.iter().all(|m| m.matches(path))
    }

    /// Number of stages ahead of the proxy sink.
    pub fn filter_count(&self) -> usize {
        self.filters.len()
    }

    /// Run the request through this route's filter chain.
    pub async fn handle(&self, req: GatewayRequest, ctx: &RequestContext) -> FilterResult {
        Next::new(&self.filters, self.sink.as_ref()).run(req, ctx).await
    }
}

impl std::fmt::Debug for CompiledRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledRoute")
            .field("id", &self.definition.id)
            .field("order", &self.definition.order)
            .field("content_hash", &self.content_hash)
            .field("filters", &self.filters.len())
            .finish()
    }
}

/// The full set of enabled compiled routes, sorted by `(order, id)`.
/// Snapshots are immutable; replacement is an atomic pointer swap.
#[derive(Debug, Default)]
pub struct RouteSnapshot {
    routes: Vec<Arc<CompiledRoute>>,
}

impl RouteSnapshot {
    pub fn new(mut routes: Vec<Arc<CompiledRoute>>) -> Self {
        routes.sort_by(|a, b| {
            a.order()
                .cmp(&b.order())
                .then_with(|| a.id().cmp(b.id()))
        });
        Self { routes }
    }

    pub fn routes(&self) -> &[Arc<CompiledRoute>] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// First match in ascending `(order, id)`; ties already resolved by
    /// the sort.
    pub fn resolve(&self, path: &str) -> Option<Arc<CompiledRoute>> {
        self.routes.iter().find(|r| r.matches(path)).cloned()
    }
}
