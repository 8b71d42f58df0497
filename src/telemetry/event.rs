//! Telemetry payloads.
//!
//! One `TelemetryEvent` is produced per gateway request and encoded as
//! JSON onto the bus. The schema is forward-compatible: consumers must
//! ignore unknown fields, and optional fields are omitted when absent.
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const TOPIC_TELEMETRY: &str = "gateway-telemetry";
pub const TOPIC_ERRORS: &str = "gateway-errors";
pub const TOPIC_ROUTES: &str = "gateway-routes";

pub const TELEMETRY_PARTITIONS: u32 = 3;
pub const ERRORS_PARTITIONS: u32 = 2;
pub const ROUTES_PARTITIONS: u32 = 1;

/// Events for one key always land on one partition, preserving
/// per-partition order for a route id.
pub fn partition_for(key: &str, partitions: u32) -> u32 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % partitions as u64) as u32
}

/// One request/response cycle as observed by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEvent {
    /// Route that handled the request; `None` on 404s.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route_id: Option<String>,
    pub path: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub latency_ms: u64,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: String,
    pub client_ip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub rate_limited: bool,
    pub circuit_breaker_triggered: bool,
    pub retry_count: u32,
    /// Set when the request terminated with a gateway-side error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TelemetryEvent {
    /// The bus key: route id, or `"unknown"` for unrouted requests.
    pub fn key(&self) -> &str {
        self.route_id.as_deref().unwrap_or("unknown")
    }

    /// Whether this event also belongs on the errors topic.
    pub fn is_error(&self) -> bool {
        self.status.map(|s| s >= 500).unwrap_or(true) || self.error.is_some()
    }
}

/// A route lifecycle event for the compaction-friendly routes topic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RouteChangeRecord {
    pub route_id: String,
    /// `PUT` or `DELETE`.
    pub operation: String,
    /// The serialized definition for upserts; omitted on delete.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route_definition: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}
