//! Administrative control plane for dynamic route management.
//!
//! Thin REST surface over the route store: changes persist to the
//! remote hash and take effect through the store's change notifications
//! without a restart. Definitions are validated here so a bad record is
//! rejected before it can reach a snapshot.
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get},
};
use serde_json::json;

use crate::{
    config::models::RouteDefinition,
    config::validation::RouteDefinitionValidator,
    ports::route_store::{RouteStore, StoreError},
};

pub struct AdminState {
    pub store: Arc<dyn RouteStore>,
}

async fn list_routes(State(state): State<Arc<AdminState>>) -> impl IntoResponse {
    match state.store.load_all().await {
        Ok(defs) => (StatusCode::OK, Json(defs)),
        // Store down: answer with the fallback set rather than failing.
        Err(StoreError::Unavailable(reason)) => {
            tracing::warn!(%reason, "store unavailable, listing fallback routes");
            (StatusCode::OK, Json(state.store.fallback_defs()))
        }
        Err(error) => {
            tracing::error!(error = %error, "failed to list routes");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(Vec::new()))
        }
    }
}

async fn put_route(
    State(state): State<Arc<AdminState>>,
    Json(def): Json<RouteDefinition>,
) -> impl IntoResponse {
    if let Err(error) = RouteDefinitionValidator::validate(&def) {
        tracing::warn!(route_id = %def.id, error = %error, "rejected route definition");
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": error.to_string() })),
        );
    }

    match state.store.put(&def).await {
        Ok(()) => {
            tracing::info!(route_id = %def.id, uri = %def.uri, "route saved");
            (StatusCode::CREATED, Json(serde_json::to_value(&def).unwrap_or_default()))
        }
        Err(error) => {
            tracing::error!(route_id = %def.id, error = %error, "failed to save route");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": error.to_string() })),
            )
        }
    }
}

async fn delete_route(
    State(state): State<Arc<AdminState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.delete(&id).await {
        Ok(()) => {
            tracing::info!(route_id = %id, "route deleted");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(error) => {
            tracing::error!(route_id = %id, error = %error, "failed to delete route");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": error.to_string() })),
            )
                .into_response()
        }
    }
}

pub fn router(state: Arc<AdminState>) -> Router {
    Router::new()
        .route("/admin/routes", get(list_routes).post(put_route))
        .route("/admin/routes/{id}", delete(delete_route))
        .with_state(state)
}
