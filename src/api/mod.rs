pub mod error;
pub mod events;

use std::sync::Arc;

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use crate::bus::Bus;
use crate::db::EventStore;

// ============================================================================
// Application state
// ============================================================================

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn EventStore>,
    pub bus: Bus,
}

// ============================================================================
// Health check handler
// ============================================================================

async fn health_check(State(state): State<AppState>) -> Response {
    Json(json!({"status": "ok", "bus": state.bus.is_alive()})).into_response()
}

// ============================================================================
// Router
// ============================================================================

pub fn router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Event routes
        .route("/api/events", get(events::read_all).post(events::create))
        .route("/api/events/id/:id", get(events::read_by_id))
        .route("/api/events/name/:name", get(events::read_by_name))
        .with_state(state)
}
