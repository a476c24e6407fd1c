use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;

use crate::api::error::ApiError;
use crate::api::AppState;
use crate::models::{Event, EventCreated};

/// POST /api/events - Store an event and announce it on the bus
pub async fn create(
    State(state): State<AppState>,
    Json(mut event): Json<Event>,
) -> Result<impl IntoResponse, ApiError> {
    event.ensure_id();
    let id = state.store.create(event.clone()).await?;

    // The write above is authoritative; a lost notification is only logged
    let payload = EventCreated::from(&event);
    if let Err(e) = state.bus.publish_event(&payload).await {
        tracing::warn!(event_id = %id, error = %e, "failed to publish event.created");
    }

    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, format!("/api/events/id/{}", id))],
    ))
}

/// GET /api/events/id/:id
pub async fn read_by_id(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Event>, ApiError> {
    Ok(Json(state.store.get_by_id(&id).await?))
}

/// GET /api/events/name/:name
pub async fn read_by_name(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Event>, ApiError> {
    Ok(Json(state.store.get_by_name(&name).await?))
}

/// GET /api/events
pub async fn read_all(State(state): State<AppState>) -> Result<Json<Vec<Event>>, ApiError> {
    Ok(Json(state.store.get_all().await?))
}
