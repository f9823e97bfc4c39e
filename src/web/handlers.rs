//! HTTP request handlers.

use super::AppState;
use crate::db::{Ack, Cancel, Event};
use crate::engine::EngineError;
use crate::status::StatusError;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

fn error_response(e: EngineError) -> Response {
    let code = match &e {
        EngineError::UnknownEvent(_) | EngineError::Status(StatusError::UnknownEntity(_)) => {
            StatusCode::NOT_FOUND
        }
        EngineError::Resolve(_) => StatusCode::BAD_REQUEST,
        _ => {
            tracing::error!("Request failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (code, e.to_string()).into_response()
}

// ============================================================================
// Events
// ============================================================================

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ProcessResponse {
    /// Set while the entity is still alerting.
    pub entity_id: Option<String>,
}

pub async fn handle_post_event(
    State(state): State<AppState>,
    Json(event): Json<Event>,
) -> impl IntoResponse {
    let rk = event.routing_key();
    match state.engine.process_event(event) {
        Ok(entity_id) => Json(ProcessResponse { entity_id }).into_response(),
        Err(e) => {
            tracing::warn!(routing_key = %rk, "Event processing failed: {}", e);
            error_response(e)
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RoutingKeyQuery {
    pub rk: String,
}

pub async fn handle_get_event(
    State(state): State<AppState>,
    Query(query): Query<RoutingKeyQuery>,
) -> impl IntoResponse {
    match state.engine.event(&query.rk) {
        Ok(Some(event)) => Json(event).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "Event not found").into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn handle_get_log(
    State(state): State<AppState>,
    Query(query): Query<RoutingKeyQuery>,
) -> impl IntoResponse {
    match state.engine.history(&query.rk) {
        Ok(entries) => Json(entries).into_response(),
        Err(e) => error_response(e),
    }
}

// ============================================================================
// Statuses
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct EntityQuery {
    pub entity_id: String,
}

pub async fn handle_get_status(
    State(state): State<AppState>,
    Query(query): Query<EntityQuery>,
) -> impl IntoResponse {
    match state.engine.status(&query.entity_id) {
        Ok(Some(record)) => Json(record).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "Status not found").into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct BeatQuery {
    #[serde(default)]
    pub now: Option<i64>,
}

pub async fn handle_beat(
    State(state): State<AppState>,
    Query(query): Query<BeatQuery>,
) -> impl IntoResponse {
    let now = query.now.unwrap_or_else(|| Utc::now().timestamp());
    Json(state.engine.sweep(now))
}

// ============================================================================
// Ack & cancel
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ActionRequest {
    pub rk: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

impl ActionRequest {
    fn timestamp(&self) -> i64 {
        self.timestamp.unwrap_or_else(|| Utc::now().timestamp())
    }
}

pub async fn handle_ack(
    State(state): State<AppState>,
    Json(req): Json<ActionRequest>,
) -> impl IntoResponse {
    if req.author.is_empty() {
        return (StatusCode::BAD_REQUEST, "Author is required").into_response();
    }

    let ack = Ack {
        timestamp: req.timestamp(),
        author: req.author,
        comment: req.comment,
    };

    match state.engine.acknowledge(&req.rk, ack) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn handle_remove_ack(
    State(state): State<AppState>,
    Json(req): Json<ActionRequest>,
) -> impl IntoResponse {
    match state.engine.remove_ack(&req.rk) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn handle_cancel(
    State(state): State<AppState>,
    Json(req): Json<ActionRequest>,
) -> impl IntoResponse {
    if req.author.is_empty() {
        return (StatusCode::BAD_REQUEST, "Author is required").into_response();
    }

    let cancel = Cancel {
        timestamp: req.timestamp(),
        author: req.author,
        comment: req.comment,
    };

    match state.engine.cancel(&req.rk, cancel) {
        Ok(record) => Json(record).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn handle_uncancel(
    State(state): State<AppState>,
    Json(req): Json<ActionRequest>,
) -> impl IntoResponse {
    match state.engine.uncancel(&req.rk, req.timestamp()) {
        Ok(record) => Json(record).into_response(),
        Err(e) => error_response(e),
    }
}
