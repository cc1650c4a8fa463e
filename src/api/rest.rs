// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`. The chart renderer creates a display
// session, polls (or subscribes to) its snapshot, and pushes parameter
// changes. Deleting a session cancels its refresh task.
//
// CORS is configured permissively so a browser dashboard on another origin
// can consume the table.
// =============================================================================

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::app_state::{AppState, SessionError};
use crate::session::SessionParamsUpdate;
use crate::types::{Granularity, Instrument, INSTRUMENTS};

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Service ─────────────────────────────────────────────────
        .route("/api/v1/health", get(health))
        .route("/api/v1/instruments", get(instruments))
        .route("/api/v1/granularities", get(granularities))
        // ── Sessions ────────────────────────────────────────────────
        .route("/api/v1/sessions", axum::routing::post(create_session))
        .route(
            "/api/v1/sessions/:id",
            get(session_snapshot).delete(delete_session),
        )
        .route(
            "/api/v1/sessions/:id/params",
            axum::routing::put(update_params),
        )
        .route("/api/v1/sessions/:id/ws", get(crate::api::ws::ws_handler))
        // ── Middleware & State ───────────────────────────────────────
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Errors
// =============================================================================

impl IntoResponse for SessionError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            SessionError::NotFound => (StatusCode::NOT_FOUND, "session not found".to_string()),
            SessionError::LimitReached(max) => (
                StatusCode::SERVICE_UNAVAILABLE,
                format!("session limit of {max} reached"),
            ),
            SessionError::InvalidParams(e) if e.is_invalid_param() => {
                (StatusCode::BAD_REQUEST, e.to_string())
            }
            SessionError::InvalidParams(e) => (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
            SessionError::MalformedBody(msg) => (StatusCode::BAD_REQUEST, msg),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

// =============================================================================
// Service
// =============================================================================

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.health())
}

async fn instruments() -> Json<&'static [Instrument]> {
    Json(INSTRUMENTS)
}

#[derive(Serialize)]
struct GranularityEntry {
    code: &'static str,
    label: &'static str,
}

async fn granularities() -> impl IntoResponse {
    let entries: Vec<GranularityEntry> = Granularity::ALL
        .into_iter()
        .map(|g| GranularityEntry {
            code: g.code(),
            label: g.label(),
        })
        .collect();
    Json(entries)
}

// =============================================================================
// Sessions
// =============================================================================

/// Decode a parameter update. An empty body means "no changes".
fn parse_update(body: &[u8]) -> Result<SessionParamsUpdate, SessionError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(SessionParamsUpdate::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| SessionError::MalformedBody(format!("invalid session parameters: {e}")))
}

async fn create_session(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<impl IntoResponse, SessionError> {
    let update = parse_update(&body)?;
    let snapshot = state.create_session(update).map_err(|e| {
        warn!(error = ?e, "session creation rejected");
        e
    })?;

    info!(
        session_id = %snapshot.session_id,
        instrument = %snapshot.params.instrument,
        granularity = %snapshot.params.granularity,
        "session created via API"
    );

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "id": snapshot.session_id,
            "params": snapshot.params,
        })),
    ))
}

async fn session_snapshot(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, SessionError> {
    Ok(Json(state.session_snapshot(&id)?))
}

async fn update_params(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, SessionError> {
    let update = parse_update(&body)?;
    Ok(Json(state.update_session(&id, update)?))
}

async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, SessionError> {
    state.remove_session(&id)?;
    info!(session_id = %id, "session deleted via API");
    Ok(StatusCode::NO_CONTENT)
}
