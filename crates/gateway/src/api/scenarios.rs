//! Scenario upload/download endpoints.
//!
//! - `POST /api/upload-scenario` — accepts one scenario document (object
//!   or list), loads it under a fresh session id, returns the id.
//! - `GET  /api/download-scenario/:session_id` — returns the stored
//!   scenario with legacy `apicalls` unified into `webhooks` and inline
//!   apicall `url` fields stripped.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::Value;

use sc_scenario::unify::prepare_for_download;

use crate::api::api_error;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /api/upload-scenario
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn upload_scenario(
    State(state): State<AppState>,
    Json(document): Json<Value>,
) -> Response {
    let session_id = uuid::Uuid::new_v4().to_string();
    match state.repository.load(&session_id, &document) {
        Ok(()) => {
            tracing::info!(session_id = %session_id, "scenario uploaded");
            Json(serde_json::json!({
                "sessionId": session_id,
                "message": "scenario loaded",
            }))
            .into_response()
        }
        Err(e) => api_error(StatusCode::BAD_REQUEST, e.to_string()),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /api/download-scenario/:session_id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn download_scenario(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    let Some(mut scenario) = state.repository.primary(&session_id) else {
        return api_error(StatusCode::NOT_FOUND, "scenario not found for session");
    };
    prepare_for_download(&mut scenario);
    Json(scenario).into_response()
}
