//! Session inspection and reset endpoints.
//!
//! - `GET  /api/sessions` — active session ids
//! - `GET  /api/session/:session_id` — current state, stack, memory view
//! - `POST /api/reset-session/:session_id` — clear memory, restart at the
//!   initial state of the provided (or previously loaded) scenario

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use serde_json::Value;

use crate::api::api_error;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /api/sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    let sessions = state.repository.session_ids();
    Json(serde_json::json!({
        "sessions": sessions,
        "count": sessions.len(),
    }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /api/session/:session_id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    let snapshot = match state.engine.snapshot(&session_id).await {
        Ok(Some(snapshot)) => snapshot,
        Ok(None) => return api_error(StatusCode::NOT_FOUND, "session not found"),
        Err(e) => return api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };

    let current = snapshot.stack.last();
    Json(serde_json::json!({
        "sessionId": session_id,
        "currentState": current.map(|f| f.dialog_state_name.clone()),
        "currentPlan": current.map(|f| f.plan_name.clone()),
        "stackDepth": snapshot.stack.len(),
        "stack": snapshot.stack,
        "memoryKeys": snapshot.memory.keys().collect::<Vec<_>>(),
    }))
    .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /api/reset-session/:session_id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize, Default)]
pub struct ResetSessionBody {
    /// Scenario to (re)load before resetting. Optional when the session
    /// already has one.
    #[serde(default)]
    pub scenario: Option<Value>,
}

pub async fn reset_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    body: Option<Json<ResetSessionBody>>,
) -> Response {
    let body = body.map(|Json(b)| b).unwrap_or_default();

    if let Some(document) = &body.scenario {
        if let Err(e) = state.repository.load(&session_id, document) {
            return api_error(StatusCode::BAD_REQUEST, e.to_string());
        }
    }
    let Some(scenario) = state.repository.primary(&session_id) else {
        return api_error(StatusCode::NOT_FOUND, "no scenario loaded for session");
    };

    let _permit = state.session_locks.acquire(&session_id).await;
    match state.engine.reset_session(&scenario, &session_id).await {
        Ok(initial_state) => Json(serde_json::json!({
            "sessionId": session_id,
            "initialState": initial_state,
            "reset": true,
        }))
        .into_response(),
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
