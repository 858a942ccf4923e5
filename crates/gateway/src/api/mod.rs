pub mod execute;
pub mod intent_mapping;
pub mod scenarios;
pub mod sessions;
pub mod ws;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Build the full API router.
pub fn router() -> Router<AppState> {
    Router::new()
        // Liveness
        .route("/", get(root))
        .route("/health", get(health))
        // Turn execution (primary surface)
        .route("/api/v1/execute", post(execute::execute_turn))
        // Scenario upload/download
        .route("/api/upload-scenario", post(scenarios::upload_scenario))
        .route(
            "/api/download-scenario/:session_id",
            get(scenarios::download_scenario),
        )
        // Session management
        .route("/api/sessions", get(sessions::list_sessions))
        .route("/api/session/:session_id", get(sessions::get_session))
        .route("/api/reset-session/:session_id", post(sessions::reset_session))
        // Intent mapping
        .route("/api/intent-mapping", post(intent_mapping::update_intent_mapping))
        // Liveness event channel
        .route("/ws/:session_id", get(ws::session_ws))
}

async fn root() -> impl IntoResponse {
    Json(serde_json::json!({
        "service": "statecanvas",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Build a standardized JSON error response: `{ "error": "<message>" }`.
pub(crate) fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}
