//! Turn execution endpoint.
//!
//! `POST /api/v1/execute` — the primary surface. Resolves the session's
//! scenario (already-loaded, inline in the body, or from `SCENARIO_DIR`
//! by the `<botId>-<botVersion>.json` convention), serializes the turn
//! behind the session lock, runs the engine, and answers with the
//! response record.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use serde_json::Value;

use sc_domain::scenario::Scenario;
use sc_domain::Error;
use sc_engine::{build_error_response, build_response, ResponseOptions, TurnRequest};

use crate::api::api_error;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request body
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteBody {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub bot_id: String,
    #[serde(default)]
    pub bot_version: String,
    #[serde(default)]
    pub bot_name: String,
    #[serde(default)]
    pub bot_resource_path: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub user_input: Value,
    #[serde(default)]
    pub context: Value,
    #[serde(default)]
    pub headers: Value,
    /// Explicit state override; wins over the persisted stack.
    #[serde(default)]
    pub current_state: Option<String>,
    /// Manual event trigger.
    #[serde(default)]
    pub event_type: Option<String>,
    /// Inline scenario document (object or list); loaded for the session
    /// when present.
    #[serde(default)]
    pub scenario: Option<Value>,
}

/// The pieces of `userInput` the engine consumes.
struct ParsedInput {
    text: Option<String>,
    nlu_result: Option<Value>,
    custom_event: Option<Value>,
}

fn parse_user_input(user_input: &Value) -> ParsedInput {
    let mut parsed = ParsedInput {
        text: None,
        nlu_result: None,
        custom_event: None,
    };
    let Some(kind) = user_input.get("type").and_then(Value::as_str) else {
        return parsed;
    };
    let content = user_input.get("content").cloned().unwrap_or(Value::Null);

    match kind {
        "text" => {
            parsed.text = content
                .get("text")
                .and_then(Value::as_str)
                .map(str::to_owned)
                .filter(|t| !t.trim().is_empty());
            parsed.nlu_result = content.get("nluResult").cloned().filter(|v| !v.is_null());
        }
        "customEvent" => {
            parsed.custom_event = Some(serde_json::json!({
                "type": content.get("type").and_then(Value::as_str).unwrap_or(""),
                "content": content,
            }));
        }
        other => {
            tracing::warn!(kind = %other, "unknown userInput type, ignoring");
        }
    }
    parsed
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /api/v1/execute
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn execute_turn(
    State(state): State<AppState>,
    Json(body): Json<ExecuteBody>,
) -> Response {
    let session_id = body
        .session_id
        .clone()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let request_id = body
        .request_id
        .clone()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| {
            format!("req-{}", &uuid::Uuid::new_v4().simple().to_string()[..8])
        });

    // Serialize turns per session: arrival order within a session, full
    // concurrency across sessions.
    let _permit = state.session_locks.acquire(&session_id).await;

    let scenario = match resolve_scenario(&state, &session_id, &body) {
        Ok(scenario) => Arc::new(scenario),
        Err(e) => {
            tracing::warn!(session_id = %session_id, error = %e, "scenario resolution failed");
            let status = match &e {
                Error::ScenarioLoad(_) => StatusCode::BAD_REQUEST,
                Error::Io(_) => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            return api_error(status, e.to_string());
        }
    };

    let parsed = parse_user_input(&body.user_input);
    let request = TurnRequest {
        session_id: session_id.clone(),
        request_id: request_id.clone(),
        user_text: parsed.text,
        event_type: body.event_type.clone(),
        current_state_hint: body.current_state.clone(),
        nlu_result: parsed.nlu_result,
        custom_event: parsed.custom_event,
        metadata: serde_json::json!({
            "userId": body.user_id,
            "botId": body.bot_id,
            "botVersion": body.bot_version,
            "botName": body.bot_name,
            "botResourcePath": body.bot_resource_path,
            "requestId": request_id,
            "context": body.context,
            "headers": body.headers,
        }),
        global_intent_mapping: state.repository.global_intent_mapping(),
    };

    match state.engine.execute_turn(scenario.clone(), request).await {
        Ok(output) => {
            let response = build_response(&scenario, &output, &ResponseOptions::default());
            Json(response).into_response()
        }
        Err(e) => {
            tracing::warn!(session_id = %session_id, error = %e, "turn failed");
            let current_state = body.current_state.as_deref().unwrap_or_default();
            let response = build_error_response(scenario.name(), current_state, &e);
            Json(response).into_response()
        }
    }
}

/// The session's scenario: already loaded > inline body > scenario file.
fn resolve_scenario(
    state: &AppState,
    session_id: &str,
    body: &ExecuteBody,
) -> Result<Scenario, Error> {
    if let Some(document) = &body.scenario {
        state.repository.load(session_id, document)?;
        return state
            .repository
            .primary(session_id)
            .ok_or_else(|| Error::ScenarioLoad("scenario body loaded but empty".into()));
    }

    if let Some(scenario) = state.repository.primary(session_id) {
        return Ok(scenario);
    }

    let Some(dir) = &state.config.scenario.dir else {
        return Err(Error::ScenarioLoad(
            "SCENARIO_DIR is not set and no scenario loaded for session".into(),
        ));
    };
    let file_name = format!("{}-{}.json", body.bot_id, body.bot_version);
    let path = dir.join(&file_name);
    let raw = std::fs::read_to_string(&path).map_err(|e| {
        tracing::warn!(path = %path.display(), error = %e, "scenario file not readable");
        Error::Io(e)
    })?;
    let document: Value = serde_json::from_str(&raw)
        .map_err(|e| Error::ScenarioLoad(format!("{file_name}: {e}")))?;
    state.repository.load(session_id, &document)?;
    state
        .repository
        .primary(session_id)
        .ok_or_else(|| Error::ScenarioLoad(format!("{file_name}: no scenario in document")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn app_state(scenario_dir: Option<std::path::PathBuf>) -> AppState {
        let mut config = sc_domain::config::Config::default();
        config.scenario.dir = scenario_dir;
        let store: Arc<dyn sc_context::ContextStore> = Arc::new(
            sc_context::InMemoryContextStore::new(std::time::Duration::from_secs(60)),
        );
        AppState {
            config: Arc::new(config),
            repository: Arc::new(sc_scenario::ScenarioRepository::new()),
            engine: Arc::new(sc_engine::ExecutionEngine::new(
                store.clone(),
                std::time::Duration::from_secs(5),
            )),
            store,
            session_locks: Arc::new(crate::session_lock::SessionLockMap::new()),
        }
    }

    #[test]
    fn scenario_resolves_from_the_configured_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("weather-1.0.json"),
            r#"{"plan": [{"name": "Main", "dialogState": [{"name": "Start"}]}]}"#,
        )
        .unwrap();

        let state = app_state(Some(dir.path().to_path_buf()));
        let body = ExecuteBody {
            bot_id: "weather".into(),
            bot_version: "1.0".into(),
            ..Default::default()
        };

        let scenario = resolve_scenario(&state, "file-session", &body).unwrap();
        assert_eq!(scenario.name(), "Main");
        // The loaded scenario is now registered for the session.
        assert!(state.repository.has_session("file-session"));
    }

    #[test]
    fn missing_scenario_dir_is_a_load_error() {
        let state = app_state(None);
        let body = ExecuteBody::default();

        let err = resolve_scenario(&state, "nope", &body).unwrap_err();
        assert!(matches!(err, Error::ScenarioLoad(_)));
    }

    #[test]
    fn missing_scenario_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let state = app_state(Some(dir.path().to_path_buf()));
        let body = ExecuteBody {
            bot_id: "absent".into(),
            bot_version: "9.9".into(),
            ..Default::default()
        };

        let err = resolve_scenario(&state, "nope", &body).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn text_input_extracts_text_and_nlu() {
        let parsed = parse_user_input(&json!({
            "type": "text",
            "content": {"text": "날씨 알려줘", "nluResult": {"intent": "Weather.Inform"}}
        }));
        assert_eq!(parsed.text.as_deref(), Some("날씨 알려줘"));
        assert!(parsed.nlu_result.is_some());
        assert!(parsed.custom_event.is_none());
    }

    #[test]
    fn blank_text_is_dropped() {
        let parsed = parse_user_input(&json!({
            "type": "text",
            "content": {"text": "   "}
        }));
        assert!(parsed.text.is_none());
    }

    #[test]
    fn custom_event_is_captured() {
        let parsed = parse_user_input(&json!({
            "type": "customEvent",
            "content": {"type": "BUTTON_CLICK", "value": {"id": "b1"}}
        }));
        let event = parsed.custom_event.unwrap();
        assert_eq!(event.get("type"), Some(&json!("BUTTON_CLICK")));
    }

    #[test]
    fn unknown_input_type_is_ignored() {
        let parsed = parse_user_input(&json!({"type": "voice", "content": {}}));
        assert!(parsed.text.is_none());
        assert!(parsed.custom_event.is_none());
    }
}
