//! Intent-mapping update endpoint.
//!
//! `POST /api/intent-mapping` replaces the global mapping table; the new
//! table applies to subsequent turns of all sessions.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use serde_json::Value;

use sc_domain::scenario::IntentMapping;

use crate::api::api_error;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateIntentMappingBody {
    #[serde(default)]
    pub scenario: String,
    pub intent_mapping: Vec<Value>,
}

pub async fn update_intent_mapping(
    State(state): State<AppState>,
    Json(body): Json<UpdateIntentMappingBody>,
) -> Response {
    let mut mappings = Vec::with_capacity(body.intent_mapping.len());
    for (index, raw) in body.intent_mapping.into_iter().enumerate() {
        match serde_json::from_value::<IntentMapping>(raw) {
            Ok(mapping) => mappings.push(mapping),
            Err(e) => {
                return api_error(
                    StatusCode::BAD_REQUEST,
                    format!("intentMapping[{index}]: {e}"),
                );
            }
        }
    }

    let count = mappings.len();
    state.repository.set_global_intent_mapping(mappings);
    Json(serde_json::json!({
        "updated": true,
        "count": count,
        "scenario": body.scenario,
    }))
    .into_response()
}
