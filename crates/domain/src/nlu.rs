//! NLU envelope types and accessors.
//!
//! The engine never runs NLU itself: results arrive on the request
//! (`userInput.content.nluResult`) or from a webhook, and are kept in
//! session memory under `NLU_RESULT`. Accessors here read the nested
//! envelope (`results[0].nluNbest[0]`) without panicking on partial data.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct NluEntity {
    #[serde(default)]
    pub role: String,
    #[serde(default, rename = "type")]
    pub entity_type: String,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalization: Option<String>,
    #[serde(default)]
    pub extra: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct NluNbest {
    #[serde(default)]
    pub intent: String,
    #[serde(default)]
    pub confidence_score: f64,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub entities: Vec<NluEntity>,
    #[serde(default)]
    pub extra: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct NluResult {
    #[serde(default)]
    pub nlu_nbest: Vec<NluNbest>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub extra: Value,
}

/// The envelope stored under `NLU_RESULT`: `{results: [NluResult]}`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NluEnvelope {
    #[serde(default)]
    pub results: Vec<NluResult>,
}

impl NluEnvelope {
    pub fn top_hypothesis(&self) -> Option<&NluNbest> {
        self.results.first()?.nlu_nbest.first()
    }
}

/// Extract the top intent from a raw `NLU_RESULT` memory value.
pub fn intent_of(value: &Value) -> Option<String> {
    let intent = value
        .pointer("/results/0/nluNbest/0/intent")?
        .as_str()?
        .to_owned();
    if intent.is_empty() {
        None
    } else {
        Some(intent)
    }
}

/// Extract the top hypothesis' entities from a raw `NLU_RESULT` value.
pub fn entities_of(value: &Value) -> Vec<NluEntity> {
    value
        .pointer("/results/0/nluNbest/0/entities")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default()
}

/// Wrap a flat `{intent, entities}` object into the nested envelope.
/// Values already carrying `results` pass through unchanged.
pub fn into_envelope(value: Value) -> Value {
    if value.get("results").is_some() {
        return value;
    }
    if let Some(intent) = value.get("intent").and_then(Value::as_str) {
        let entities = value.get("entities").cloned().unwrap_or(json!([]));
        return json!({
            "results": [{
                "nluNbest": [{
                    "intent": intent,
                    "entities": entities,
                }]
            }]
        });
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intent_of_reads_nested_envelope() {
        let value = json!({
            "results": [{"nluNbest": [{"intent": "Weather.Inform", "entities": []}]}]
        });
        assert_eq!(intent_of(&value).as_deref(), Some("Weather.Inform"));
        assert!(intent_of(&json!({})).is_none());
    }

    #[test]
    fn into_envelope_wraps_flat_shape() {
        let wrapped = into_envelope(json!({"intent": "say.yes", "entities": []}));
        assert_eq!(intent_of(&wrapped).as_deref(), Some("say.yes"));

        let passthrough = into_envelope(json!({
            "results": [{"nluNbest": [{"intent": "kept"}]}]
        }));
        assert_eq!(intent_of(&passthrough).as_deref(), Some("kept"));
    }

    #[test]
    fn entities_tolerate_missing_fields() {
        let value = json!({
            "results": [{"nluNbest": [{
                "intent": "Weather.Inform",
                "entities": [{"type": "CITY", "text": "서울", "extra": {}}]
            }]}]
        });
        let entities = entities_of(&value);
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].entity_type, "CITY");
        assert_eq!(entities[0].role, "");
    }
}
