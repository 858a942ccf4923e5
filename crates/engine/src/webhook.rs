//! Webhook client.
//!
//! Webhooks receive the standard envelope `{text, sessionId, requestId,
//! currentState, memory}` via POST and answer with `memorySlots` (merged
//! into session memory) and optionally `directives`. Retries are spaced a
//! fixed second apart; each attempt is bounded by the definition's timeout
//! and the turn deadline.

use std::time::{Duration, Instant};

use serde_json::{json, Value};

use sc_domain::scenario::Webhook;
use sc_domain::session::Memory;
use sc_domain::trace::TraceEvent;

use crate::memory::{keys, resolve_nlu_intent, value_to_string};
use crate::template::replace_template_variables;

const RETRY_PAUSE: Duration = Duration::from_secs(1);

pub struct WebhookClient {
    http: reqwest::Client,
}

impl Default for WebhookClient {
    fn default() -> Self {
        Self::new()
    }
}

impl WebhookClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    /// Execute one webhook call. Returns the parsed JSON body, a
    /// `{"raw_response": ...}` wrapper for non-JSON bodies, or `None`
    /// after the retry budget (or the turn deadline) is exhausted.
    pub async fn call(
        &self,
        definition: &Webhook,
        user_text: &str,
        current_state: &str,
        memory: &mut Memory,
        deadline: Instant,
    ) -> Option<Value> {
        if definition.url.is_empty() {
            tracing::warn!(name = %definition.name, "webhook has no url");
            return None;
        }

        let session_id = ensure_session_id(memory);
        let request_id = format!(
            "req-{}-{}",
            chrono::Utc::now().timestamp_millis(),
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );
        let envelope = json!({
            "text": user_text,
            "sessionId": session_id,
            "requestId": request_id,
            "currentState": current_state,
            "memory": Value::Object(memory.clone()),
        });

        let started = Instant::now();
        let attempts = definition.retry + 1;
        let mut last_status = None;

        for attempt in 0..attempts {
            let Some(timeout) = attempt_timeout(definition.timeout_ms, deadline) else {
                tracing::warn!(name = %definition.name, "turn deadline reached, abandoning webhook");
                break;
            };

            let mut request = self
                .http
                .post(&definition.url)
                .timeout(timeout)
                .header("Content-Type", "application/json")
                .json(&envelope);
            for (name, value) in &definition.headers {
                request = request.header(name.as_str(), replace_template_variables(value, memory));
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    last_status = Some(status.as_u16());
                    if status.is_success() {
                        let text = response.text().await.unwrap_or_default();
                        let body = match serde_json::from_str::<Value>(&text) {
                            Ok(parsed) => parsed,
                            Err(_) => json!({ "raw_response": text }),
                        };
                        TraceEvent::WebhookCalled {
                            name: definition.name.clone(),
                            url: definition.url.clone(),
                            status: last_status,
                            attempts: attempt + 1,
                            duration_ms: started.elapsed().as_millis() as u64,
                        }
                        .emit();
                        return Some(body);
                    }
                    tracing::warn!(
                        name = %definition.name,
                        status = status.as_u16(),
                        attempt = attempt + 1,
                        "webhook returned non-success status"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        name = %definition.name,
                        attempt = attempt + 1,
                        error = %e,
                        "webhook attempt failed"
                    );
                }
            }

            if attempt + 1 < attempts && Instant::now() + RETRY_PAUSE < deadline {
                tokio::time::sleep(RETRY_PAUSE).await;
            }
        }

        TraceEvent::WebhookCalled {
            name: definition.name.clone(),
            url: definition.url.clone(),
            status: last_status,
            attempts,
            duration_ms: started.elapsed().as_millis() as u64,
        }
        .emit();
        None
    }
}

/// Merge a webhook response into memory: `memorySlots` is copied in
/// wholesale, then `NLU_INTENT` is flattened through its `{value: [..]}`
/// envelope into a plain string. Returns the flattened intent, if any.
pub fn apply_webhook_response(response: &Value, memory: &mut Memory) -> Option<String> {
    let slots = response.get("memorySlots")?.as_object()?;
    for (key, value) in slots {
        memory.insert(key.clone(), value.clone());
    }
    if slots.contains_key(keys::NLU_INTENT) {
        let intent = resolve_nlu_intent(memory);
        memory.insert(keys::NLU_INTENT.into(), Value::String(intent.clone()));
        return Some(intent);
    }
    None
}

/// Resolve a `webhookActions` entry against the registered definitions.
///
/// The action name may be a comma-separated candidate list; the first name
/// with a registered definition wins. With no match at all, the first
/// registered webhook is used as a last resort.
pub fn resolve_definition<'a>(webhooks: &'a [Webhook], action_name: &str) -> Option<&'a Webhook> {
    if let Some(found) = webhooks.iter().find(|w| w.name == action_name) {
        return Some(found);
    }
    if action_name.contains(',') {
        for candidate in action_name.split(',').map(str::trim) {
            if let Some(found) = webhooks.iter().find(|w| w.name == candidate) {
                return Some(found);
            }
        }
    }
    let fallback = webhooks.first();
    if let Some(w) = fallback {
        tracing::warn!(
            requested = %action_name,
            using = %w.name,
            "webhook not found by name, falling back to first registered"
        );
    }
    fallback
}

fn ensure_session_id(memory: &mut Memory) -> String {
    let existing = memory
        .get(keys::SESSION_ID)
        .map(value_to_string)
        .unwrap_or_default();
    if !existing.is_empty() {
        return existing;
    }
    let minted = format!(
        "session-{}-{}",
        chrono::Utc::now().timestamp(),
        &uuid::Uuid::new_v4().simple().to_string()[..8]
    );
    memory.insert(keys::SESSION_ID.into(), Value::String(minted.clone()));
    minted
}

fn attempt_timeout(timeout_ms: u64, deadline: Instant) -> Option<Duration> {
    let remaining = deadline.checked_duration_since(Instant::now())?;
    if remaining.is_zero() {
        return None;
    }
    Some(remaining.min(Duration::from_millis(timeout_ms)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn response_merge_flattens_nlu_intent() {
        let response = json!({
            "memorySlots": {
                "NLU_INTENT": {"value": ["Weather.Inform"]},
                "STS_CONFIDENCE": {"value": ["0.93"]}
            }
        });
        let mut memory = Memory::new();
        let intent = apply_webhook_response(&response, &mut memory);

        assert_eq!(intent.as_deref(), Some("Weather.Inform"));
        assert_eq!(memory.get("NLU_INTENT"), Some(&json!("Weather.Inform")));
        assert_eq!(
            memory.get("STS_CONFIDENCE"),
            Some(&json!({"value": ["0.93"]}))
        );
    }

    #[test]
    fn responses_without_memory_slots_are_ignored() {
        let mut memory = Memory::new();
        assert!(apply_webhook_response(&json!({"raw_response": "nope"}), &mut memory).is_none());
        assert!(memory.is_empty());
    }

    #[test]
    fn definition_resolution_handles_csv_and_fallback() {
        let webhooks: Vec<Webhook> = serde_json::from_value(json!([
            {"type": "WEBHOOK", "name": "alpha", "url": "http://a"},
            {"type": "WEBHOOK", "name": "beta", "url": "http://b"}
        ]))
        .unwrap();

        assert_eq!(resolve_definition(&webhooks, "beta").unwrap().name, "beta");
        assert_eq!(
            resolve_definition(&webhooks, "missing, beta").unwrap().name,
            "beta"
        );
        assert_eq!(
            resolve_definition(&webhooks, "unknown").unwrap().name,
            "alpha"
        );
        assert!(resolve_definition(&[], "anything").is_none());
    }
}
