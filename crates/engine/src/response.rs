//! Response builder.
//!
//! Turns a [`TurnOutput`] into the outbound response record. Directive
//! shape follows the bot type: call-bots speak (`systemUtterance`),
//! chat-bots render a `customPayload`. Engine control flags never leave
//! the process.

use serde_json::{json, Value};

use sc_domain::response::{
    ErrorInfo, ResponseDirective, ResponseMeta, TurnResponse, UsedSlot,
};
use sc_domain::scenario::Scenario;
use sc_domain::Error;

use crate::engine::TurnOutput;
use crate::handlers::NO_INTENT_FOUND;
use crate::memory::public_view;

/// Response fields without engine-defined semantics, kept configurable.
#[derive(Debug, Clone)]
pub struct ResponseOptions {
    pub allow_focus_shift: String,
    pub dialog_result: Value,
}

impl Default for ResponseOptions {
    fn default() -> Self {
        Self {
            allow_focus_shift: "Y".into(),
            dialog_result: json!({}),
        }
    }
}

/// Build the response record for a completed turn.
pub fn build_response(
    scenario: &Scenario,
    output: &TurnOutput,
    options: &ResponseOptions,
) -> TurnResponse {
    let is_call_bot = scenario.bot_config.is_call_bot();

    let mut directives = Vec::new();
    for message in &output.messages {
        let message = message.trim();
        if message.is_empty() {
            continue;
        }
        directives.push(render_directive(message, is_call_bot));
    }
    for queued in &output.directive_queue {
        let value = match &queued.value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let message = format!("Directive from {}: {} = {}", queued.source, queued.key, value);
        directives.push(render_directive(&message, is_call_bot));
    }

    let mut used_slots = Vec::new();
    if let Some(intent) = output.intent.as_deref().filter(|i| *i != NO_INTENT_FOUND) {
        used_slots.push(UsedSlot {
            key: "__NLU_INTENT__".into(),
            value: intent.to_owned(),
            turn: String::new(),
        });
    }
    if let Some(event_type) = output.event_type.as_deref() {
        used_slots.push(UsedSlot {
            key: "EVENT_TYPE".into(),
            value: event_type.to_owned(),
            turn: String::new(),
        });
    }

    let intent_list = match output.intent.as_deref() {
        Some(intent) if intent != NO_INTENT_FOUND => vec![intent.to_owned()],
        _ => vec![String::new()],
    };

    TurnResponse {
        end_session: if output.end_session { "Y" } else { "N" }.into(),
        error: ErrorInfo::default(),
        directives,
        dialog_result: options.dialog_result.clone(),
        meta: ResponseMeta {
            intent: intent_list,
            event: match output.event_type.as_deref() {
                Some(event_type) => json!({"type": event_type}),
                None => json!({}),
            },
            scenario: scenario.name().to_owned(),
            dialog_state: output.final_state.clone(),
            fallback_type: "not_fallback".into(),
            used_slots,
            allow_focus_shift: options.allow_focus_shift.clone(),
        },
        log: json!({}),
        memory: public_view(&output.memory),
    }
}

/// Build an error response that preserves the caller's current state.
pub fn build_error_response(
    scenario_name: &str,
    current_state: &str,
    error: &Error,
) -> TurnResponse {
    let code = match error {
        Error::ScenarioLoad(_) => "400",
        Error::StateNotFound(_) => "404",
        _ => "500",
    };
    TurnResponse {
        error: ErrorInfo::failure(code, error.to_string()),
        meta: ResponseMeta {
            scenario: scenario_name.to_owned(),
            dialog_state: current_state.to_owned(),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn render_directive(message: &str, is_call_bot: bool) -> ResponseDirective {
    if is_call_bot {
        ResponseDirective::system_utterance(message)
    } else {
        ResponseDirective::custom_payload(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sc_domain::session::Memory;
    use serde_json::json;

    fn output(messages: Vec<&str>, end_session: bool) -> TurnOutput {
        let mut memory = Memory::new();
        memory.insert("CITY".into(), json!("서울"));
        memory.insert("_PREVIOUS_STATE".into(), json!("Start"));
        TurnOutput {
            final_state: if end_session {
                "__END_SESSION__".into()
            } else {
                "End".into()
            },
            messages: messages.into_iter().map(str::to_owned).collect(),
            transitions: vec![],
            intent: Some("Weather.Inform".into()),
            event_type: None,
            memory,
            directive_queue: vec![],
            end_session,
        }
    }

    fn chat_scenario() -> Scenario {
        serde_json::from_value(json!({
            "plan": [{"name": "Main", "dialogState": []}],
            "botConfig": {"botType": "CHAT_BOT"}
        }))
        .unwrap()
    }

    #[test]
    fn chat_bot_renders_custom_payload() {
        let response = build_response(
            &chat_scenario(),
            &output(vec!["안녕하세요"], false),
            &ResponseOptions::default(),
        );
        assert_eq!(response.end_session, "N");
        assert_eq!(response.directives.len(), 1);
        assert_eq!(response.directives[0].name, "customPayload");
        assert_eq!(response.meta.scenario, "Main");
        assert_eq!(response.meta.intent, vec!["Weather.Inform"]);
    }

    #[test]
    fn call_bot_renders_system_utterance() {
        let scenario: Scenario = serde_json::from_value(json!({
            "plan": [{"name": "Main", "dialogState": []}],
            "botConfig": {"botType": "CALL_BOT"}
        }))
        .unwrap();
        let response = build_response(
            &scenario,
            &output(vec!["안내말씀"], false),
            &ResponseOptions::default(),
        );
        assert_eq!(response.directives[0].name, "systemUtterance");
        assert_eq!(
            response.directives[0].content.get("speech"),
            Some(&json!("안내말씀"))
        );
    }

    #[test]
    fn control_flags_never_reach_the_response() {
        let response = build_response(
            &chat_scenario(),
            &output(vec![], false),
            &ResponseOptions::default(),
        );
        assert!(response.memory.contains_key("CITY"));
        assert!(response.memory.keys().all(|k| !k.starts_with('_')));
    }

    #[test]
    fn end_session_is_flagged() {
        let response = build_response(
            &chat_scenario(),
            &output(vec![], true),
            &ResponseOptions::default(),
        );
        assert_eq!(response.end_session, "Y");
        assert_eq!(response.meta.dialog_state, "__END_SESSION__");
    }

    #[test]
    fn matched_intent_becomes_a_used_slot() {
        let response = build_response(
            &chat_scenario(),
            &output(vec![], false),
            &ResponseOptions::default(),
        );
        assert!(response
            .meta
            .used_slots
            .iter()
            .any(|s| s.key == "__NLU_INTENT__" && s.value == "Weather.Inform"));
    }
}
