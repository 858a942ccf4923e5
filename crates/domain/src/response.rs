//! Outbound response record.
//!
//! One record per turn: end-session flag, error info, directives rendered
//! per bot type, meta (intent/event/state/used slots), and the session
//! memory with engine control flags stripped.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::session::Memory;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl Default for ErrorInfo {
    fn default() -> Self {
        Self {
            code: "0".into(),
            message: "[Success]".into(),
        }
    }
}

impl ErrorInfo {
    pub fn failure(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseDirective {
    pub name: String,
    pub content: Value,
}

impl ResponseDirective {
    /// Call-bot directive: spoken text plus an optional display string.
    pub fn system_utterance(speech: &str) -> Self {
        Self {
            name: "systemUtterance".into(),
            content: json!({
                "record": null,
                "speech": speech,
                "display": "",
            }),
        }
    }

    /// Chat-bot directive: the message wrapped in the section/text payload
    /// the chat renderer expects.
    pub fn custom_payload(message: &str) -> Self {
        Self {
            name: "customPayload".into(),
            content: json!({
                "item": [{
                    "section": {
                        "class": "cb-section section_1",
                        "item": [{
                            "text": {
                                "class": "cb-text text",
                                "text": format!("<p>{message}</p>"),
                            }
                        }]
                    }
                }],
                "record": {"text": ""},
                "templateId": "TM000000000000000001",
                "type": "MESSAGE",
                "version": "1.0",
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UsedSlot {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub turn: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMeta {
    pub intent: Vec<String>,
    pub event: Value,
    pub scenario: String,
    pub dialog_state: String,
    pub fallback_type: String,
    pub used_slots: Vec<UsedSlot>,
    pub allow_focus_shift: String,
}

impl Default for ResponseMeta {
    fn default() -> Self {
        Self {
            intent: vec![String::new()],
            event: json!({}),
            scenario: String::new(),
            dialog_state: String::new(),
            fallback_type: "not_fallback".into(),
            used_slots: Vec::new(),
            allow_focus_shift: "Y".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnResponse {
    /// `"Y"` iff the final state is `__END_SESSION__`.
    pub end_session: String,
    pub error: ErrorInfo,
    pub directives: Vec<ResponseDirective>,
    pub dialog_result: Value,
    pub meta: ResponseMeta,
    pub log: Value,
    pub memory: Memory,
}

impl Default for TurnResponse {
    fn default() -> Self {
        Self {
            end_session: "N".into(),
            error: ErrorInfo::default(),
            directives: Vec::new(),
            dialog_result: json!({}),
            meta: ResponseMeta::default(),
            log: json!({}),
            memory: Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_payload_wraps_message_in_paragraph() {
        let d = ResponseDirective::custom_payload("hello");
        let text = d
            .content
            .pointer("/item/0/section/item/0/text/text")
            .and_then(Value::as_str)
            .unwrap();
        assert_eq!(text, "<p>hello</p>");
    }

    #[test]
    fn default_response_is_successful_and_open() {
        let r = TurnResponse::default();
        assert_eq!(r.end_session, "N");
        assert_eq!(r.error.code, "0");
        assert_eq!(r.meta.allow_focus_shift, "Y");
    }
}
