//! Action application: memory mutations, entry/prompt directive text.
//!
//! Entry actions carry directives in two authored shapes: `speak` (plain
//! string content) and `customPayload` (nested section/item/text payload
//! with HTML in the text leaves). Both are reduced to plain text for the
//! response message list.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use sc_domain::scenario::{Action, DialogState, Directive, StateTransitionRecord};
use sc_domain::session::Memory;

use crate::memory::mark_entry_action_done;

static HTML_TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Memory actions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Apply a handler's memory actions. `ADD` sets, `REMOVE` deletes;
/// unknown action types are logged and skipped.
pub fn apply_action(action: &Action, memory: &mut Memory) {
    for memory_action in &action.memory_actions {
        let key = memory_action.memory_slot_key.as_str();
        if key.is_empty() {
            continue;
        }
        match memory_action.action_type.as_str() {
            "ADD" => {
                memory.insert(key.to_owned(), memory_action.memory_slot_value.clone());
                tracing::debug!(key = %key, "memory action ADD");
            }
            "REMOVE" => {
                memory.remove(key);
                tracing::debug!(key = %key, "memory action REMOVE");
            }
            other => {
                tracing::warn!(action_type = %other, key = %key, "unknown memory action, skipping");
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Directive text extraction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn custom_payload_texts(content: &Value, out: &mut Vec<String>) {
    let Some(items) = content.get("item").and_then(Value::as_array) else {
        return;
    };
    for item in items {
        let Some(section_items) = item
            .pointer("/section/item")
            .and_then(Value::as_array)
        else {
            continue;
        };
        for section_item in section_items {
            if let Some(text) = section_item.pointer("/text/text").and_then(Value::as_str) {
                let clean = HTML_TAG_RE.replace_all(text, "").into_owned();
                if !clean.is_empty() {
                    out.push(clean);
                }
            }
        }
    }
}

fn directive_texts(directive: &Directive, out: &mut Vec<String>) {
    if directive.name == "speak" {
        if let Some(text) = directive.content.as_str() {
            if !text.is_empty() {
                out.push(text.to_owned());
            }
        }
        return;
    }
    custom_payload_texts(&directive.content, out);
}

/// Plain-text rendering of an entry action's directives, joined with `"; "`.
pub fn entry_action_text(action: &Action) -> Option<String> {
    let mut texts = Vec::new();
    for directive in &action.directives {
        directive_texts(directive, &mut texts);
    }
    if texts.is_empty() {
        None
    } else {
        Some(texts.join("; "))
    }
}

/// The prompt text of a slot-fill (or reprompt) action: `content.text`
/// when present, else the first customPayload text leaf.
pub fn prompt_action_text(action: &Action) -> Option<String> {
    let first = action.directives.first()?;
    if let Some(text) = first.content.get("text").and_then(Value::as_str) {
        return Some(text.to_owned());
    }
    if let Some(text) = first.content.as_str() {
        return Some(text.to_owned());
    }
    first
        .content
        .pointer("/item/0/section/item/0/text/text")
        .and_then(Value::as_str)
        .map(str::to_owned)
}

/// Run a state's entry action: memory actions applied, directive text
/// extracted, the idempotency marker set. Returns the message, if any.
pub fn run_entry_action(state: &DialogState, memory: &mut Memory) -> Option<String> {
    let action = state.entry_action.as_ref()?;
    apply_action(action, memory);
    mark_entry_action_done(memory, &state.name);
    let text = entry_action_text(action);
    tracing::debug!(state = %state.name, has_text = text.is_some(), "entry action executed");
    text
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transition records
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn record(
    from_state: &str,
    to_state: &str,
    reason: impl Into<String>,
    handler_type: &str,
) -> StateTransitionRecord {
    StateTransitionRecord {
        from_state: from_state.to_owned(),
        to_state: to_state.to_owned(),
        reason: reason.into(),
        condition_met: true,
        handler_type: handler_type.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn add_and_remove_mutate_memory() {
        let action: Action = serde_json::from_value(json!({
            "memoryActions": [
                {"actionType": "ADD", "memorySlotKey": "GREETED", "memorySlotValue": "true", "actionScope": "SESSION"},
                {"actionType": "REMOVE", "memorySlotKey": "STALE"},
                {"actionType": "MERGE", "memorySlotKey": "IGNORED"}
            ]
        }))
        .unwrap();

        let mut memory = Memory::new();
        memory.insert("STALE".into(), json!("x"));
        apply_action(&action, &mut memory);

        assert_eq!(memory.get("GREETED"), Some(&json!("true")));
        assert!(!memory.contains_key("STALE"));
        assert!(!memory.contains_key("IGNORED"));
    }

    #[test]
    fn entry_action_extracts_both_directive_shapes() {
        let action: Action = serde_json::from_value(json!({
            "directives": [
                {"name": "speak", "content": "안녕하세요"},
                {"name": "customPayload", "content": {
                    "item": [{"section": {"item": [
                        {"text": {"text": "<p>무엇을 도와드릴까요?</p>"}}
                    ]}}]
                }}
            ]
        }))
        .unwrap();

        assert_eq!(
            entry_action_text(&action).as_deref(),
            Some("안녕하세요; 무엇을 도와드릴까요?")
        );
    }

    #[test]
    fn prompt_text_prefers_flat_content() {
        let flat: Action = serde_json::from_value(json!({
            "directives": [{"name": "speak", "content": {"text": "도시를 알려주세요"}}]
        }))
        .unwrap();
        assert_eq!(prompt_action_text(&flat).as_deref(), Some("도시를 알려주세요"));

        let nested: Action = serde_json::from_value(json!({
            "directives": [{"name": "customPayload", "content": {
                "item": [{"section": {"item": [{"text": {"text": "어느 도시인가요?"}}]}}]
            }}]
        }))
        .unwrap();
        assert_eq!(prompt_action_text(&nested).as_deref(), Some("어느 도시인가요?"));
    }

    #[test]
    fn run_entry_action_marks_idempotency() {
        let state: DialogState = serde_json::from_value(json!({
            "name": "End",
            "entryAction": {"directives": [{"name": "speak", "content": "끝"}]}
        }))
        .unwrap();

        let mut memory = Memory::new();
        let text = run_entry_action(&state, &mut memory);
        assert_eq!(text.as_deref(), Some("끝"));
        assert!(crate::memory::entry_action_done(&memory, "End"));
    }
}
