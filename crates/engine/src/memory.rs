//! Memory manager: control-flag ownership and turn hydration.
//!
//! Every `_`-prefixed key is an engine control flag owned by this module.
//! Handlers and the engine mutate flags only through these helpers, and
//! outbound responses get the [`public_view`] with flags stripped.

use serde_json::Value;

use sc_domain::nlu;
use sc_domain::session::Memory;

/// Well-known memory keys.
pub mod keys {
    pub const SESSION_ID: &str = "sessionId";
    pub const REQUEST_ID: &str = "requestId";
    pub const CHATBOT_METADATA: &str = "CHATBOT_METADATA";
    pub const USER_TEXT_INPUT: &str = "USER_TEXT_INPUT";
    pub const NLU_RESULT: &str = "NLU_RESULT";
    pub const NLU_INTENT: &str = "NLU_INTENT";
    pub const CUSTOM_EVENT: &str = "CUSTOM_EVENT";
    pub const DM_MAPPED_INTENT: &str = "DM_MAPPED_INTENT";
    pub const LAST_EVENT_TYPE: &str = "lastEventType";
    pub const SLOT_FILLING_COMPLETED: &str = "SLOT_FILLING_COMPLETED";

    // Engine control flags (stripped from responses).
    pub const DEFER_INTENT_ONCE: &str = "_DEFER_INTENT_ONCE_FOR_STATE";
    pub const INTENT_TRANSITIONED: &str = "_INTENT_TRANSITIONED_THIS_REQUEST";
    pub const CLEAR_USER_INPUT: &str = "_CLEAR_USER_INPUT_ON_NEXT_REQUEST";
    pub const PREVIOUS_STATE: &str = "_PREVIOUS_STATE";
    pub const PREVIOUS_INTENT: &str = "_PREVIOUS_INTENT";
    pub const EXECUTION_DEPTH: &str = "_EXECUTION_DEPTH";
    pub const ENTRY_ACTION_PREFIX: &str = "_ENTRY_ACTION_EXECUTED_";
    pub const WAITING_FOR_SLOT: &str = "_WAITING_FOR_SLOT";
    pub const REPROMPT_HANDLERS: &str = "_REPROMPT_HANDLERS";
    pub const REPROMPT_JUST_REGISTERED: &str = "_REPROMPT_JUST_REGISTERED";
}

/// Stringify a memory value the way templates and conditions expect:
/// strings verbatim, null empty, everything else compact JSON.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::Number(_) => true,
    }
}

/// Whether a slot key is present and non-empty.
pub fn slot_filled(memory: &Memory, key: &str) -> bool {
    memory.get(key).map(truthy).unwrap_or(false)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn hydration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn hydrate(memory: &mut Memory, session_id: &str, request_id: &str, metadata: Value) {
    memory.insert(keys::SESSION_ID.into(), Value::String(session_id.into()));
    memory.insert(keys::REQUEST_ID.into(), Value::String(request_id.into()));
    if !metadata.is_null() {
        memory.insert(keys::CHATBOT_METADATA.into(), metadata);
    }
}

pub fn install_text_input(memory: &mut Memory, text: &str) {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return;
    }
    memory.insert(
        keys::USER_TEXT_INPUT.into(),
        Value::Array(vec![Value::String(trimmed.to_owned())]),
    );
}

pub fn install_nlu_result(memory: &mut Memory, value: Value) {
    memory.insert(keys::NLU_RESULT.into(), nlu::into_envelope(value));
}

pub fn install_custom_event(memory: &mut Memory, value: Value) {
    memory.insert(keys::CUSTOM_EVENT.into(), value);
}

/// The current turn's text input, if any.
pub fn first_text_input(memory: &Memory) -> Option<String> {
    match memory.get(keys::USER_TEXT_INPUT)? {
        Value::Array(items) => items.first().and_then(Value::as_str).map(str::to_owned),
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Input consumption flags
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Drop any stale text input and per-turn intent data. `NLU_INTENT`
/// survives: the flattened slot feeds `{$NLU_INTENT}` condition
/// substitution across turns, while intent matching reads the per-turn
/// `NLU_RESULT` and so cannot pick up the stale slot.
pub fn clear_user_input(memory: &mut Memory) {
    memory.remove(keys::USER_TEXT_INPUT);
    memory.remove(keys::NLU_RESULT);
    memory.remove(keys::DM_MAPPED_INTENT);
}

/// Consume `_CLEAR_USER_INPUT_ON_NEXT_REQUEST`: when set, discard the
/// previous turn's input before the new turn's input is installed.
pub fn consume_clear_input_flag(memory: &mut Memory) -> bool {
    if memory.remove(keys::CLEAR_USER_INPUT).map(|v| truthy(&v)).unwrap_or(false) {
        clear_user_input(memory);
        true
    } else {
        false
    }
}

/// Flags set when a transition leaves `state` behind: the next turn must
/// discard stale input, and the target state's intent handlers are
/// deferred exactly once.
pub fn flag_transition(memory: &mut Memory, from_state: &str, to_state: &str) {
    memory.insert(keys::CLEAR_USER_INPUT.into(), Value::Bool(true));
    memory.insert(
        keys::PREVIOUS_STATE.into(),
        Value::String(from_state.to_owned()),
    );
    memory.insert(
        keys::DEFER_INTENT_ONCE.into(),
        Value::String(to_state.to_owned()),
    );
}

/// Consume the defer-once flag for `state`. True exactly once after a
/// transition set the flag for that state.
pub fn consume_defer_intent_for(memory: &mut Memory, state: &str) -> bool {
    let matches = memory
        .get(keys::DEFER_INTENT_ONCE)
        .and_then(Value::as_str)
        .map(|s| s == state)
        .unwrap_or(false);
    if matches {
        memory.remove(keys::DEFER_INTENT_ONCE);
    }
    matches
}

pub fn mark_intent_transition(memory: &mut Memory, intent: &str) {
    memory.insert(keys::INTENT_TRANSITIONED.into(), Value::Bool(true));
    memory.insert(
        keys::PREVIOUS_INTENT.into(),
        Value::String(intent.to_owned()),
    );
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entry-action idempotency
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn entry_key(state: &str) -> String {
    format!("{}{}", keys::ENTRY_ACTION_PREFIX, state)
}

pub fn entry_action_done(memory: &Memory, state: &str) -> bool {
    memory
        .get(&entry_key(state))
        .map(truthy)
        .unwrap_or(false)
}

pub fn mark_entry_action_done(memory: &mut Memory, state: &str) {
    memory.insert(entry_key(state), Value::Bool(true));
}

/// Forget the marker so a fresh entry into `state` runs its entry action
/// again (entry actions are once per frame entry, not once per session).
pub fn reset_entry_action(memory: &mut Memory, state: &str) {
    memory.remove(&entry_key(state));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Slot-waiting flags
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn clear_slot_waiting(memory: &mut Memory) {
    memory.remove(keys::WAITING_FOR_SLOT);
    memory.remove(keys::REPROMPT_HANDLERS);
    memory.remove(keys::REPROMPT_JUST_REGISTERED);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entity projection & intent resolution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Project the top NLU hypothesis' entities into memory: each entity
/// writes `memory[type]` and `memory["type:role"]` (role defaults to the
/// type when absent).
pub fn project_entities(memory: &mut Memory) {
    let Some(nlu_result) = memory.get(keys::NLU_RESULT).cloned() else {
        return;
    };
    for entity in nlu::entities_of(&nlu_result) {
        if entity.entity_type.is_empty() || entity.text.is_empty() {
            continue;
        }
        let role = if entity.role.is_empty() {
            entity.entity_type.clone()
        } else {
            entity.role.clone()
        };
        let text = Value::String(entity.text.clone());
        memory.insert(format!("{}:{}", entity.entity_type, role), text.clone());
        memory.insert(entity.entity_type.clone(), text);
    }
}

/// Resolve `NLU_INTENT` through its envelope: `{value: [intent, ...]}`
/// yields the first element, a plain list its head, a string itself.
pub fn resolve_nlu_intent(memory: &Memory) -> String {
    match memory.get(keys::NLU_INTENT) {
        Some(Value::Object(map)) => match map.get("value") {
            Some(Value::Array(items)) => {
                items.first().map(value_to_string).unwrap_or_default()
            }
            Some(other) => value_to_string(other),
            None => String::new(),
        },
        Some(Value::Array(items)) => items.first().map(value_to_string).unwrap_or_default(),
        Some(other) => value_to_string(other),
        None => String::new(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Depth guard & public view
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn execution_depth(memory: &Memory) -> u32 {
    memory
        .get(keys::EXECUTION_DEPTH)
        .and_then(Value::as_u64)
        .unwrap_or(0) as u32
}

pub fn set_execution_depth(memory: &mut Memory, depth: u32) {
    if depth == 0 {
        memory.remove(keys::EXECUTION_DEPTH);
    } else {
        memory.insert(keys::EXECUTION_DEPTH.into(), Value::from(depth));
    }
}

/// The response-safe view of memory: engine control flags removed.
pub fn public_view(memory: &Memory) -> Memory {
    memory
        .iter()
        .filter(|(key, _)| !key.starts_with('_'))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn clear_flag_is_consumed_once() {
        let mut memory = Memory::new();
        install_text_input(&mut memory, "이전 입력");
        flag_transition(&mut memory, "a", "b");

        assert!(consume_clear_input_flag(&mut memory));
        assert!(!memory.contains_key(keys::USER_TEXT_INPUT));
        // Second turn: nothing left to consume.
        assert!(!consume_clear_input_flag(&mut memory));
    }

    #[test]
    fn defer_flag_matches_exactly_one_state_once() {
        let mut memory = Memory::new();
        flag_transition(&mut memory, "a", "target");

        assert!(!consume_defer_intent_for(&mut memory, "other"));
        assert!(consume_defer_intent_for(&mut memory, "target"));
        assert!(!consume_defer_intent_for(&mut memory, "target"));
    }

    #[test]
    fn entities_project_with_and_without_roles() {
        let mut memory = Memory::new();
        install_nlu_result(
            &mut memory,
            json!({
                "results": [{"nluNbest": [{
                    "intent": "Weather.Inform",
                    "entities": [
                        {"type": "CITY", "role": "", "text": "서울", "extra": {}},
                        {"type": "DATE", "role": "when", "text": "내일", "extra": {}}
                    ]
                }]}]
            }),
        );
        project_entities(&mut memory);

        assert_eq!(memory.get("CITY"), Some(&json!("서울")));
        assert_eq!(memory.get("CITY:CITY"), Some(&json!("서울")));
        assert_eq!(memory.get("DATE:when"), Some(&json!("내일")));
    }

    #[test]
    fn nlu_intent_resolves_through_envelope() {
        let mut memory = Memory::new();
        memory.insert(
            keys::NLU_INTENT.into(),
            json!({"value": ["ACT_01_0235", "other"]}),
        );
        assert_eq!(resolve_nlu_intent(&memory), "ACT_01_0235");

        memory.insert(keys::NLU_INTENT.into(), json!(["listed"]));
        assert_eq!(resolve_nlu_intent(&memory), "listed");

        memory.insert(keys::NLU_INTENT.into(), json!("plain"));
        assert_eq!(resolve_nlu_intent(&memory), "plain");
    }

    #[test]
    fn public_view_strips_control_flags() {
        let mut memory = Memory::new();
        memory.insert("CITY".into(), json!("서울"));
        flag_transition(&mut memory, "a", "b");
        mark_entry_action_done(&mut memory, "b");

        let view = public_view(&memory);
        assert!(view.contains_key("CITY"));
        assert!(view.keys().all(|k| !k.starts_with('_')));
    }

    #[test]
    fn entry_action_marker_resets_for_fresh_entries() {
        let mut memory = Memory::new();
        mark_entry_action_done(&mut memory, "greeting");
        assert!(entry_action_done(&memory, "greeting"));

        reset_entry_action(&mut memory, "greeting");
        assert!(!entry_action_done(&memory, "greeting"));
    }
}
