//! Condition evaluator.
//!
//! Conditions are small strings evaluated against session memory:
//! literals (`True` / `False`), the named `SLOT_FILLING_COMPLETED` check,
//! and string equality between substituted memory values. Evaluation is
//! side-effect free; unsupported forms evaluate to false with a warning.

use sc_domain::scenario::{ConditionHandler, DialogState, IntentMapping, Scenario};
use sc_domain::session::Memory;

use crate::memory::{keys, resolve_nlu_intent, value_to_string};

/// Evaluate a condition statement against memory.
pub fn evaluate(condition: &str, memory: &Memory) -> bool {
    let trimmed = condition.trim();
    match trimmed {
        "True" | "\"True\"" => return true,
        "False" | "\"False\"" => return false,
        "SLOT_FILLING_COMPLETED" => {
            return memory.contains_key(keys::SLOT_FILLING_COMPLETED);
        }
        _ => {}
    }

    let mut substituted = trimmed.to_owned();
    for (key, value) in memory {
        if !substituted.contains(key.as_str()) {
            continue;
        }
        let replacement = if key == keys::NLU_INTENT {
            format!("\"{}\"", resolve_nlu_intent(memory))
        } else {
            format!("\"{}\"", value_to_string(value))
        };
        substituted = substituted.replace(&format!("{{{key}}}"), &replacement);
        substituted = substituted.replace(&format!("{{${key}}}"), &replacement);
        substituted = substituted.replace(&format!("${{{key}}}"), &replacement);
    }

    // NLU_INTENT placeholders survive substitution when the key is absent
    // from memory; they resolve to the empty intent.
    if substituted.contains("{$NLU_INTENT}") || substituted.contains("{NLU_INTENT}") {
        let replacement = format!("\"{}\"", resolve_nlu_intent(memory));
        substituted = substituted.replace("{$NLU_INTENT}", &replacement);
        substituted = substituted.replace("{NLU_INTENT}", &replacement);
    }

    if let Some((left, right)) = substituted.split_once("==") {
        let left = left.trim().trim_matches('"');
        let right = right.trim().trim_matches('"');
        return left == right;
    }

    tracing::warn!(condition = %condition, substituted = %substituted, "unsupported condition form");
    false
}

/// First condition handler (in declaration order) whose condition holds.
pub fn first_matching_handler<'a>(
    state: &'a DialogState,
    memory: &Memory,
) -> Option<(usize, &'a ConditionHandler)> {
    state
        .condition_handlers
        .iter()
        .enumerate()
        .find(|(_, handler)| evaluate(&handler.condition_statement, memory))
}

/// Remap an NLU base intent through the intent-mapping tables. A mapping
/// applies when its dialog state (if any) matches the current state, the
/// base intent is listed, and the guarding condition (if any) holds.
pub fn apply_intent_mapping(
    base_intent: &str,
    current_state: &str,
    memory: &Memory,
    scenario: &Scenario,
    global: &[IntentMapping],
) -> String {
    let candidates = global.iter().chain(scenario.intent_mapping.iter());
    for mapping in candidates {
        if !mapping.dialog_state.is_empty() && mapping.dialog_state != current_state {
            continue;
        }
        if !mapping.intents.iter().any(|i| i == base_intent) {
            continue;
        }
        if !mapping.condition_statement.is_empty()
            && !evaluate(&mapping.condition_statement, memory)
        {
            continue;
        }
        if !mapping.dm_intent.is_empty() {
            tracing::debug!(
                base = %base_intent,
                mapped = %mapping.dm_intent,
                state = %current_state,
                "DM intent mapping applied"
            );
            return mapping.dm_intent.clone();
        }
    }
    base_intent.to_owned()
}
