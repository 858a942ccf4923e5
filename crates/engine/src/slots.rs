//! Slot-filling manager.
//!
//! Slots are checked in declaration order. The first unfilled required
//! slot prompts and parks the session behind `_WAITING_FOR_SLOT`; while
//! waiting, the fill prompt is replayed each turn, joined by the
//! `NO_MATCH_EVENT` reprompt from the second unfilled turn on. Once every
//! required slot is filled, `SLOT_FILLING_COMPLETED` is set and condition
//! handlers take over.

use serde_json::Value;

use sc_domain::scenario::{DialogState, EventHandler};
use sc_domain::session::Memory;

use crate::actions::prompt_action_text;
use crate::memory::{self, keys};

/// Outcome of one slot-filling pass over a state's form.
#[derive(Debug, Default)]
pub struct SlotFillingOutcome {
    pub messages: Vec<String>,
    /// Set when the engine must stay in this state and await input.
    pub waiting: bool,
    /// Set when all required slots are filled this pass.
    pub completed: bool,
}

/// Run slot filling for a state. `None` when the state has no form.
pub fn process(state: &DialogState, memory: &mut Memory) -> Option<SlotFillingOutcome> {
    if state.slot_filling_form.is_empty() {
        return None;
    }

    let mut outcome = SlotFillingOutcome::default();
    let just_registered = memory
        .get(keys::REPROMPT_JUST_REGISTERED)
        .and_then(Value::as_bool)
        .unwrap_or(false);

    for form in &state.slot_filling_form {
        let filled = form
            .memory_slot_key
            .iter()
            .any(|key| memory::slot_filled(memory, key));
        let waiting_on_this = memory
            .get(keys::WAITING_FOR_SLOT)
            .and_then(Value::as_str)
            .map(|s| s == form.name)
            .unwrap_or(false);

        if form.is_required() && !filled {
            tracing::debug!(slot = %form.name, "required slot unfilled");

            if !waiting_on_this {
                // First encounter: prompt and register the wait.
                if let Some(prompt) = prompt_action_text(&form.fill_behavior.prompt_action) {
                    outcome.messages.push(prompt);
                }
                memory.insert(
                    keys::WAITING_FOR_SLOT.into(),
                    Value::String(form.name.clone()),
                );
                if !form.fill_behavior.reprompt_event_handlers.is_empty() {
                    memory.insert(
                        keys::REPROMPT_HANDLERS.into(),
                        serde_json::to_value(&form.fill_behavior.reprompt_event_handlers)
                            .unwrap_or(Value::Null),
                    );
                }
                memory.insert(keys::REPROMPT_JUST_REGISTERED.into(), Value::Bool(true));
            } else if just_registered {
                // First turn after registration: replay the fill prompt only.
                memory.remove(keys::REPROMPT_JUST_REGISTERED);
                if let Some(prompt) = prompt_action_text(&form.fill_behavior.prompt_action) {
                    outcome.messages.push(prompt);
                }
            } else {
                // Later turns: fill prompt plus the NO_MATCH reprompt.
                if let Some(prompt) = prompt_action_text(&form.fill_behavior.prompt_action) {
                    outcome.messages.push(prompt);
                }
                if let Some(reprompt) = no_match_reprompt(memory) {
                    outcome.messages.push(reprompt);
                }
            }

            outcome.waiting = true;
            return Some(outcome);
        }

        if filled && waiting_on_this {
            tracing::debug!(slot = %form.name, "awaited slot filled, clearing wait");
            memory::clear_slot_waiting(memory);
        }
    }

    if just_registered {
        memory.remove(keys::REPROMPT_JUST_REGISTERED);
    }

    memory.insert(
        keys::SLOT_FILLING_COMPLETED.into(),
        Value::String(String::new()),
    );
    memory::clear_slot_waiting(memory);
    outcome.completed = true;
    Some(outcome)
}

/// The reprompt text of the stored `NO_MATCH_EVENT` handler, if any.
fn no_match_reprompt(memory: &Memory) -> Option<String> {
    let handlers: Vec<EventHandler> = memory
        .get(keys::REPROMPT_HANDLERS)
        .and_then(|v| serde_json::from_value(v.clone()).ok())?;
    handlers
        .iter()
        .find(|h| h.event_type() == Some("NO_MATCH_EVENT"))
        .and_then(|h| prompt_action_text(&h.action))
}
