//! Per-session persisted state: the memory map and the plan-frame stack.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Suffix appended to a session id to form its context-store key.
pub const CONTEXT_KEY_SUFFIX: &str = "__bot_builder_dm";

/// Context-store key for a session's dialog-manager snapshot.
pub fn context_key(session_id: &str) -> String {
    format!("{session_id}{CONTEXT_KEY_SUFFIX}")
}

/// Session memory: a flat key/value map. Keys with a leading underscore are
/// engine control flags and are stripped from outbound responses.
pub type Memory = Map<String, Value>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Frames
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One element of the per-session plan stack.
///
/// The top frame names the currently executing plan and state.
/// `last_executed_handler_index` points into the state's ordered
/// `conditionHandlers` list — the only handler list with resume semantics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    pub scenario_name: String,
    pub plan_name: String,
    pub dialog_state_name: String,
    #[serde(default)]
    pub last_executed_handler_index: Option<usize>,
    #[serde(default)]
    pub entry_action_executed: bool,
}

impl Frame {
    pub fn new(scenario_name: &str, plan_name: &str, dialog_state_name: &str) -> Self {
        Self {
            scenario_name: scenario_name.to_owned(),
            plan_name: plan_name.to_owned(),
            dialog_state_name: dialog_state_name.to_owned(),
            last_executed_handler_index: None,
            entry_action_executed: false,
        }
    }
}

/// Bookkeeping needed to continue a caller's condition handlers after a
/// sub-plan pops with `__END_SCENARIO__`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResumePoint {
    /// The frame now on top of the stack.
    pub frame: Frame,
    /// First condition-handler index still to evaluate.
    pub next_handler_index: usize,
    /// Whether the resumed state's entry action already ran for this frame.
    pub entry_action_executed: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Snapshot
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What the context store persists per session.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Snapshot {
    #[serde(default)]
    pub memory: Memory,
    #[serde(default)]
    pub stack: Vec<Frame>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_key_appends_suffix() {
        assert_eq!(context_key("abc"), "abc__bot_builder_dm");
    }

    #[test]
    fn snapshot_round_trips_through_json() {
        let mut memory = Memory::new();
        memory.insert("CITY".into(), Value::String("서울".into()));
        let snapshot = Snapshot {
            memory,
            stack: vec![Frame::new("Main", "Main", "Start")],
        };

        let json = serde_json::to_string(&snapshot).unwrap();
        let restored: Snapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, snapshot);
    }
}
