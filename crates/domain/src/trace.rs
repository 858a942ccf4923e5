use serde::Serialize;

/// Structured trace events emitted across all StateCanvas crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    ScenarioLoaded {
        session_id: String,
        scenario_name: String,
        plans: usize,
        webhooks: usize,
    },
    TurnStarted {
        session_id: String,
        state: String,
        has_text: bool,
        event_type: Option<String>,
    },
    TurnCompleted {
        session_id: String,
        from_state: String,
        to_state: String,
        cycles: u32,
        transitions: usize,
    },
    PlanSwitched {
        session_id: String,
        from_plan: String,
        to_plan: String,
        state: String,
    },
    ScenarioEnded {
        session_id: String,
        ended_plan: String,
        resumed_state: Option<String>,
        next_handler_index: Option<usize>,
    },
    WebhookCalled {
        name: String,
        url: String,
        status: Option<u16>,
        attempts: u32,
        duration_ms: u64,
    },
    ApiCallExecuted {
        name: String,
        url: String,
        status: Option<u16>,
        attempts: u32,
        duration_ms: u64,
    },
    SnapshotPersisted {
        session_id: String,
        memory_keys: usize,
        stack_depth: usize,
    },
    SessionReset {
        session_id: String,
        initial_state: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "sc_event");
    }
}
