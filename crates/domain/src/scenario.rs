//! Scenario data model.
//!
//! A scenario is an ordered list of plans; each plan an ordered list of
//! dialog states; each state a bundle of handlers. The serde layer mirrors
//! the authoring JSON (camelCase keys, most fields optional) so documents
//! survive an upload/download round trip.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Transition sentinel: pop the plan stack and resume the caller.
pub const END_SCENARIO: &str = "__END_SCENARIO__";
/// Transition sentinel: terminate the whole session.
pub const END_SESSION: &str = "__END_SESSION__";
/// Intent wildcard, matched only when no exact intent handler matches.
pub const ANY_INTENT: &str = "__ANY_INTENT__";
/// Reprompt target sentinel: stay in the current dialog state.
pub const CURRENT_DIALOG_STATE: &str = "__CURRENT_DIALOG_STATE__";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Actions & transitions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where a consumed handler sends the session. `scenario` names a plan;
/// empty means "stay in the active plan".
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransitionTarget {
    #[serde(default)]
    pub scenario: String,
    #[serde(default)]
    pub dialog_state: String,
}

/// An outbound directive as authored in the scenario. `content` is either a
/// plain string (`speak`) or a nested payload (`customPayload`).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Directive {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub content: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MemoryAction {
    #[serde(default)]
    pub action_type: String,
    #[serde(default)]
    pub memory_slot_key: String,
    #[serde(default)]
    pub memory_slot_value: Value,
    #[serde(default = "d_session_scope")]
    pub action_scope: String,
}

fn d_session_scope() -> String {
    "SESSION".into()
}

/// Directives plus memory mutations attached to a handler or state entry.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub directives: Vec<Directive>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub memory_actions: Vec<MemoryAction>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handlers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ConditionHandler {
    #[serde(default)]
    pub condition_statement: String,
    #[serde(default)]
    pub action: Action,
    #[serde(default)]
    pub transition_target: TransitionTarget,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct IntentHandler {
    #[serde(default)]
    pub intent: String,
    #[serde(default)]
    pub action: Action,
    #[serde(default)]
    pub transition_target: TransitionTarget,
}

/// Event handlers accept two authored shapes for `event`: a bare string or
/// `{type: "..."}`. [`EventHandler::event_type`] resolves both.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct EventHandler {
    #[serde(default)]
    pub event: Value,
    #[serde(default)]
    pub action: Action,
    #[serde(default)]
    pub transition_target: TransitionTarget,
}

impl EventHandler {
    pub fn event_type(&self) -> Option<&str> {
        match &self.event {
            Value::String(s) => Some(s.as_str()),
            Value::Object(map) => map.get("type").and_then(Value::as_str),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WebhookAction {
    #[serde(default)]
    pub name: String,
}

/// Inline api-call config kept on legacy handlers. The `url` is transient:
/// it is stripped when a scenario is downloaded.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct InlineApiCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(
        default = "d_timeout_ms",
        rename = "timeoutInMilliSecond"
    )]
    pub timeout_ms: u64,
    #[serde(default = "d_retry")]
    pub retry: u32,
    #[serde(default)]
    pub formats: ApiCallFormats,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ApiCallHandler {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apicall: Option<InlineApiCall>,
    #[serde(default)]
    pub action: Action,
    #[serde(default)]
    pub transition_target: TransitionTarget,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Slot filling
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FillBehavior {
    #[serde(default)]
    pub prompt_action: Action,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reprompt_event_handlers: Vec<EventHandler>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SlotFillingForm {
    #[serde(default)]
    pub name: String,
    /// `"Y"` marks the slot required.
    #[serde(default)]
    pub required: String,
    #[serde(default)]
    pub memory_slot_key: Vec<String>,
    #[serde(default)]
    pub fill_behavior: FillBehavior,
}

impl SlotFillingForm {
    pub fn is_required(&self) -> bool {
        self.required == "Y"
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dialog states & plans
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DialogState {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_action: Option<Action>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub condition_handlers: Vec<ConditionHandler>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub event_handlers: Vec<EventHandler>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub intent_handlers: Vec<IntentHandler>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub webhook_actions: Vec<WebhookAction>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub apicall_handlers: Vec<ApiCallHandler>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub slot_filling_form: Vec<SlotFillingForm>,
    /// A state carrying its own `dialogState` list acts as a nested plan.
    #[serde(
        default,
        rename = "dialogState",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub nested_states: Vec<DialogState>,
}

impl DialogState {
    /// True when the state waits for the user before intent evaluation
    /// may consume input (it has intent handlers or a slot-filling form).
    pub fn expects_user_input(&self) -> bool {
        !self.intent_handlers.is_empty() || !self.slot_filling_form.is_empty()
    }

    pub fn is_nested_plan(&self) -> bool {
        !self.nested_states.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Plan {
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "dialogState")]
    pub dialog_states: Vec<DialogState>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Webhooks & api calls
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum WebhookKind {
    #[default]
    #[serde(rename = "WEBHOOK", alias = "webhook", alias = "Webhook")]
    Webhook,
    #[serde(rename = "APICALL", alias = "apicall", alias = "Apicall")]
    ApiCall,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct QueryParam {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub value: String,
}

/// Mapping groups project a response into memory or the directive queue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum MappingTarget {
    #[default]
    #[serde(rename = "MEMORY", alias = "memory")]
    Memory,
    #[serde(rename = "DIRECTIVE", alias = "directive")]
    Directive,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MappingGroup {
    #[serde(default = "d_json_path")]
    pub expression_type: String,
    #[serde(default)]
    pub target_type: MappingTarget,
    /// Memory-key (or directive-key) to JSONPath expression.
    #[serde(default)]
    pub mappings: BTreeMap<String, String>,
}

fn d_json_path() -> String {
    "JSON_PATH".into()
}

/// Request/response formatting for an api-call style webhook.
///
/// `response_mappings` stays a raw [`Value`] because three authored shapes
/// exist in the wild; `sc-scenario::unify` normalizes them into
/// [`MappingGroup`] lists.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ApiCallFormats {
    #[serde(default = "d_post")]
    pub method: String,
    #[serde(default = "d_json_content")]
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_template: Option<String>,
    #[serde(default)]
    pub response_processing: Value,
    #[serde(default)]
    pub response_mappings: Value,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub query_params: Vec<QueryParam>,
}

fn d_post() -> String {
    "POST".into()
}
fn d_json_content() -> String {
    "application/json".into()
}

/// A registered external endpoint, tagged `WEBHOOK` or `APICALL`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Webhook {
    #[serde(default, rename = "type")]
    pub kind: WebhookKind,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(
        default = "d_timeout_ms",
        rename = "timeoutInMilliSecond"
    )]
    pub timeout_ms: u64,
    #[serde(default = "d_retry")]
    pub retry: u32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formats: Option<ApiCallFormats>,
}

fn d_timeout_ms() -> u64 {
    5000
}
fn d_retry() -> u32 {
    3
}

/// Legacy top-level `apicalls[]` entry, unified into `webhooks[]` on load.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct LegacyApiCall {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(
        default,
        rename = "timeoutInMilliSecond",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default = "d_retry")]
    pub retry: u32,
    #[serde(default)]
    pub formats: ApiCallFormats,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Intent mapping
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Remaps an NLU base intent to a DM intent when the session is in a
/// matching state and the guarding condition holds.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct IntentMapping {
    #[serde(default)]
    pub scenario: String,
    #[serde(default)]
    pub dialog_state: String,
    #[serde(default)]
    pub intents: Vec<String>,
    #[serde(default)]
    pub condition_statement: String,
    #[serde(default)]
    pub dm_intent: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario root
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotConfig {
    #[serde(default = "d_chat_bot")]
    pub bot_type: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            bot_type: d_chat_bot(),
        }
    }
}

impl BotConfig {
    pub fn is_call_bot(&self) -> bool {
        self.bot_type.eq_ignore_ascii_case("CALL_BOT")
    }
}

fn d_chat_bot() -> String {
    "CHAT_BOT".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    #[serde(default)]
    pub plan: Vec<Plan>,
    #[serde(default)]
    pub bot_config: BotConfig,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub intent_mapping: Vec<IntentMapping>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub webhooks: Vec<Webhook>,
    /// Legacy input only; drained into `webhooks` by the repository.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub apicalls: Vec<LegacyApiCall>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub multi_intent_mapping: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub handler_groups: Vec<Value>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub dialog_result: String,
}

impl Scenario {
    /// The scenario's display name: the first plan's name.
    pub fn name(&self) -> &str {
        self.plan.first().map(|p| p.name.as_str()).unwrap_or("")
    }
}

/// Wrapper shape: `[{id, name, scenario}]`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ScenarioWrapper {
    #[serde(default)]
    pub id: Value,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub scenario: Scenario,
}

/// The two accepted upload shapes.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ScenarioDocument {
    Wrapped(Vec<ScenarioWrapper>),
    Direct(Box<Scenario>),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transition record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Diagnostic record produced for every consumed handler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StateTransitionRecord {
    pub from_state: String,
    pub to_state: String,
    pub reason: String,
    pub condition_met: bool,
    /// `"condition"`, `"intent"`, `"event"`, `"apicall_condition"`, ...
    pub handler_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dialog_state_tolerates_sparse_json() {
        let ds: DialogState = serde_json::from_str(r#"{"name": "Start"}"#).unwrap();
        assert_eq!(ds.name, "Start");
        assert!(ds.condition_handlers.is_empty());
        assert!(!ds.expects_user_input());
    }

    #[test]
    fn event_handler_accepts_both_shapes() {
        let h: EventHandler =
            serde_json::from_str(r#"{"event": {"type": "NO_MATCH_EVENT"}}"#).unwrap();
        assert_eq!(h.event_type(), Some("NO_MATCH_EVENT"));

        let h: EventHandler = serde_json::from_str(r#"{"event": "USER_DIALOG_START"}"#).unwrap();
        assert_eq!(h.event_type(), Some("USER_DIALOG_START"));
    }

    #[test]
    fn webhook_kind_accepts_lowercase() {
        let w: Webhook = serde_json::from_str(
            r#"{"type": "apicall", "name": "a", "url": "http://x"}"#,
        )
        .unwrap();
        assert_eq!(w.kind, WebhookKind::ApiCall);
        assert_eq!(w.timeout_ms, 5000);
        assert_eq!(w.retry, 3);
    }

    #[test]
    fn document_shapes_deserialize() {
        let wrapped: ScenarioDocument = serde_json::from_str(
            r#"[{"id": 1, "name": "Main", "scenario": {"plan": [{"name": "Main", "dialogState": []}]}}]"#,
        )
        .unwrap();
        assert!(matches!(wrapped, ScenarioDocument::Wrapped(_)));

        let direct: ScenarioDocument = serde_json::from_str(
            r#"{"plan": [{"name": "Main", "dialogState": [{"name": "Start"}]}]}"#,
        )
        .unwrap();
        match direct {
            ScenarioDocument::Direct(s) => assert_eq!(s.name(), "Main"),
            _ => panic!("expected direct shape"),
        }
    }
}
