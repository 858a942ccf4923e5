//! Handler set and dispatch contract.
//!
//! Each handler answers `can_handle` against the current dialog state and
//! turn context, and `execute` returns one of four outcomes:
//! no transition, state transition, plan transition, or end-scenario.
//!
//! Priority within a cycle (first to last): entry action, slot filling,
//! webhook, api call, intent, event, condition. Condition handlers run in
//! declaration order with first-match-wins.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;

use sc_domain::scenario::{
    DialogState, IntentMapping, Scenario, StateTransitionRecord, TransitionTarget, ANY_INTENT,
    END_SCENARIO, END_SESSION,
};
use sc_domain::session::Memory;
use sc_domain::nlu;

use sc_scenario::{is_plan_name, start_state_of_plan};

use crate::actions::{apply_action, record, run_entry_action};
use crate::apicall::{self, ApiCallClient};
use crate::condition::{apply_intent_mapping, first_matching_handler};
use crate::memory::{self, keys};
use crate::slots;
use crate::template::QueuedDirective;
use crate::webhook::{apply_webhook_response, resolve_definition, WebhookClient};

/// Intent reported when no NLU hypothesis is available.
pub const NO_INTENT_FOUND: &str = "NO_INTENT_FOUND";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    EntryAction,
    SlotFilling,
    Webhook,
    ApiCall,
    Intent,
    Event,
    Condition,
}

/// What a handler did with the turn.
#[derive(Debug)]
pub enum HandlerOutcome {
    NoTransition {
        messages: Vec<String>,
    },
    StateTransition {
        new_state: String,
        messages: Vec<String>,
        handler_index: Option<usize>,
    },
    PlanTransition {
        target_plan: String,
        new_state: String,
        handler_index: Option<usize>,
        messages: Vec<String>,
    },
    EndScenario {
        messages: Vec<String>,
        handler_index: Option<usize>,
    },
}

/// Mutable per-turn context threaded through the handler pipeline.
pub struct TurnContext {
    pub session_id: String,
    pub current_state: String,
    pub active_plan: String,
    pub scenario: Arc<Scenario>,
    pub memory: Memory,
    /// This turn's text input; consumed (set to `None`) on transition so
    /// later states cannot reuse it.
    pub user_input: Option<String>,
    pub global_intent_mapping: Arc<Vec<IntentMapping>>,
    pub directive_queue: Vec<QueuedDirective>,
    pub transitions: Vec<StateTransitionRecord>,
    pub matched_intent: Option<String>,
    pub deadline: Instant,
}

#[async_trait]
pub trait DialogHandler: Send + Sync {
    fn kind(&self) -> HandlerKind;
    /// Whether this handler should run for the state. May consume one-shot
    /// control flags (the intent defer-once flag).
    fn can_handle(&self, ctx: &mut TurnContext, state: &DialogState) -> bool;
    async fn execute(&self, ctx: &mut TurnContext, state: &DialogState) -> HandlerOutcome;
}

/// The full handler set in priority order.
pub fn default_handlers(
    webhook_client: Arc<WebhookClient>,
    apicall_client: Arc<ApiCallClient>,
) -> Vec<Arc<dyn DialogHandler>> {
    vec![
        Arc::new(EntryActionHandler),
        Arc::new(SlotFillingHandler),
        Arc::new(WebhookHandler {
            client: webhook_client,
        }),
        Arc::new(ApiCallHandler {
            client: apicall_client,
        }),
        Arc::new(IntentHandler),
        Arc::new(EventHandler),
        Arc::new(ConditionHandler),
    ]
}

/// Turn a transition target into the matching outcome, resolving plan
/// transitions and the terminal sentinels.
fn outcome_for_target(
    ctx: &TurnContext,
    target: &TransitionTarget,
    handler_index: Option<usize>,
    messages: Vec<String>,
) -> HandlerOutcome {
    let state = target.dialog_state.as_str();
    if state == END_SCENARIO {
        return HandlerOutcome::EndScenario {
            messages,
            handler_index,
        };
    }
    if state == END_SESSION {
        return HandlerOutcome::StateTransition {
            new_state: END_SESSION.into(),
            messages,
            handler_index,
        };
    }
    if !target.scenario.is_empty()
        && target.scenario != ctx.active_plan
        && is_plan_name(&ctx.scenario, &target.scenario)
    {
        let new_state = if state.is_empty() {
            start_state_of_plan(&ctx.scenario, &target.scenario).unwrap_or_default()
        } else {
            state.to_owned()
        };
        return HandlerOutcome::PlanTransition {
            target_plan: target.scenario.clone(),
            new_state,
            handler_index,
            messages,
        };
    }
    HandlerOutcome::StateTransition {
        new_state: state.to_owned(),
        messages,
        handler_index,
    }
}

/// The effective intent for matching: the current turn's `NLU_RESULT`
/// envelope. The flattened `NLU_INTENT` slot (written by a webhook or api
/// call acting as the NLU) only fills in when no fresh NLU result exists
/// this turn — the slot persists across turns for condition substitution
/// and must never shadow a new utterance.
fn effective_intent(ctx: &TurnContext) -> String {
    if let Some(intent) = ctx.memory.get(keys::NLU_RESULT).and_then(nlu::intent_of) {
        return intent;
    }
    let flattened = memory::resolve_nlu_intent(&ctx.memory);
    if !flattened.is_empty() {
        return flattened;
    }
    NO_INTENT_FOUND.into()
}

fn mapped_intent(ctx: &TurnContext) -> String {
    let base = effective_intent(ctx);
    apply_intent_mapping(
        &base,
        &ctx.current_state,
        &ctx.memory,
        &ctx.scenario,
        &ctx.global_intent_mapping,
    )
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 1. Entry action
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct EntryActionHandler;

#[async_trait]
impl DialogHandler for EntryActionHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::EntryAction
    }

    fn can_handle(&self, ctx: &mut TurnContext, state: &DialogState) -> bool {
        state.entry_action.is_some() && !memory::entry_action_done(&ctx.memory, &state.name)
    }

    async fn execute(&self, ctx: &mut TurnContext, state: &DialogState) -> HandlerOutcome {
        let messages = run_entry_action(state, &mut ctx.memory)
            .into_iter()
            .collect();
        HandlerOutcome::NoTransition { messages }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 2. Slot filling
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SlotFillingHandler;

#[async_trait]
impl DialogHandler for SlotFillingHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::SlotFilling
    }

    fn can_handle(&self, _ctx: &mut TurnContext, state: &DialogState) -> bool {
        !state.slot_filling_form.is_empty()
    }

    async fn execute(&self, ctx: &mut TurnContext, state: &DialogState) -> HandlerOutcome {
        let Some(outcome) = slots::process(state, &mut ctx.memory) else {
            return HandlerOutcome::NoTransition { messages: vec![] };
        };

        if outcome.completed {
            if let Some((index, handler)) = first_matching_handler(state, &ctx.memory) {
                apply_action(&handler.action, &mut ctx.memory);
                let target = &handler.transition_target;
                ctx.transitions.push(record(
                    &ctx.current_state,
                    &target.dialog_state,
                    format!(
                        "slot filling completed, condition '{}' matched",
                        handler.condition_statement
                    ),
                    "condition",
                ));
                return outcome_for_target(ctx, target, Some(index), outcome.messages);
            }
        }

        HandlerOutcome::NoTransition {
            messages: outcome.messages,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 3. Webhook
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct WebhookHandler {
    pub client: Arc<WebhookClient>,
}

#[async_trait]
impl DialogHandler for WebhookHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Webhook
    }

    fn can_handle(&self, _ctx: &mut TurnContext, state: &DialogState) -> bool {
        !state.webhook_actions.is_empty()
    }

    async fn execute(&self, ctx: &mut TurnContext, state: &DialogState) -> HandlerOutcome {
        let mut messages = Vec::new();
        let user_text = ctx.user_input.clone().unwrap_or_default();

        for action in &state.webhook_actions {
            let Some(definition) = resolve_definition(&ctx.scenario.webhooks, &action.name)
            else {
                tracing::warn!(name = %action.name, "no webhook definitions registered");
                messages.push(format!("webhook not found: {}", action.name));
                continue;
            };
            let definition = definition.clone();

            let response = self
                .client
                .call(
                    &definition,
                    &user_text,
                    &ctx.current_state,
                    &mut ctx.memory,
                    ctx.deadline,
                )
                .await;

            match response {
                Some(body) => {
                    let intent = apply_webhook_response(&body, &mut ctx.memory);
                    tracing::debug!(
                        name = %definition.name,
                        intent = intent.as_deref().unwrap_or(""),
                        "webhook completed"
                    );
                }
                None => {
                    messages.push(format!("webhook call failed: {}", definition.name));
                }
            }
        }

        // The webhook's projection decides the transition via the state's
        // own condition handlers, first match in declaration order.
        if let Some((index, handler)) = first_matching_handler(state, &ctx.memory) {
            apply_action(&handler.action, &mut ctx.memory);
            let target = &handler.transition_target;
            ctx.transitions.push(record(
                &ctx.current_state,
                &target.dialog_state,
                format!("webhook condition '{}' matched", handler.condition_statement),
                "condition",
            ));
            return outcome_for_target(ctx, target, Some(index), messages);
        }

        HandlerOutcome::NoTransition { messages }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 4. Api call
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ApiCallHandler {
    pub client: Arc<ApiCallClient>,
}

#[async_trait]
impl DialogHandler for ApiCallHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::ApiCall
    }

    fn can_handle(&self, _ctx: &mut TurnContext, state: &DialogState) -> bool {
        !state.apicall_handlers.is_empty()
    }

    async fn execute(&self, ctx: &mut TurnContext, state: &DialogState) -> HandlerOutcome {
        let mut messages = Vec::new();

        for handler in &state.apicall_handlers {
            let Some(call) = apicall::resolve(&ctx.scenario, handler) else {
                tracing::warn!(name = %handler.name, "no apicall definition found");
                continue;
            };

            let Some(response) = self
                .client
                .execute(&call, &mut ctx.memory, ctx.deadline)
                .await
            else {
                // Exhausted retries: fall through so a later handler (or a
                // `True` fallback condition) can still advance the session.
                continue;
            };

            apicall::apply_response(&call, &response, &mut ctx.memory, &mut ctx.directive_queue);
            apply_action(&handler.action, &mut ctx.memory);

            if let Some((index, cond)) = first_matching_handler(state, &ctx.memory) {
                apply_action(&cond.action, &mut ctx.memory);
                let target = &cond.transition_target;
                ctx.transitions.push(record(
                    &ctx.current_state,
                    &target.dialog_state,
                    format!(
                        "api call '{}', condition '{}' matched",
                        call.name, cond.condition_statement
                    ),
                    "apicall_condition",
                ));
                return outcome_for_target(ctx, target, Some(index), messages);
            }

            // No condition matched: the handler's own target decides.
            if !handler.transition_target.dialog_state.is_empty() {
                ctx.transitions.push(record(
                    &ctx.current_state,
                    &handler.transition_target.dialog_state,
                    format!("api call '{}' default target", call.name),
                    "apicall_condition",
                ));
                return outcome_for_target(ctx, &handler.transition_target, None, messages);
            }
        }

        HandlerOutcome::NoTransition { messages }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 5. Intent
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct IntentHandler;

#[async_trait]
impl DialogHandler for IntentHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Intent
    }

    fn can_handle(&self, ctx: &mut TurnContext, state: &DialogState) -> bool {
        if state.intent_handlers.is_empty() {
            return false;
        }
        let has_input = ctx
            .user_input
            .as_deref()
            .map(|s| !s.trim().is_empty())
            .unwrap_or(false);
        if !has_input {
            return false;
        }
        // Defer-once: a transition into this state suppresses intent
        // evaluation exactly once, so the transition's own input is not
        // consumed again by the new state.
        if memory::consume_defer_intent_for(&mut ctx.memory, &state.name) {
            tracing::debug!(state = %state.name, "intent evaluation deferred once");
            return false;
        }
        let intent = mapped_intent(ctx);
        state
            .intent_handlers
            .iter()
            .any(|h| h.intent == intent || h.intent == ANY_INTENT)
    }

    async fn execute(&self, ctx: &mut TurnContext, state: &DialogState) -> HandlerOutcome {
        let base = effective_intent(ctx);
        let intent = mapped_intent(ctx);
        if intent != base {
            ctx.memory
                .insert(keys::DM_MAPPED_INTENT.into(), Value::String(intent.clone()));
        }
        ctx.matched_intent = Some(intent.clone());

        // Exact match wins; __ANY_INTENT__ is only a fallback.
        let handler = state
            .intent_handlers
            .iter()
            .find(|h| h.intent == intent)
            .or_else(|| state.intent_handlers.iter().find(|h| h.intent == ANY_INTENT));
        let Some(handler) = handler else {
            return HandlerOutcome::NoTransition { messages: vec![] };
        };

        apply_action(&handler.action, &mut ctx.memory);
        memory::mark_intent_transition(&mut ctx.memory, &intent);

        let target = &handler.transition_target;
        ctx.transitions.push(record(
            &ctx.current_state,
            &target.dialog_state,
            format!("intent '{intent}' matched"),
            "intent",
        ));
        outcome_for_target(ctx, target, None, vec![])
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 6. Event
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct EventHandler;

#[async_trait]
impl DialogHandler for EventHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Event
    }

    fn can_handle(&self, ctx: &mut TurnContext, state: &DialogState) -> bool {
        !state.event_handlers.is_empty()
            && ctx
                .memory
                .get(keys::LAST_EVENT_TYPE)
                .and_then(Value::as_str)
                .map(|s| !s.is_empty())
                .unwrap_or(false)
    }

    async fn execute(&self, ctx: &mut TurnContext, state: &DialogState) -> HandlerOutcome {
        let event_type = ctx
            .memory
            .get(keys::LAST_EVENT_TYPE)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();

        for handler in &state.event_handlers {
            if handler.event_type() != Some(event_type.as_str()) {
                continue;
            }
            apply_action(&handler.action, &mut ctx.memory);
            let target = &handler.transition_target;
            ctx.transitions.push(record(
                &ctx.current_state,
                &target.dialog_state,
                format!("event '{event_type}' matched"),
                "event",
            ));
            return outcome_for_target(ctx, target, None, vec![]);
        }

        HandlerOutcome::NoTransition {
            messages: vec![format!("no handler for event '{event_type}'")],
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 7. Condition
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ConditionHandler;

#[async_trait]
impl DialogHandler for ConditionHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Condition
    }

    fn can_handle(&self, ctx: &mut TurnContext, state: &DialogState) -> bool {
        if state.condition_handlers.is_empty() {
            return false;
        }
        // A state awaiting user input holds its conditions until input
        // arrives (slot completion is what usually unlocks them).
        if state.expects_user_input() && ctx.user_input.is_none() {
            return false;
        }
        true
    }

    async fn execute(&self, ctx: &mut TurnContext, state: &DialogState) -> HandlerOutcome {
        let Some((index, handler)) = first_matching_handler(state, &ctx.memory) else {
            return HandlerOutcome::NoTransition { messages: vec![] };
        };

        apply_action(&handler.action, &mut ctx.memory);
        let target = &handler.transition_target;
        ctx.transitions.push(record(
            &ctx.current_state,
            &target.dialog_state,
            format!("condition '{}' matched", handler.condition_statement),
            "condition",
        ));
        outcome_for_target(ctx, target, Some(index), vec![])
    }
}
