//! Execution engine: the per-turn state-cycle driver.
//!
//! One turn = restore snapshot, reconcile the current state, hydrate
//! memory, run the handler cycle (bounded by a cycle cap and an execution
//! depth guard), persist the snapshot, report the outcome. The cycle
//! suspends only at external calls; everything else is synchronous.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use sc_context::ContextStore;
use sc_domain::scenario::{
    IntentMapping, Scenario, StateTransitionRecord, END_SESSION,
};
use sc_domain::session::{context_key, Memory, ResumePoint, Snapshot};
use sc_domain::trace::TraceEvent;
use sc_domain::{Error, Result};

use sc_scenario::{find_dialog_state, initial_state, is_plan_name, start_state_of_plan};

use crate::actions::{apply_action, record, run_entry_action};
use crate::apicall::ApiCallClient;
use crate::condition::evaluate;
use crate::handlers::{default_handlers, DialogHandler, HandlerKind, HandlerOutcome, TurnContext};
use crate::memory::{self, keys};
use crate::stack;
use crate::template::QueuedDirective;
use crate::webhook::WebhookClient;

/// Cap on handler cycles per turn.
const MAX_CYCLES: u32 = 5;
/// Cap on transitions applied within one turn, counting state and plan
/// entries as well as end-scenario resume steps. Cascading pops through a
/// deep frame stack can apply several transitions inside a single cycle,
/// so the cycle cap alone does not bound them.
const MAX_EXECUTION_DEPTH: u32 = 10;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn I/O
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default)]
pub struct TurnRequest {
    pub session_id: String,
    pub request_id: String,
    /// This turn's text input, if the user typed something.
    pub user_text: Option<String>,
    /// Manual event trigger; consumed by event handlers.
    pub event_type: Option<String>,
    /// Explicit state override; wins over the stack's top frame.
    pub current_state_hint: Option<String>,
    /// NLU result passthrough from the transport.
    pub nlu_result: Option<Value>,
    /// Custom event payload (`userInput.type == "customEvent"`).
    pub custom_event: Option<Value>,
    /// Chatbot metadata stored under `CHATBOT_METADATA`.
    pub metadata: Value,
    pub global_intent_mapping: Vec<IntentMapping>,
}

#[derive(Debug)]
pub struct TurnOutput {
    pub final_state: String,
    pub messages: Vec<String>,
    pub transitions: Vec<StateTransitionRecord>,
    pub intent: Option<String>,
    pub event_type: Option<String>,
    pub memory: Memory,
    pub directive_queue: Vec<QueuedDirective>,
    pub end_session: bool,
}

/// How the cycle loop proceeds after a transition is applied.
enum Flow {
    /// Keep cycling at the (possibly new) current state.
    Continue,
    /// The new state awaits user input; end the turn.
    AwaitInput,
    /// The session is over.
    EndSession,
    /// Resume found nothing further; end the turn where we stand.
    EndTurn,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ExecutionEngine {
    store: Arc<dyn ContextStore>,
    handlers: Vec<Arc<dyn DialogHandler>>,
    turn_deadline: Duration,
}

impl ExecutionEngine {
    pub fn new(store: Arc<dyn ContextStore>, turn_deadline: Duration) -> Self {
        let webhook_client = Arc::new(WebhookClient::new());
        let apicall_client = Arc::new(ApiCallClient::new());
        Self {
            store,
            handlers: default_handlers(webhook_client, apicall_client),
            turn_deadline,
        }
    }

    /// Execute one turn against a scenario.
    pub async fn execute_turn(
        &self,
        scenario: Arc<Scenario>,
        request: TurnRequest,
    ) -> Result<TurnOutput> {
        let key = context_key(&request.session_id);
        let snapshot = self.store.get(&key).await?.unwrap_or_default();
        let mut memory = snapshot.memory;
        let mut stack = snapshot.stack;

        // State priority: explicit argument > top of stack > initial state.
        let current_state = request
            .current_state_hint
            .clone()
            .filter(|s| !s.is_empty())
            .or_else(|| stack::current(&stack).map(|f| f.dialog_state_name.clone()))
            .unwrap_or_else(|| initial_state(&scenario));
        if stack.is_empty() {
            stack = stack::initialize(&scenario, &current_state);
        } else if let Some(frame) = stack.last_mut() {
            if frame.dialog_state_name != current_state {
                frame.dialog_state_name = current_state.clone();
            }
        }
        let active_plan = stack::current(&stack)
            .map(|f| f.plan_name.clone())
            .unwrap_or_else(|| scenario.name().to_owned());

        TraceEvent::TurnStarted {
            session_id: request.session_id.clone(),
            state: current_state.clone(),
            has_text: request.user_text.is_some(),
            event_type: request.event_type.clone(),
        }
        .emit();

        // Hydrate memory: stale-input discard first, then this turn's input.
        memory::hydrate(
            &mut memory,
            &request.session_id,
            &request.request_id,
            request.metadata.clone(),
        );
        memory::consume_clear_input_flag(&mut memory);
        memory.remove(keys::INTENT_TRANSITIONED);
        if let Some(text) = request.user_text.as_deref() {
            memory::install_text_input(&mut memory, text);
            // Fresh text supersedes the defer-once guard: deferral protects
            // against re-consuming a previous turn's input, never new input.
            if !text.trim().is_empty() {
                memory.remove(keys::DEFER_INTENT_ONCE);
            }
        }
        if let Some(nlu) = request.nlu_result.clone() {
            memory::install_nlu_result(&mut memory, nlu);
        }
        memory::project_entities(&mut memory);
        if let Some(event) = request.custom_event.clone() {
            memory::install_custom_event(&mut memory, event);
        }
        if let Some(event_type) = request.event_type.as_deref() {
            memory.insert(
                keys::LAST_EVENT_TYPE.into(),
                Value::String(event_type.to_owned()),
            );
        }

        // The depth counter tracks transitions applied within this turn;
        // a stale value left by an aborted turn must not shorten this one.
        memory::set_execution_depth(&mut memory, 0);

        let mut ctx = TurnContext {
            session_id: request.session_id.clone(),
            current_state,
            active_plan,
            scenario: scenario.clone(),
            memory,
            user_input: request
                .user_text
                .clone()
                .map(|s| s.trim().to_owned())
                .filter(|s| !s.is_empty()),
            global_intent_mapping: Arc::new(request.global_intent_mapping.clone()),
            directive_queue: Vec::new(),
            transitions: Vec::new(),
            matched_intent: None,
            deadline: Instant::now() + self.turn_deadline,
        };
        let from_state = ctx.current_state.clone();

        let (messages, cycles, end_session) =
            self.run_cycles(&mut ctx, &mut stack).await?;

        // Turn teardown.
        ctx.memory.remove(keys::LAST_EVENT_TYPE);
        memory::set_execution_depth(&mut ctx.memory, 0);

        let final_state = if end_session {
            END_SESSION.to_owned()
        } else {
            ctx.current_state.clone()
        };

        // Persist only after a successful cycle.
        let snapshot = Snapshot {
            memory: ctx.memory.clone(),
            stack: stack.clone(),
        };
        self.store.set(&key, &snapshot).await?;
        TraceEvent::SnapshotPersisted {
            session_id: request.session_id.clone(),
            memory_keys: snapshot.memory.len(),
            stack_depth: snapshot.stack.len(),
        }
        .emit();
        TraceEvent::TurnCompleted {
            session_id: request.session_id,
            from_state,
            to_state: final_state.clone(),
            cycles,
            transitions: ctx.transitions.len(),
        }
        .emit();

        Ok(TurnOutput {
            final_state,
            messages,
            transitions: std::mem::take(&mut ctx.transitions),
            intent: ctx.matched_intent.clone(),
            event_type: request.event_type,
            memory: ctx.memory,
            directive_queue: ctx.directive_queue,
            end_session,
        })
    }

    /// Clear the session and restart at the scenario's initial state.
    pub async fn reset_session(&self, scenario: &Scenario, session_id: &str) -> Result<String> {
        let initial = initial_state(scenario);
        let snapshot = Snapshot {
            memory: Memory::new(),
            stack: stack::initialize(scenario, &initial),
        };
        self.store.set(&context_key(session_id), &snapshot).await?;
        TraceEvent::SessionReset {
            session_id: session_id.to_owned(),
            initial_state: initial.clone(),
        }
        .emit();
        Ok(initial)
    }

    /// The persisted snapshot for a session, if any.
    pub async fn snapshot(&self, session_id: &str) -> Result<Option<Snapshot>> {
        self.store.get(&context_key(session_id)).await
    }

    // ──────────────────────────────────────────────────────────────────
    // Handler cycle
    // ──────────────────────────────────────────────────────────────────

    async fn run_cycles(
        &self,
        ctx: &mut TurnContext,
        stack: &mut Vec<sc_domain::session::Frame>,
    ) -> Result<(Vec<String>, u32, bool)> {
        let mut messages = Vec::new();
        let mut cycles = 0u32;
        let mut end_session = false;

        'cycle: while cycles < MAX_CYCLES {
            cycles += 1;

            let state = find_dialog_state(&ctx.scenario, &ctx.current_state, Some(&ctx.active_plan))
                .cloned()
                .ok_or_else(|| Error::StateNotFound(ctx.current_state.clone()))?;

            let mut any_transition = false;
            for handler in &self.handlers {
                if !handler.can_handle(ctx, &state) {
                    continue;
                }
                let kind = handler.kind();
                tracing::debug!(cycle = cycles, state = %state.name, ?kind, "executing handler");
                let outcome = handler.execute(ctx, &state).await;

                // Entry actions for the starting state count for the frame.
                if kind == HandlerKind::EntryAction {
                    stack::mark_entry_action(stack);
                }

                match outcome {
                    HandlerOutcome::NoTransition {
                        messages: handler_messages,
                    } => {
                        messages.extend(handler_messages);
                        // A registered slot wait parks the turn here.
                        if kind == HandlerKind::SlotFilling
                            && ctx.memory.contains_key(keys::WAITING_FOR_SLOT)
                        {
                            break 'cycle;
                        }
                    }
                    outcome => {
                        let flow = self
                            .apply_outcome(ctx, stack, outcome, &mut messages)
                            .await?;
                        any_transition = true;
                        match flow {
                            Flow::Continue => continue 'cycle,
                            Flow::AwaitInput | Flow::EndTurn => break 'cycle,
                            Flow::EndSession => {
                                end_session = true;
                                break 'cycle;
                            }
                        }
                    }
                }
            }

            if !any_transition {
                break;
            }
        }

        if cycles >= MAX_CYCLES {
            tracing::warn!(cycles, "maximum handler cycles reached");
        }

        Ok((messages, cycles, end_session))
    }

    /// Apply a transition outcome to the stack and context, run the target
    /// entry action, and decide how the cycle proceeds.
    async fn apply_outcome(
        &self,
        ctx: &mut TurnContext,
        stack: &mut Vec<sc_domain::session::Frame>,
        outcome: HandlerOutcome,
        messages: &mut Vec<String>,
    ) -> Result<Flow> {
        match outcome {
            HandlerOutcome::NoTransition {
                messages: handler_messages,
            } => {
                messages.extend(handler_messages);
                Ok(Flow::Continue)
            }
            // Same-plan transitions move the frame to the new state; the
            // consumed handler index only matters when a plan is pushed
            // from here, and switch_to_plan records it then.
            HandlerOutcome::StateTransition {
                new_state,
                messages: handler_messages,
                handler_index: _,
            } => {
                messages.extend(handler_messages);
                if new_state == END_SESSION {
                    return Ok(Flow::EndSession);
                }
                if new_state.is_empty() || new_state == ctx.current_state {
                    return Ok(Flow::EndTurn);
                }
                self.enter_state(ctx, stack, None, &new_state, messages)
            }
            HandlerOutcome::PlanTransition {
                target_plan,
                new_state,
                handler_index,
                messages: handler_messages,
            } => {
                messages.extend(handler_messages);
                self.enter_state(ctx, stack, Some((target_plan, handler_index)), &new_state, messages)
            }
            HandlerOutcome::EndScenario {
                messages: handler_messages,
                handler_index,
            } => {
                messages.extend(handler_messages);
                if let Some(index) = handler_index {
                    stack::set_handler_index(stack, index);
                }
                match stack::handle_end_scenario(stack) {
                    None => Ok(Flow::EndSession),
                    Some(resume) => self.resume_after_end(ctx, stack, resume, messages),
                }
            }
        }
    }

    /// Common transition tail: update the stack, flag the cross-request
    /// input discipline, run the target's entry action, and decide whether
    /// the turn must wait for user input.
    fn enter_state(
        &self,
        ctx: &mut TurnContext,
        stack: &mut Vec<sc_domain::session::Frame>,
        plan_switch: Option<(String, Option<usize>)>,
        new_state: &str,
        messages: &mut Vec<String>,
    ) -> Result<Flow> {
        // Depth guard: checked before any stack mutation so a chain past
        // the limit stops with the current state intact.
        let depth = memory::execution_depth(&ctx.memory) + 1;
        if depth > MAX_EXECUTION_DEPTH {
            tracing::warn!(depth, target_state = %new_state, "execution depth limit reached");
            messages.push(format!(
                "execution depth limit reached ({MAX_EXECUTION_DEPTH})"
            ));
            return Ok(Flow::EndTurn);
        }
        memory::set_execution_depth(&mut ctx.memory, depth);

        let from_state = ctx.current_state.clone();

        match plan_switch {
            Some((target_plan, handler_index)) => {
                stack::switch_to_plan(stack, &target_plan, new_state, handler_index, &from_state);
                TraceEvent::PlanSwitched {
                    session_id: ctx.session_id.clone(),
                    from_plan: ctx.active_plan.clone(),
                    to_plan: target_plan.clone(),
                    state: new_state.to_owned(),
                }
                .emit();
                ctx.active_plan = target_plan;
            }
            None => stack::update_state(stack, new_state),
        }

        // Input is consumed by at most one handler per turn: once a
        // transition fires, later states see no text input.
        ctx.user_input = None;
        memory::clear_user_input(&mut ctx.memory);
        memory::flag_transition(&mut ctx.memory, &from_state, new_state);
        ctx.current_state = new_state.to_owned();

        // Fresh frame entry: the entry action runs again even if an older
        // visit left its marker behind.
        let state = find_dialog_state(&ctx.scenario, new_state, Some(&ctx.active_plan))
            .cloned()
            .ok_or_else(|| Error::StateNotFound(new_state.to_owned()))?;
        memory::reset_entry_action(&mut ctx.memory, new_state);
        if let Some(text) = run_entry_action(&state, &mut ctx.memory) {
            messages.push(text);
        }
        stack::mark_entry_action(stack);

        // Entering a slot-filling state asks its question right away; the
        // turn then waits for the answer. With the form already satisfied
        // (entities projected this turn), the cycle continues and lets the
        // slot handler's condition pass take over.
        if !state.slot_filling_form.is_empty() {
            if let Some(outcome) = crate::slots::process(&state, &mut ctx.memory) {
                messages.extend(outcome.messages);
                if outcome.waiting {
                    return Ok(Flow::AwaitInput);
                }
                return Ok(Flow::Continue);
            }
        }

        if state.expects_user_input() {
            tracing::debug!(state = %new_state, "new state awaits user input, ending turn");
            return Ok(Flow::AwaitInput);
        }
        Ok(Flow::Continue)
    }

    /// Continue a caller's condition handlers after `__END_SCENARIO__`.
    ///
    /// Evaluation starts strictly at `next_handler_index`; the resumed
    /// state's entry action never re-runs. A match behaves like a normal
    /// condition transition (including nested end-scenario pops).
    fn resume_after_end(
        &self,
        ctx: &mut TurnContext,
        stack: &mut Vec<sc_domain::session::Frame>,
        resume: ResumePoint,
        messages: &mut Vec<String>,
    ) -> Result<Flow> {
        let mut resume = resume;
        loop {
            let resumed_state_name = resume.frame.dialog_state_name.clone();
            let ended_plan = ctx.active_plan.clone();
            ctx.active_plan = resume.frame.plan_name.clone();
            ctx.current_state = resumed_state_name.clone();

            // Each resume step counts against the depth guard: a deep
            // stack of cascading end-scenario pops is the one path that
            // applies many transitions inside a single cycle.
            let depth = memory::execution_depth(&ctx.memory) + 1;
            if depth > MAX_EXECUTION_DEPTH {
                tracing::warn!(
                    depth,
                    state = %resumed_state_name,
                    "execution depth limit reached during resume"
                );
                messages.push(format!(
                    "execution depth limit reached ({MAX_EXECUTION_DEPTH})"
                ));
                return Ok(Flow::EndTurn);
            }
            memory::set_execution_depth(&mut ctx.memory, depth);

            TraceEvent::ScenarioEnded {
                session_id: ctx.session_id.clone(),
                ended_plan,
                resumed_state: Some(resumed_state_name.clone()),
                next_handler_index: Some(resume.next_handler_index),
            }
            .emit();

            let Some(state) =
                find_dialog_state(&ctx.scenario, &resumed_state_name, Some(&ctx.active_plan))
                    .cloned()
            else {
                tracing::warn!(state = %resumed_state_name, "resume state not found, ending turn");
                return Ok(Flow::EndTurn);
            };

            let handlers = &state.condition_handlers;
            if resume.next_handler_index >= handlers.len() {
                tracing::debug!(
                    state = %resumed_state_name,
                    "no condition handlers left after resume"
                );
                return Ok(Flow::EndTurn);
            }

            let matched = handlers
                .iter()
                .enumerate()
                .skip(resume.next_handler_index)
                .find(|(_, h)| evaluate(&h.condition_statement, &ctx.memory));

            let Some((index, handler)) = matched else {
                return Ok(Flow::EndTurn);
            };

            apply_action(&handler.action, &mut ctx.memory);
            stack::set_handler_index(stack, index);
            let target = handler.transition_target.clone();
            ctx.transitions.push(record(
                &resumed_state_name,
                &target.dialog_state,
                format!(
                    "resumed condition '{}' matched",
                    handler.condition_statement
                ),
                "condition",
            ));

            if target.dialog_state == sc_domain::scenario::END_SCENARIO {
                match stack::handle_end_scenario(stack) {
                    None => return Ok(Flow::EndSession),
                    Some(next) => {
                        resume = next;
                        continue;
                    }
                }
            }
            if target.dialog_state == END_SESSION {
                return Ok(Flow::EndSession);
            }

            let plan_switch = if !target.scenario.is_empty()
                && target.scenario != ctx.active_plan
                && is_plan_name(&ctx.scenario, &target.scenario)
            {
                let target_state = if target.dialog_state.is_empty() {
                    start_state_of_plan(&ctx.scenario, &target.scenario).unwrap_or_default()
                } else {
                    target.dialog_state.clone()
                };
                Some((target.scenario.clone(), target_state))
            } else {
                None
            };

            return match plan_switch {
                Some((plan, target_state)) => {
                    self.enter_state(ctx, stack, Some((plan, Some(index))), &target_state, messages)
                }
                None => self.enter_state(ctx, stack, None, &target.dialog_state, messages),
            };
        }
    }
}
