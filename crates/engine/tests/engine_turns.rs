//! End-to-end turns against an in-memory context store: transitions,
//! slot filling across turns, plan call-stack resume, and the
//! input-consumption discipline.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use sc_context::InMemoryContextStore;
use sc_domain::scenario::Scenario;
use sc_engine::{ExecutionEngine, TurnOutput, TurnRequest};

fn engine() -> ExecutionEngine {
    let store = Arc::new(InMemoryContextStore::new(Duration::from_secs(60)));
    ExecutionEngine::new(store, Duration::from_secs(5))
}

fn scenario(value: Value) -> Arc<Scenario> {
    Arc::new(serde_json::from_value(value).unwrap())
}

fn text_turn(session: &str, state: Option<&str>, text: &str, intent: &str) -> TurnRequest {
    TurnRequest {
        session_id: session.into(),
        request_id: format!("req-{session}"),
        user_text: Some(text.into()),
        current_state_hint: state.map(str::to_owned),
        nlu_result: Some(json!({"intent": intent, "entities": []})),
        ..Default::default()
    }
}

fn empty_turn(session: &str, state: Option<&str>) -> TurnRequest {
    TurnRequest {
        session_id: session.into(),
        request_id: format!("req-{session}"),
        current_state_hint: state.map(str::to_owned),
        ..Default::default()
    }
}

async fn run(engine: &ExecutionEngine, scenario: &Arc<Scenario>, request: TurnRequest) -> TurnOutput {
    engine
        .execute_turn(scenario.clone(), request)
        .await
        .expect("turn should succeed")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Simple condition match
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn empty_turn_follows_true_condition_and_runs_entry_action() {
    let scenario = scenario(json!({
        "plan": [{"name": "Main", "dialogState": [
            {"name": "Start", "conditionHandlers": [
                {"conditionStatement": "True", "transitionTarget": {"scenario": "Main", "dialogState": "End"}}
            ]},
            {"name": "End", "entryAction": {"directives": [
                {"name": "speak", "content": "처리가 완료되었습니다"}
            ]}}
        ]}]
    }));
    let engine = engine();

    let output = run(&engine, &scenario, empty_turn("s1", Some("Start"))).await;

    assert_eq!(output.final_state, "End");
    assert!(output
        .messages
        .iter()
        .any(|m| m.contains("처리가 완료되었습니다")));
    assert_eq!(output.transitions.len(), 1);
    assert_eq!(output.transitions[0].to_state, "End");

    let snapshot = engine.snapshot("s1").await.unwrap().unwrap();
    assert_eq!(snapshot.stack.len(), 1);
    assert_eq!(snapshot.stack[0].dialog_state_name, "End");
}

#[tokio::test]
async fn entry_action_runs_once_per_visit() {
    let scenario = scenario(json!({
        "plan": [{"name": "Main", "dialogState": [
            {"name": "Start", "conditionHandlers": [
                {"conditionStatement": "True", "transitionTarget": {"dialogState": "End"}}
            ]},
            {"name": "End", "entryAction": {"directives": [
                {"name": "speak", "content": "환영합니다"}
            ]}}
        ]}]
    }));
    let engine = engine();

    let first = run(&engine, &scenario, empty_turn("s1", Some("Start"))).await;
    assert!(first.messages.iter().any(|m| m.contains("환영합니다")));

    // Second turn stays at End; the entry action must not replay.
    let second = run(&engine, &scenario, empty_turn("s1", None)).await;
    assert_eq!(second.final_state, "End");
    assert!(second.messages.is_empty());
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Intent to slot filling across turns
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn weather_scenario() -> Arc<Scenario> {
    scenario(json!({
        "plan": [{"name": "P111", "dialogState": [
            {"name": "Start", "intentHandlers": [
                {"intent": "Weather.Inform",
                 "transitionTarget": {"scenario": "P111", "dialogState": "weather_inform_response"}}
            ]},
            {"name": "weather_inform_response",
             "slotFillingForm": [{
                 "name": "CITY", "required": "Y", "memorySlotKey": ["CITY", "CITY:CITY"],
                 "fillBehavior": {
                     "promptAction": {"directives": [
                         {"name": "speak", "content": {"text": "어느 도시의 날씨를 알려드릴까요?"}}
                     ]},
                     "repromptEventHandlers": []
                 }
             }],
             "conditionHandlers": [
                 {"conditionStatement": "SLOT_FILLING_COMPLETED",
                  "transitionTarget": {"scenario": "P111", "dialogState": "weather_response"}}
             ]},
            {"name": "weather_response", "entryAction": {"directives": [
                {"name": "speak", "content": "날씨를 알려드릴게요"}
            ]}}
        ]}]
    }))
}

#[tokio::test]
async fn intent_transition_prompts_for_the_required_slot() {
    let scenario = weather_scenario();
    let engine = engine();

    let output = run(
        &engine,
        &scenario,
        text_turn("s2", Some("Start"), "날씨 알려줘", "Weather.Inform"),
    )
    .await;

    assert_eq!(output.final_state, "weather_inform_response");
    assert!(output
        .messages
        .iter()
        .any(|m| m.contains("어느 도시의 날씨를 알려드릴까요?")));

    // The clear-on-next-request discipline is armed between turns.
    let snapshot = engine.snapshot("s2").await.unwrap().unwrap();
    assert_eq!(
        snapshot.memory.get("_CLEAR_USER_INPUT_ON_NEXT_REQUEST"),
        Some(&json!(true))
    );
    assert_eq!(snapshot.memory.get("_WAITING_FOR_SLOT"), Some(&json!("CITY")));
}

#[tokio::test]
async fn slot_fill_turn_completes_the_form_and_advances() {
    let scenario = weather_scenario();
    let engine = engine();

    run(
        &engine,
        &scenario,
        text_turn("s2", Some("Start"), "날씨 알려줘", "Weather.Inform"),
    )
    .await;

    let mut second = text_turn("s2", None, "서울", "Weather.Inform");
    second.nlu_result = Some(json!({
        "results": [{"nluNbest": [{
            "intent": "Weather.Inform",
            "entities": [{"type": "CITY", "role": "", "text": "서울", "extra": {}}]
        }]}]
    }));
    let output = run(&engine, &scenario, second).await;

    assert_eq!(output.final_state, "weather_response");
    assert!(output.messages.iter().any(|m| m.contains("날씨를 알려드릴게요")));

    let snapshot = engine.snapshot("s2").await.unwrap().unwrap();
    assert_eq!(snapshot.memory.get("CITY"), Some(&json!("서울")));
    assert!(snapshot.memory.contains_key("SLOT_FILLING_COMPLETED"));
    assert!(!snapshot.memory.contains_key("_WAITING_FOR_SLOT"));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// End-scenario resume
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn sub_plan_pops_and_resumes_the_next_condition_handler() {
    let scenario = scenario(json!({
        "plan": [
            {"name": "Main", "dialogState": [
                {"name": "A", "conditionHandlers": [
                    {"conditionStatement": "{$NEVER} == \"set\"",
                     "transitionTarget": {"scenario": "Main", "dialogState": "unreachable"}},
                    {"conditionStatement": "True",
                     "transitionTarget": {"scenario": "Scene1", "dialogState": "Start"}},
                    {"conditionStatement": "True",
                     "transitionTarget": {"scenario": "Main", "dialogState": "end_process"}}
                ]},
                {"name": "unreachable"},
                {"name": "end_process", "entryAction": {"directives": [
                    {"name": "speak", "content": "복귀 완료"}
                ]}}
            ]},
            {"name": "Scene1", "dialogState": [
                {"name": "Start",
                 "entryAction": {"directives": [{"name": "speak", "content": "장면 시작"}]},
                 "conditionHandlers": [
                     {"conditionStatement": "True",
                      "transitionTarget": {"scenario": "Scene1", "dialogState": "__END_SCENARIO__"}}
                 ]}
            ]}
        ]
    }));
    let engine = engine();

    let output = run(&engine, &scenario, empty_turn("s4", Some("A"))).await;

    // A -> Scene1.Start -> __END_SCENARIO__ -> resume A at index 2 -> end_process.
    assert_eq!(output.final_state, "end_process");
    assert!(output.messages.iter().any(|m| m.contains("장면 시작")));
    assert!(output.messages.iter().any(|m| m.contains("복귀 완료")));

    let to_states: Vec<&str> = output
        .transitions
        .iter()
        .map(|t| t.to_state.as_str())
        .collect();
    assert_eq!(to_states, vec!["Start", "__END_SCENARIO__", "end_process"]);

    let snapshot = engine.snapshot("s4").await.unwrap().unwrap();
    assert_eq!(snapshot.stack.len(), 1);
    assert_eq!(snapshot.stack[0].plan_name, "Main");
    assert_eq!(snapshot.stack[0].dialog_state_name, "end_process");
}

#[tokio::test]
async fn end_scenario_without_caller_ends_the_session() {
    let scenario = scenario(json!({
        "plan": [{"name": "Main", "dialogState": [
            {"name": "Start", "conditionHandlers": [
                {"conditionStatement": "True",
                 "transitionTarget": {"dialogState": "__END_SCENARIO__"}}
            ]}
        ]}]
    }));
    let engine = engine();

    let output = run(&engine, &scenario, empty_turn("s-end", Some("Start"))).await;
    assert!(output.end_session);
    assert_eq!(output.final_state, "__END_SESSION__");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Input consumption discipline
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn text_is_consumed_by_at_most_one_intent_handler() {
    // Start consumes the text; the chain passes through a condition state
    // into a state whose __ANY_INTENT__ handler must NOT see the same text.
    let scenario = scenario(json!({
        "plan": [{"name": "Main", "dialogState": [
            {"name": "Start", "intentHandlers": [
                {"intent": "say.yes", "transitionTarget": {"dialogState": "middle"}}
            ]},
            {"name": "middle", "conditionHandlers": [
                {"conditionStatement": "True", "transitionTarget": {"dialogState": "final_state"}}
            ]},
            {"name": "final_state", "intentHandlers": [
                {"intent": "__ANY_INTENT__", "transitionTarget": {"dialogState": "trap"}}
            ]},
            {"name": "trap"}
        ]}]
    }));
    let engine = engine();

    let output = run(
        &engine,
        &scenario,
        text_turn("s5", Some("Start"), "네", "say.yes"),
    )
    .await;

    assert_eq!(output.final_state, "final_state");
    let intent_transitions = output
        .transitions
        .iter()
        .filter(|t| t.handler_type == "intent")
        .count();
    assert_eq!(intent_transitions, 1);
}

#[tokio::test]
async fn next_turn_text_is_evaluated_normally_after_a_transition() {
    let scenario = scenario(json!({
        "plan": [{"name": "Main", "dialogState": [
            {"name": "Start", "intentHandlers": [
                {"intent": "say.hello", "transitionTarget": {"dialogState": "greet_state"}}
            ]},
            {"name": "greet_state", "intentHandlers": [
                {"intent": "say.hello", "transitionTarget": {"dialogState": "again_state"}},
                {"intent": "__ANY_INTENT__", "transitionTarget": {"dialogState": "fallback_state"}}
            ]},
            {"name": "again_state"},
            {"name": "fallback_state"}
        ]}]
    }));
    let engine = engine();

    let first = run(
        &engine,
        &scenario,
        text_turn("s6", Some("Start"), "안녕", "say.hello"),
    )
    .await;
    // The transition's own text is not re-consumed by greet_state.
    assert_eq!(first.final_state, "greet_state");

    let second = run(&engine, &scenario, text_turn("s6", None, "또 안녕", "say.hello")).await;
    assert_eq!(second.final_state, "again_state");
}

#[tokio::test]
async fn fresh_nlu_result_outranks_a_stale_intent_slot() {
    // Turn 1 leaves a flattened NLU_INTENT slot behind (as a webhook or
    // api call would) while transitioning into an intent-waiting state.
    // Turn 2's freshly classified text must win over the stale slot.
    let scenario = scenario(json!({
        "plan": [{"name": "Main", "dialogState": [
            {"name": "Start", "conditionHandlers": [
                {"conditionStatement": "True",
                 "action": {"memoryActions": [
                     {"actionType": "ADD", "memorySlotKey": "NLU_INTENT",
                      "memorySlotValue": "Stale.Intent", "actionScope": "SESSION"}
                 ]},
                 "transitionTarget": {"dialogState": "wait_state"}}
            ]},
            {"name": "wait_state", "intentHandlers": [
                {"intent": "Stale.Intent", "transitionTarget": {"dialogState": "stale_state"}},
                {"intent": "Fresh.Intent", "transitionTarget": {"dialogState": "fresh_state"}}
            ]},
            {"name": "stale_state"},
            {"name": "fresh_state"}
        ]}]
    }));
    let engine = engine();

    let first = run(&engine, &scenario, empty_turn("s13", Some("Start"))).await;
    assert_eq!(first.final_state, "wait_state");
    let snapshot = engine.snapshot("s13").await.unwrap().unwrap();
    assert_eq!(snapshot.memory.get("NLU_INTENT"), Some(&json!("Stale.Intent")));

    let second = run(
        &engine,
        &scenario,
        text_turn("s13", None, "새로운 요청이에요", "Fresh.Intent"),
    )
    .await;
    assert_eq!(second.final_state, "fresh_state");
    assert_eq!(second.intent.as_deref(), Some("Fresh.Intent"));
}

#[tokio::test]
async fn exact_intent_match_beats_any_intent() {
    let scenario = scenario(json!({
        "plan": [{"name": "Main", "dialogState": [
            {"name": "Start", "intentHandlers": [
                {"intent": "__ANY_INTENT__", "transitionTarget": {"dialogState": "anywhere"}},
                {"intent": "say.yes", "transitionTarget": {"dialogState": "yes_state"}}
            ]},
            {"name": "anywhere"},
            {"name": "yes_state"}
        ]}]
    }));
    let engine = engine();

    let output = run(
        &engine,
        &scenario,
        text_turn("s7", Some("Start"), "네", "say.yes"),
    )
    .await;
    assert_eq!(output.final_state, "yes_state");

    let other = run(
        &engine,
        &scenario,
        text_turn("s8", Some("Start"), "음", "say.unknown"),
    )
    .await;
    assert_eq!(other.final_state, "anywhere");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Events, DM mapping, reset, errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn manual_event_triggers_the_matching_handler() {
    let scenario = scenario(json!({
        "plan": [{"name": "Main", "dialogState": [
            {"name": "Start", "eventHandlers": [
                {"event": {"type": "USER_DIALOG_START"},
                 "transitionTarget": {"dialogState": "greeting"}}
            ]},
            {"name": "greeting", "entryAction": {"directives": [
                {"name": "speak", "content": "반갑습니다"}
            ]}}
        ]}]
    }));
    let engine = engine();

    let mut request = empty_turn("s9", Some("Start"));
    request.event_type = Some("USER_DIALOG_START".into());
    let output = run(&engine, &scenario, request).await;

    assert_eq!(output.final_state, "greeting");
    assert!(output.messages.iter().any(|m| m.contains("반갑습니다")));
    // The trigger is consumed; it must not linger in the snapshot.
    let snapshot = engine.snapshot("s9").await.unwrap().unwrap();
    assert!(!snapshot.memory.contains_key("lastEventType"));
}

#[tokio::test]
async fn global_intent_mapping_rewrites_the_base_intent() {
    let scenario = scenario(json!({
        "plan": [{"name": "Main", "dialogState": [
            {"name": "router", "intentHandlers": [
                {"intent": "Positive", "transitionTarget": {"dialogState": "positive_response"}},
                {"intent": "__ANY_INTENT__", "transitionTarget": {"dialogState": "fallback_state"}}
            ]},
            {"name": "positive_response"},
            {"name": "fallback_state"}
        ]}]
    }));
    let engine = engine();

    let mut request = text_turn("s10", Some("router"), "네 맞아요", "say.yes");
    request.global_intent_mapping = vec![serde_json::from_value(json!({
        "scenario": "Main",
        "dialogState": "router",
        "intents": ["say.yes"],
        "conditionStatement": "",
        "dmIntent": "Positive"
    }))
    .unwrap()];
    let output = run(&engine, &scenario, request).await;

    assert_eq!(output.final_state, "positive_response");
    assert_eq!(output.intent.as_deref(), Some("Positive"));
}

#[tokio::test]
async fn reset_returns_the_session_to_the_initial_state() {
    let scenario = weather_scenario();
    let engine = engine();

    run(
        &engine,
        &scenario,
        text_turn("s11", Some("Start"), "날씨 알려줘", "Weather.Inform"),
    )
    .await;

    let initial = engine.reset_session(&scenario, "s11").await.unwrap();
    assert_eq!(initial, "Start");

    let snapshot = engine.snapshot("s11").await.unwrap().unwrap();
    assert!(snapshot.memory.is_empty());
    assert_eq!(snapshot.stack.len(), 1);
    assert_eq!(snapshot.stack[0].dialog_state_name, "Start");
}

#[tokio::test]
async fn unknown_state_is_an_error_and_leaves_the_session_untouched() {
    let scenario = scenario(json!({
        "plan": [{"name": "Main", "dialogState": [{"name": "Start"}]}]
    }));
    let engine = engine();

    let err = engine
        .execute_turn(scenario.clone(), empty_turn("s12", Some("no_such_state")))
        .await
        .unwrap_err();
    assert!(matches!(err, sc_domain::Error::StateNotFound(_)));
    assert!(engine.snapshot("s12").await.unwrap().is_none());
}
