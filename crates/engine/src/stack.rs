//! Plan-frame stack operations.
//!
//! The stack lives inside the session snapshot; these functions are the
//! only code that mutates it. Plan transitions push; same-plan state
//! transitions update the top frame in place; `__END_SCENARIO__` pops,
//! collapsing contiguous frames of the popped plan, and yields a
//! [`ResumePoint`] for the caller's condition handlers.

use sc_domain::scenario::Scenario;
use sc_domain::session::{Frame, ResumePoint};

/// A fresh stack for a session starting at `initial_state`.
pub fn initialize(scenario: &Scenario, initial_state: &str) -> Vec<Frame> {
    let first_plan = scenario
        .plan
        .first()
        .map(|p| p.name.as_str())
        .unwrap_or("Main");
    vec![Frame::new(scenario.name(), first_plan, initial_state)]
}

pub fn current(stack: &[Frame]) -> Option<&Frame> {
    stack.last()
}

/// Same-plan state transition: the top frame moves to `new_state` and its
/// resume bookkeeping resets for the fresh state.
pub fn update_state(stack: &mut [Frame], new_state: &str) {
    if let Some(frame) = stack.last_mut() {
        frame.dialog_state_name = new_state.to_owned();
        frame.last_executed_handler_index = None;
        frame.entry_action_executed = false;
    }
}

/// Record which condition handler the top frame consumed last.
pub fn set_handler_index(stack: &mut [Frame], index: usize) {
    if let Some(frame) = stack.last_mut() {
        frame.last_executed_handler_index = Some(index);
    }
}

/// Mark the top frame's entry action as executed.
pub fn mark_entry_action(stack: &mut [Frame]) {
    if let Some(frame) = stack.last_mut() {
        frame.entry_action_executed = true;
    }
}

/// Plan transition: record resume info on the current top frame, then push
/// a frame for the target plan.
pub fn switch_to_plan(
    stack: &mut Vec<Frame>,
    target_plan: &str,
    target_state: &str,
    handler_index: Option<usize>,
    current_state: &str,
) {
    let scenario_name = match stack.last_mut() {
        Some(frame) => {
            frame.last_executed_handler_index = handler_index;
            frame.dialog_state_name = current_state.to_owned();
            frame.scenario_name.clone()
        }
        None => target_plan.to_owned(),
    };
    stack.push(Frame::new(&scenario_name, target_plan, target_state));
}

/// Pop on `__END_SCENARIO__`.
///
/// The ended frame is removed along with any contiguous frames of the
/// same plan beneath it. Returns the resume point for the new top frame,
/// or `None` when the pop would empty the stack (the session ends).
pub fn handle_end_scenario(stack: &mut Vec<Frame>) -> Option<ResumePoint> {
    if stack.len() <= 1 {
        tracing::warn!("end-scenario with no caller frame, session will end");
        stack.clear();
        return None;
    }

    let ended = stack.pop().expect("stack checked non-empty");
    let mut collapsed = 0;
    while stack
        .last()
        .map(|f| f.plan_name == ended.plan_name)
        .unwrap_or(false)
    {
        stack.pop();
        collapsed += 1;
    }
    if collapsed > 0 {
        tracing::debug!(plan = %ended.plan_name, collapsed, "collapsed duplicate plan frames");
    }

    let frame = stack.last()?.clone();
    Some(ResumePoint {
        next_handler_index: frame
            .last_executed_handler_index
            .map(|i| i + 1)
            .unwrap_or(0),
        entry_action_executed: frame.entry_action_executed,
        frame,
    })
}
