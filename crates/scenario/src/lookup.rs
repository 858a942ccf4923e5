//! Dialog-state and plan lookup over a loaded scenario.

use sc_domain::scenario::{DialogState, Plan, Scenario};

/// Find a dialog state by name.
///
/// When `active_plan` is given, that plan (including its nested
/// plan-as-state sub-plans) is searched first; otherwise plans are searched
/// in declaration order. Falls back to a global search so cross-plan
/// targets still resolve.
pub fn find_dialog_state<'a>(
    scenario: &'a Scenario,
    state_name: &str,
    active_plan: Option<&str>,
) -> Option<&'a DialogState> {
    if let Some(plan_name) = active_plan {
        // 1) Top-level plan with that name.
        if let Some(plan) = plan_by_name(scenario, plan_name) {
            if let Some(ds) = states_by_name(&plan.dialog_states, state_name) {
                return Some(ds);
            }
        }
        // 2) The active plan may itself be a nested plan-as-state.
        if let Some(nested) = nested_plan_state(scenario, plan_name) {
            if let Some(ds) = states_by_name(&nested.nested_states, state_name) {
                return Some(ds);
            }
        }
    }

    // 3) All top-level plans in declaration order.
    for plan in &scenario.plan {
        if let Some(ds) = states_by_name(&plan.dialog_states, state_name) {
            return Some(ds);
        }
    }

    // 4) Nested plan-as-state sub-plans.
    for plan in &scenario.plan {
        for ds in &plan.dialog_states {
            if ds.is_nested_plan() {
                if let Some(found) = states_by_name(&ds.nested_states, state_name) {
                    return Some(found);
                }
            }
        }
    }

    None
}

/// Whether `name` identifies a plan: top-level or nested plan-as-state.
pub fn is_plan_name(scenario: &Scenario, name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    plan_by_name(scenario, name).is_some() || nested_plan_state(scenario, name).is_some()
}

/// A plan's start state: a state literally named `Start` if present,
/// else the plan's first state.
pub fn start_state_of_plan(scenario: &Scenario, plan_name: &str) -> Option<String> {
    let states: &[DialogState] = if let Some(plan) = plan_by_name(scenario, plan_name) {
        &plan.dialog_states
    } else if let Some(nested) = nested_plan_state(scenario, plan_name) {
        &nested.nested_states
    } else {
        return None;
    };

    if states.iter().any(|s| s.name == "Start") {
        return Some("Start".into());
    }
    states.first().map(|s| s.name.clone())
}

/// The scenario's initial state: `Start` in the first plan if present,
/// else the first plan's first state.
pub fn initial_state(scenario: &Scenario) -> String {
    scenario
        .plan
        .first()
        .map(|plan| {
            if plan.dialog_states.iter().any(|s| s.name == "Start") {
                "Start".to_string()
            } else {
                plan.dialog_states
                    .first()
                    .map(|s| s.name.clone())
                    .unwrap_or_default()
            }
        })
        .unwrap_or_default()
}

fn plan_by_name<'a>(scenario: &'a Scenario, name: &str) -> Option<&'a Plan> {
    scenario.plan.iter().find(|p| p.name == name)
}

fn nested_plan_state<'a>(scenario: &'a Scenario, name: &str) -> Option<&'a DialogState> {
    scenario
        .plan
        .iter()
        .flat_map(|p| p.dialog_states.iter())
        .find(|ds| ds.name == name && ds.is_nested_plan())
}

fn states_by_name<'a>(states: &'a [DialogState], name: &str) -> Option<&'a DialogState> {
    states.iter().find(|ds| ds.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario() -> Scenario {
        serde_json::from_str(
            r#"{
                "plan": [
                    {"name": "Main", "dialogState": [
                        {"name": "greeting"},
                        {"name": "Start"},
                        {"name": "router"},
                        {"name": "SubFlow", "dialogState": [
                            {"name": "inner_first"},
                            {"name": "Start"}
                        ]}
                    ]},
                    {"name": "Scene1", "dialogState": [
                        {"name": "scene_entry"},
                        {"name": "router"}
                    ]}
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn active_plan_wins_for_duplicate_names() {
        let s = scenario();
        // "router" exists in both plans; the hint decides which one is found.
        let _main = find_dialog_state(&s, "router", Some("Main")).unwrap();
        let _scene = find_dialog_state(&s, "router", Some("Scene1")).unwrap();
        // Without a hint, declaration order applies.
        assert!(find_dialog_state(&s, "router", None).is_some());
    }

    #[test]
    fn falls_back_to_global_search() {
        let s = scenario();
        let found = find_dialog_state(&s, "scene_entry", Some("Main")).unwrap();
        assert_eq!(found.name, "scene_entry");
    }

    #[test]
    fn nested_plan_states_are_found() {
        let s = scenario();
        let found = find_dialog_state(&s, "inner_first", None).unwrap();
        assert_eq!(found.name, "inner_first");
        assert!(is_plan_name(&s, "SubFlow"));
        assert_eq!(
            start_state_of_plan(&s, "SubFlow").as_deref(),
            Some("Start")
        );
    }

    #[test]
    fn initial_state_prefers_start() {
        let s = scenario();
        assert_eq!(initial_state(&s), "Start");

        let no_start: Scenario = serde_json::from_str(
            r#"{"plan": [{"name": "P", "dialogState": [{"name": "first"}, {"name": "second"}]}]}"#,
        )
        .unwrap();
        assert_eq!(initial_state(&no_start), "first");
    }

    #[test]
    fn start_state_falls_back_to_first_state() {
        let s = scenario();
        assert_eq!(
            start_state_of_plan(&s, "Scene1").as_deref(),
            Some("scene_entry")
        );
        assert!(start_state_of_plan(&s, "NoSuchPlan").is_none());
    }
}
