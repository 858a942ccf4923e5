//! Per-session scenario registry.
//!
//! Scenarios are keyed by session id; each session may hold several named
//! scenarios (the wrapper upload shape carries a list) with the first one
//! acting as the primary. The registry also owns the global intent-mapping
//! table, replaceable at runtime.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde_json::Value;

use sc_domain::scenario::{IntentMapping, Scenario, ScenarioDocument};
use sc_domain::trace::TraceEvent;
use sc_domain::{Error, Result};

use crate::unify::unify_webhooks;

struct NamedScenario {
    name: String,
    scenario: Scenario,
}

/// Read-mostly scenario store, safe for concurrent readers.
pub struct ScenarioRepository {
    scenarios: RwLock<HashMap<String, Vec<NamedScenario>>>,
    global_intent_mapping: RwLock<Vec<IntentMapping>>,
}

impl Default for ScenarioRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl ScenarioRepository {
    pub fn new() -> Self {
        Self {
            scenarios: RwLock::new(HashMap::new()),
            global_intent_mapping: RwLock::new(Vec::new()),
        }
    }

    /// Load a scenario document (either accepted shape) for a session.
    ///
    /// Legacy `apicalls` are unified into `webhooks` before the scenario is
    /// stored, so the rest of the engine only ever sees the normal form.
    pub fn load(&self, session_id: &str, document: &Value) -> Result<()> {
        let document: ScenarioDocument = serde_json::from_value(document.clone())
            .map_err(|e| Error::ScenarioLoad(format!("unrecognized scenario shape: {e}")))?;

        let mut loaded = Vec::new();
        match document {
            ScenarioDocument::Wrapped(wrappers) => {
                for wrapper in wrappers {
                    let mut scenario = wrapper.scenario;
                    unify_webhooks(&mut scenario);
                    let name = if wrapper.name.is_empty() {
                        scenario.name().to_owned()
                    } else {
                        wrapper.name
                    };
                    if name.is_empty() {
                        return Err(Error::ScenarioLoad(
                            "wrapped scenario is missing a name".into(),
                        ));
                    }
                    loaded.push(NamedScenario { name, scenario });
                }
            }
            ScenarioDocument::Direct(scenario) => {
                let mut scenario = *scenario;
                unify_webhooks(&mut scenario);
                let name = if scenario.name().is_empty() {
                    "Main".to_string()
                } else {
                    scenario.name().to_owned()
                };
                loaded.push(NamedScenario { name, scenario });
            }
        }

        if loaded.is_empty() {
            return Err(Error::ScenarioLoad("document contains no scenarios".into()));
        }

        for entry in &loaded {
            TraceEvent::ScenarioLoaded {
                session_id: session_id.to_owned(),
                scenario_name: entry.name.clone(),
                plans: entry.scenario.plan.len(),
                webhooks: entry.scenario.webhooks.len(),
            }
            .emit();
        }

        self.scenarios.write().insert(session_id.to_owned(), loaded);
        Ok(())
    }

    /// The session's primary scenario (first loaded).
    pub fn primary(&self, session_id: &str) -> Option<Scenario> {
        self.scenarios
            .read()
            .get(session_id)?
            .first()
            .map(|entry| entry.scenario.clone())
    }

    /// A session scenario by name, falling back to the primary.
    pub fn get(&self, session_id: &str, name: Option<&str>) -> Option<Scenario> {
        let scenarios = self.scenarios.read();
        let entries = scenarios.get(session_id)?;
        match name {
            Some(name) => entries
                .iter()
                .find(|entry| entry.name == name)
                .map(|entry| entry.scenario.clone()),
            None => entries.first().map(|entry| entry.scenario.clone()),
        }
    }

    pub fn has_session(&self, session_id: &str) -> bool {
        self.scenarios.read().contains_key(session_id)
    }

    /// Session ids with at least one loaded scenario.
    pub fn session_ids(&self) -> Vec<String> {
        self.scenarios.read().keys().cloned().collect()
    }

    pub fn remove_session(&self, session_id: &str) {
        self.scenarios.write().remove(session_id);
    }

    /// Replace the global intent-mapping table; applies to subsequent turns
    /// of all sessions.
    pub fn set_global_intent_mapping(&self, mappings: Vec<IntentMapping>) {
        tracing::info!(count = mappings.len(), "global intent mapping replaced");
        *self.global_intent_mapping.write() = mappings;
    }

    pub fn global_intent_mapping(&self) -> Vec<IntentMapping> {
        self.global_intent_mapping.read().clone()
    }
}
