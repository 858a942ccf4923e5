//! Scenario repository.
//!
//! Loads scenario documents (both accepted shapes), unifies legacy
//! `apicalls` into typed webhooks, and answers the engine's lookup
//! questions: find a dialog state (honoring the active plan), resolve a
//! plan's start state, resolve the initial state.

pub mod lookup;
pub mod repository;
pub mod unify;

pub use lookup::{find_dialog_state, initial_state, is_plan_name, start_state_of_plan};
pub use repository::ScenarioRepository;
