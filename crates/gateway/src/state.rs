use std::sync::Arc;

use sc_context::ContextStore;
use sc_domain::config::Config;
use sc_engine::ExecutionEngine;
use sc_scenario::ScenarioRepository;

use crate::session_lock::SessionLockMap;

/// Shared application state passed to all API handlers.
///
/// Fields are grouped by concern:
/// - **Core services** — config, scenario repository, execution engine
/// - **Persistence** — the session snapshot store
/// - **Concurrency** — per-session turn locks
#[derive(Clone)]
pub struct AppState {
    // ── Core services ─────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub repository: Arc<ScenarioRepository>,
    pub engine: Arc<ExecutionEngine>,

    // ── Persistence ───────────────────────────────────────────────────
    pub store: Arc<dyn ContextStore>,

    // ── Concurrency ───────────────────────────────────────────────────
    pub session_locks: Arc<SessionLockMap>,
}
