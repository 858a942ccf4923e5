//! Per-session concurrency control.
//!
//! Ensures only one turn runs per session at a time: within a session,
//! turns are processed in arrival order; across sessions, turns run
//! concurrently.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Manages per-session turn locks.
///
/// Each session id maps to a `Semaphore(1)`. Acquiring the permit gives
/// exclusive access for one turn; it auto-releases on drop.
pub struct SessionLockMap {
    locks: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl Default for SessionLockMap {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionLockMap {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire the turn lock for a session, waiting behind any in-flight
    /// turn for the same session.
    pub async fn acquire(&self, session_id: &str) -> OwnedSemaphorePermit {
        let sem = {
            let mut locks = self.locks.lock();
            locks
                .entry(session_id.to_owned())
                .or_insert_with(|| Arc::new(Semaphore::new(1)))
                .clone()
        };
        sem.acquire_owned()
            .await
            .expect("session semaphore is never closed")
    }

    /// Number of tracked sessions (for monitoring).
    pub fn session_count(&self) -> usize {
        self.locks.lock().len()
    }

    /// Remove locks for sessions that aren't actively held.
    pub fn prune_idle(&self) {
        let mut locks = self.locks.lock();
        locks.retain(|_, sem| sem.available_permits() == 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sequential_access() {
        let map = SessionLockMap::new();

        let permit1 = map.acquire("s1").await;
        drop(permit1);

        let permit2 = map.acquire("s1").await;
        drop(permit2);
    }

    #[tokio::test]
    async fn different_sessions_run_concurrently() {
        let map = Arc::new(SessionLockMap::new());

        let p1 = map.acquire("s1").await;
        let p2 = map.acquire("s2").await;

        assert_eq!(map.session_count(), 2);

        drop(p1);
        drop(p2);
    }

    #[tokio::test]
    async fn same_session_waits_for_the_running_turn() {
        let map = Arc::new(SessionLockMap::new());
        let map2 = map.clone();

        let p1 = map.acquire("s1").await;

        let handle = tokio::spawn(async move {
            let _p2 = map2.acquire("s1").await;
            42
        });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        drop(p1);

        assert_eq!(handle.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn prune_drops_idle_locks_only() {
        let map = SessionLockMap::new();

        let held = map.acquire("busy").await;
        drop(map.acquire("idle").await);

        map.prune_idle();
        assert_eq!(map.session_count(), 1);

        drop(held);
    }
}
