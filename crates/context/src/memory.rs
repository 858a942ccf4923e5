//! Process-local snapshot store with per-entry expiry.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;

use sc_domain::session::Snapshot;
use sc_domain::Result;

use crate::store::ContextStore;

struct Entry {
    snapshot: Snapshot,
    expires_at: Instant,
}

pub struct InMemoryContextStore {
    ttl: Duration,
    entries: RwLock<HashMap<String, Entry>>,
}

impl InMemoryContextStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Drop expired entries. Expiry is also enforced lazily on `get`.
    pub fn sweep(&self) {
        let now = Instant::now();
        self.entries.write().retain(|_, e| e.expires_at > now);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl ContextStore for InMemoryContextStore {
    async fn get(&self, key: &str) -> Result<Option<Snapshot>> {
        {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    return Ok(Some(entry.snapshot.clone()));
                }
                Some(_) => {} // expired, fall through to remove
                None => return Ok(None),
            }
        }
        self.entries.write().remove(key);
        Ok(None)
    }

    async fn set(&self, key: &str, snapshot: &Snapshot) -> Result<()> {
        self.entries.write().insert(
            key.to_owned(),
            Entry {
                snapshot: snapshot.clone(),
                expires_at: Instant::now() + self.ttl,
            },
        );
        Ok(())
    }
}
