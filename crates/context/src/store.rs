use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use sc_domain::config::ContextConfig;
use sc_domain::session::Snapshot;
use sc_domain::Result;

/// Pluggable session snapshot store.
///
/// Callers serialize per-session access; implementations only need to be
/// safe for concurrent access to disjoint keys.
#[async_trait]
pub trait ContextStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Snapshot>>;
    async fn set(&self, key: &str, snapshot: &Snapshot) -> Result<()>;
}

/// Build the store the configuration asks for: Redis when `REDIS_URL` is
/// set (and the feature is compiled in), the in-memory store otherwise.
pub fn from_config(config: &ContextConfig) -> Result<Arc<dyn ContextStore>> {
    let ttl = Duration::from_millis(config.ttl_ms);

    #[cfg(feature = "redis-store")]
    if let Some(url) = &config.redis_url {
        let store = crate::redis_store::RedisContextStore::new(url, config.ttl_ms)?;
        tracing::info!(ttl_ms = config.ttl_ms, "context store: redis");
        return Ok(Arc::new(store));
    }

    #[cfg(not(feature = "redis-store"))]
    if config.redis_url.is_some() {
        tracing::warn!("REDIS_URL set but the redis-store feature is disabled; using in-memory");
    }

    tracing::info!(ttl_ms = config.ttl_ms, "context store: in-memory");
    Ok(Arc::new(crate::memory::InMemoryContextStore::new(ttl)))
}
