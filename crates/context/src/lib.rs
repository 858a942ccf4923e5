//! Session snapshot store.
//!
//! A snapshot is `{memory, stack}` keyed by `<sessionId>__bot_builder_dm`,
//! bounded by a TTL. Two variants: a process-local in-memory store and a
//! Redis-backed one (selected when `REDIS_URL` is set).

pub mod memory;
#[cfg(feature = "redis-store")]
pub mod redis_store;
pub mod store;

pub use memory::InMemoryContextStore;
pub use store::{from_config, ContextStore};
