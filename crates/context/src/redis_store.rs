//! Redis-backed snapshot store.
//!
//! Snapshots are stored as JSON strings with a millisecond TTL
//! (`SET key value PX ttl`), so expiry is enforced server-side and
//! sessions survive process restarts.

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::MultiplexedConnection;

use sc_domain::session::Snapshot;
use sc_domain::{Error, Result};

use crate::store::ContextStore;

pub struct RedisContextStore {
    client: redis::Client,
    ttl_ms: u64,
    connection: Mutex<Option<MultiplexedConnection>>,
}

impl RedisContextStore {
    pub fn new(url: &str, ttl_ms: u64) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| Error::ContextStore(format!("invalid REDIS_URL: {e}")))?;
        Ok(Self {
            client,
            ttl_ms,
            connection: Mutex::new(None),
        })
    }

    async fn connection(&self) -> Result<MultiplexedConnection> {
        if let Some(conn) = self.connection.lock().clone() {
            return Ok(conn);
        }
        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| Error::ContextStore(format!("redis connect: {e}")))?;
        *self.connection.lock() = Some(conn.clone());
        Ok(conn)
    }

    fn drop_connection(&self) {
        *self.connection.lock() = None;
    }
}

#[async_trait]
impl ContextStore for RedisContextStore {
    async fn get(&self, key: &str) -> Result<Option<Snapshot>> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                self.drop_connection();
                Error::ContextStore(format!("redis GET {key}: {e}"))
            })?;

        match raw {
            Some(json) => match serde_json::from_str(&json) {
                Ok(snapshot) => Ok(Some(snapshot)),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "discarding unreadable snapshot");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, snapshot: &Snapshot) -> Result<()> {
        let json = serde_json::to_string(snapshot)?;
        let mut conn = self.connection().await?;
        redis::cmd("SET")
            .arg(key)
            .arg(json)
            .arg("PX")
            .arg(self.ttl_ms)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| {
                self.drop_connection();
                Error::ContextStore(format!("redis SET {key}: {e}"))
            })?;
        Ok(())
    }
}
