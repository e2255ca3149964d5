//! Redis-backed counter store shared by every instance pointing at the same server.

use std::time::Duration;

use parking_lot::Mutex;
use redis::{Client, Commands, Connection};
use tracing::{debug, info, warn};

use super::CounterStore;
use crate::error::StoreError;

/// Timeout for establishing a connection to Redis.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// A counter store using Redis `INCR`, `EXPIRE` and `TTL`.
///
/// Redis executes each command atomically, which gives the cross-instance
/// atomicity the strategies rely on. The connection is opened lazily and
/// dropped after any failed command so the next call reconnects.
pub struct RedisStore {
    client: Client,
    conn: Mutex<Option<Connection>>,
}

impl RedisStore {
    /// Create a store for the server at `url`, e.g. `redis://localhost:6379`.
    ///
    /// Only the URL is validated here; no connection is made until the first command.
    pub fn open(url: &str) -> Result<Self, StoreError> {
        let client = Client::open(url)?;
        info!(addr = %client.get_connection_info().addr, "Configured Redis counter store");
        Ok(Self {
            client,
            conn: Mutex::new(None),
        })
    }

    fn with_connection<T>(
        &self,
        op: impl FnOnce(&mut Connection) -> redis::RedisResult<T>,
    ) -> Result<T, StoreError> {
        let mut guard = self.conn.lock();

        if guard.is_none() {
            debug!("Opening Redis connection");
            *guard = Some(self.client.get_connection_with_timeout(CONNECT_TIMEOUT)?);
        }

        let conn = guard
            .as_mut()
            .ok_or_else(|| StoreError::Unavailable("no Redis connection".to_string()))?;

        let result = op(conn);
        if let Err(ref e) = result {
            warn!(error = %e, "Redis command failed, dropping connection");
            *guard = None;
        }
        result.map_err(StoreError::from)
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("addr", &self.client.get_connection_info().addr)
            .finish()
    }
}

impl CounterStore for RedisStore {
    fn incr(&self, key: &str) -> Result<i64, StoreError> {
        self.with_connection(|conn| conn.incr(key, 1))
    }

    fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        // EXPIRE takes whole seconds; never round a short window down to zero.
        let seconds = ttl.as_secs().max(1) as i64;
        self.with_connection(|conn| conn.expire(key, seconds))
    }

    fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let remaining: i64 = self.with_connection(|conn| conn.ttl(key))?;
        // -2 means no such key, -1 means no expiration
        Ok(u64::try_from(remaining).ok().map(Duration::from_secs))
    }
}
