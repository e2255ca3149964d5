//! Counter store contract and its implementations.
//!
//! Every counter-based strategy delegates its state to a [`CounterStore`].
//! The store must make `incr` atomic for all instances that share it; the
//! strategies add no locking of their own on top.

mod memory;
#[cfg(feature = "redis")]
mod redis;

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisStore;

use crate::clock::Clock;
use crate::config::{StoreBackend, StoreSettings};
use crate::error::{Result, StoreError};

/// An atomic counter store with per-key expiration.
pub trait CounterStore: Send + Sync {
    /// Increment the counter for `key`, creating it at zero first if absent,
    /// and return the post-increment value.
    fn incr(&self, key: &str) -> std::result::Result<i64, StoreError>;

    /// Expire `key` after `ttl`, measured from now.
    ///
    /// Once the key expires its count is gone and the next `incr` starts over.
    fn expire(&self, key: &str, ttl: Duration) -> std::result::Result<(), StoreError>;

    /// Remaining time to live for `key`.
    ///
    /// Returns `None` if the key does not exist or carries no expiration.
    /// Only used for diagnostics.
    fn ttl(&self, key: &str) -> std::result::Result<Option<Duration>, StoreError>;
}

impl<S: CounterStore + ?Sized> CounterStore for Arc<S> {
    fn incr(&self, key: &str) -> std::result::Result<i64, StoreError> {
        (**self).incr(key)
    }

    fn expire(&self, key: &str, ttl: Duration) -> std::result::Result<(), StoreError> {
        (**self).expire(key, ttl)
    }

    fn ttl(&self, key: &str) -> std::result::Result<Option<Duration>, StoreError> {
        (**self).ttl(key)
    }
}

/// Build the counter store selected by `settings`.
pub fn connect(settings: &StoreSettings, clock: Arc<dyn Clock>) -> Result<Arc<dyn CounterStore>> {
    match settings.backend {
        StoreBackend::Memory => {
            info!("Using in-process memory counter store");
            Ok(Arc::new(MemoryStore::new(clock)))
        }
        #[cfg(feature = "redis")]
        StoreBackend::Redis => {
            let store = RedisStore::open(&settings.redis_url)?;
            info!(store = ?store, "Using Redis counter store");
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "redis"))]
        StoreBackend::Redis => Err(crate::error::TurnstileError::Config(
            "the redis store backend requires the `redis` feature".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn test_connect_memory_backend() {
        let settings = StoreSettings::default();
        let store = connect(&settings, Arc::new(ManualClock::at_secs(0))).unwrap();

        assert_eq!(store.incr("a").unwrap(), 1);
        assert_eq!(store.incr("a").unwrap(), 2);
    }

    #[cfg(not(feature = "redis"))]
    #[test]
    fn test_connect_redis_without_feature() {
        let settings = StoreSettings {
            backend: StoreBackend::Redis,
            ..Default::default()
        };
        let result = connect(&settings, Arc::new(ManualClock::at_secs(0)));
        assert!(matches!(result, Err(crate::error::TurnstileError::Config(_))));
    }

    #[test]
    fn test_arc_store_delegates() {
        let clock = Arc::new(ManualClock::at_secs(10));
        let store = Arc::new(MemoryStore::new(clock));

        assert_eq!(CounterStore::incr(&store, "k").unwrap(), 1);
        CounterStore::expire(&store, "k", Duration::from_secs(3)).unwrap();
        assert_eq!(
            CounterStore::ttl(&store, "k").unwrap(),
            Some(Duration::from_secs(3))
        );
    }
}
