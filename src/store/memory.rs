//! In-process counter store.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::trace;

use super::CounterStore;
use crate::clock::Clock;
use crate::error::StoreError;

/// How often increments sweep out expired counters.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(5);
/// Sweep after this many increments even if the interval has not elapsed.
const MAX_OPERATIONS_BEFORE_CLEANUP: usize = 100_000;

/// A single counter and its expiration horizon.
#[derive(Debug, Clone, Copy)]
struct Counter {
    count: i64,
    /// Absolute expiry as time since the epoch
    expires_at: Option<Duration>,
}

impl Counter {
    fn is_expired(&self, now: Duration) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

/// A counter store kept in local memory.
///
/// Increments are atomic per key: the map is sharded and each entry is
/// updated under its shard's write lock. Expired counters are treated as
/// absent. Increments periodically sweep them out of the map, so bucketed
/// keys that are never touched again do not pile up; a sweep can also be
/// forced with [`MemoryStore::purge_expired`].
///
/// State is not shared between processes, so this store only gives exact
/// limits for a single instance.
pub struct MemoryStore {
    counters: DashMap<String, Counter>,
    clock: Arc<dyn Clock>,
    /// Next sweep deadline in milliseconds since the epoch
    next_cleanup_ms: AtomicU64,
    operations_since_cleanup: AtomicUsize,
}

impl MemoryStore {
    /// Create an empty store reading time from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let next_cleanup = clock.now() + CLEANUP_INTERVAL;
        Self {
            counters: DashMap::new(),
            clock,
            next_cleanup_ms: AtomicU64::new(next_cleanup.as_millis() as u64),
            operations_since_cleanup: AtomicUsize::new(0),
        }
    }

    /// Number of counters held, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    /// Whether the store holds no counters at all.
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Drop every expired counter and return how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(self.clock.now())
    }

    fn purge_expired_at(&self, now: Duration) -> usize {
        let before = self.counters.len();
        self.counters.retain(|_, counter| !counter.is_expired(now));
        let removed = before.saturating_sub(self.counters.len());
        if removed > 0 {
            trace!(removed, "Purged expired counters");
        }
        removed
    }

    /// Sweep expired counters once the deadline passes or enough increments
    /// have gone by. Must not be called while holding a map entry.
    fn maybe_purge(&self, now: Duration) {
        let operations = self.operations_since_cleanup.fetch_add(1, Ordering::Relaxed) + 1;
        let now_ms = now.as_millis() as u64;
        let deadline = self.next_cleanup_ms.load(Ordering::Acquire);

        if now_ms < deadline && operations < MAX_OPERATIONS_BEFORE_CLEANUP {
            return;
        }

        // Only the caller that moves the deadline runs the sweep
        let next = now_ms + CLEANUP_INTERVAL.as_millis() as u64;
        if self
            .next_cleanup_ms
            .compare_exchange(deadline, next, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        self.operations_since_cleanup.store(0, Ordering::Relaxed);
        self.purge_expired_at(now);
    }

    /// Remove all counters.
    pub fn clear(&self) {
        self.counters.clear();
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("counters", &self.counters.len())
            .finish()
    }
}

impl CounterStore for MemoryStore {
    fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let now = self.clock.now();
        self.maybe_purge(now);

        let mut counter = self.counters.entry(key.to_string()).or_insert(Counter {
            count: 0,
            expires_at: None,
        });

        if counter.is_expired(now) {
            counter.count = 0;
            counter.expires_at = None;
        }

        counter.count += 1;
        Ok(counter.count)
    }

    fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let now = self.clock.now();
        if let Some(mut counter) = self.counters.get_mut(key) {
            if !counter.is_expired(now) {
                counter.expires_at = Some(now + ttl);
            }
        }
        Ok(())
    }

    fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let now = self.clock.now();
        Ok(self.counters.get(key).and_then(|counter| match counter.expires_at {
            Some(at) if at > now => Some(at - now),
            _ => None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn store_at(secs: u64) -> (Arc<ManualClock>, MemoryStore) {
        let clock = Arc::new(ManualClock::at_secs(secs));
        let store = MemoryStore::new(clock.clone());
        (clock, store)
    }

    #[test]
    fn test_incr_starts_at_one() {
        let (_, store) = store_at(0);
        assert_eq!(store.incr("a").unwrap(), 1);
        assert_eq!(store.incr("a").unwrap(), 2);
        assert_eq!(store.incr("b").unwrap(), 1);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_expired_counter_restarts() {
        let (clock, store) = store_at(100);

        store.incr("a").unwrap();
        store.incr("a").unwrap();
        store.expire("a", Duration::from_secs(1)).unwrap();

        clock.advance(Duration::from_millis(999));
        assert_eq!(store.incr("a").unwrap(), 3);

        clock.advance(Duration::from_millis(1));
        assert_eq!(store.incr("a").unwrap(), 1);
        // The restarted counter carries no expiration until one is set again
        assert_eq!(store.ttl("a").unwrap(), None);
    }

    #[test]
    fn test_ttl_reports_remaining() {
        let (clock, store) = store_at(0);

        assert_eq!(store.ttl("missing").unwrap(), None);

        store.incr("a").unwrap();
        assert_eq!(store.ttl("a").unwrap(), None);

        store.expire("a", Duration::from_secs(10)).unwrap();
        clock.advance(Duration::from_secs(4));
        assert_eq!(store.ttl("a").unwrap(), Some(Duration::from_secs(6)));

        clock.advance(Duration::from_secs(6));
        assert_eq!(store.ttl("a").unwrap(), None);
    }

    #[test]
    fn test_expire_missing_key_is_noop() {
        let (_, store) = store_at(0);
        store.expire("ghost", Duration::from_secs(5)).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_purge_expired() {
        let (clock, store) = store_at(0);

        store.incr("short").unwrap();
        store.expire("short", Duration::from_secs(1)).unwrap();
        store.incr("long").unwrap();
        store.expire("long", Duration::from_secs(60)).unwrap();
        store.incr("forever").unwrap();

        clock.advance(Duration::from_secs(2));
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 2);

        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn test_increments_sweep_stale_buckets() {
        let (clock, store) = store_at(1_000);

        // One short-lived key per second, never touched again
        for second in 0..10_000u64 {
            let key = format!("fixed:client:{}", 1_000 + second);
            store.incr(&key).unwrap();
            store.expire(&key, Duration::from_secs(1)).unwrap();
            clock.advance(Duration::from_secs(1));
        }

        assert!(store.len() <= 10, "store kept {} counters", store.len());
    }

    #[test]
    fn test_no_sweep_before_deadline() {
        let (clock, store) = store_at(0);

        store.incr("old").unwrap();
        store.expire("old", Duration::from_secs(1)).unwrap();
        clock.advance(Duration::from_secs(2));

        // Expired, but the first sweep is not due yet
        store.incr("new").unwrap();
        assert_eq!(store.len(), 2);

        clock.advance(CLEANUP_INTERVAL);
        store.incr("new").unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.incr("new").unwrap(), 3);
    }

    #[test]
    fn test_concurrent_increments_are_atomic() {
        let (_, store) = store_at(0);
        let store = Arc::new(store);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        store.incr("shared").unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.incr("shared").unwrap(), 2001);
    }
}
