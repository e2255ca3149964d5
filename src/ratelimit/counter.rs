//! Counter-based strategies over the shared store.
//!
//! Token, fixed window, leaky and moving window all follow one skeleton:
//! derive a store key, increment it, set an expiration when the count is 1,
//! and admit while the count stays within a threshold. They differ only in
//! key derivation, expiration length and which threshold applies.
//!
//! Neither the token nor the leaky variant refills or drains continuously.
//! Both are windowed counters in their own key namespace.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace, warn};

use super::key::{time_bucket, RateLimitKey};
use super::strategy::{Strategy, StrategyKind, StrategyParams, DEFAULT_KEY_NAMESPACE};
use crate::clock::Clock;
use crate::store::CounterStore;

/// The four counter-based algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterKind {
    /// Plain key, expires after one interval, limited by burst
    Token,
    /// Bucketed key, expires after one interval, limited by rate
    Fixed,
    /// Plain key, expires after one interval, limited by burst
    Leaky,
    /// Bucketed key, expires after two intervals, limited by rate
    Moving,
}

impl CounterKind {
    /// Whether the store key carries a time bucket index.
    pub fn is_bucketed(&self) -> bool {
        matches!(self, CounterKind::Fixed | CounterKind::Moving)
    }

    /// Expiration set on a fresh counter, as a multiple of the interval.
    ///
    /// The moving window keeps its bucket readable for a second interval.
    pub fn ttl_multiplier(&self) -> u32 {
        match self {
            CounterKind::Moving => 2,
            _ => 1,
        }
    }

    /// Whether the admission threshold is `burst` rather than `rate`.
    pub fn uses_burst(&self) -> bool {
        matches!(self, CounterKind::Token | CounterKind::Leaky)
    }

    /// The matching strategy selector.
    pub fn strategy_kind(&self) -> StrategyKind {
        match self {
            CounterKind::Token => StrategyKind::Token,
            CounterKind::Fixed => StrategyKind::Fixed,
            CounterKind::Leaky => StrategyKind::Leaky,
            CounterKind::Moving => StrategyKind::Moving,
        }
    }
}

/// A counter-based strategy backed by a [`CounterStore`].
pub struct CounterStrategy {
    kind: CounterKind,
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    params: StrategyParams,
    key_prefix: String,
}

impl CounterStrategy {
    /// Create a strategy of `kind` with keys under the default namespace.
    pub fn new(
        kind: CounterKind,
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
        params: StrategyParams,
    ) -> Self {
        Self {
            kind,
            store,
            clock,
            params,
            key_prefix: prefix_for(DEFAULT_KEY_NAMESPACE, kind),
        }
    }

    /// Token-style counter: plain key, limited by `burst`.
    pub fn token_bucket(
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
        params: StrategyParams,
    ) -> Self {
        Self::new(CounterKind::Token, store, clock, params)
    }

    /// Fixed window: one counter per time bucket, limited by `rate`.
    pub fn fixed_window(
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
        params: StrategyParams,
    ) -> Self {
        Self::new(CounterKind::Fixed, store, clock, params)
    }

    /// Leaky-style counter: plain key, limited by `burst`.
    pub fn leaky_bucket(
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
        params: StrategyParams,
    ) -> Self {
        Self::new(CounterKind::Leaky, store, clock, params)
    }

    /// Moving window: one counter per time bucket that outlives its bucket.
    pub fn moving_window(
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
        params: StrategyParams,
    ) -> Self {
        Self::new(CounterKind::Moving, store, clock, params)
    }

    /// Place keys under `namespace` instead of the default one.
    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.key_prefix = prefix_for(namespace, self.kind);
        self
    }

    /// The algorithm this strategy runs.
    pub fn kind(&self) -> CounterKind {
        self.kind
    }

    /// Highest count that is still admitted.
    pub fn threshold(&self) -> u64 {
        if self.kind.uses_burst() {
            self.params.burst
        } else {
            self.params.rate
        }
    }

    /// Expiration applied to a fresh counter.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.params.interval_secs()) * self.kind.ttl_multiplier()
    }

    /// The store key `identity` maps to right now.
    pub fn store_key(&self, identity: &str) -> String {
        let key = if self.kind.is_bucketed() {
            let bucket = time_bucket(self.clock.now_secs(), self.params.interval_secs());
            RateLimitKey::bucketed(&self.key_prefix, identity, bucket)
        } else {
            RateLimitKey::plain(&self.key_prefix, identity)
        };
        key.to_string()
    }
}

fn prefix_for(namespace: &str, kind: CounterKind) -> String {
    format!("{}{}", namespace, kind.strategy_kind().key_segment())
}

impl Strategy for CounterStrategy {
    fn allow(&self, key: &str) -> bool {
        let store_key = self.store_key(key);

        let count = match self.store.incr(&store_key) {
            Ok(count) => count,
            Err(e) => {
                warn!(
                    strategy = self.name(),
                    key = %store_key,
                    error = %e,
                    "Counter store increment failed, failing open"
                );
                return true;
            }
        };

        if count == 1 {
            let ttl = self.ttl();
            if let Err(e) = self.store.expire(&store_key, ttl) {
                warn!(
                    strategy = self.name(),
                    key = %store_key,
                    error = %e,
                    "Failed to set counter expiration"
                );
            }

            match self.store.ttl(&store_key) {
                Ok(remaining) => debug!(
                    strategy = self.name(),
                    key = %store_key,
                    ttl = ?remaining,
                    "New counter window"
                ),
                Err(e) => trace!(key = %store_key, error = %e, "TTL lookup failed"),
            }
        }

        let threshold = self.threshold();
        let allowed = count <= i64::try_from(threshold).unwrap_or(i64::MAX);

        debug!(
            strategy = self.name(),
            key = %store_key,
            count,
            threshold,
            allowed,
            "Rate limit decision"
        );

        allowed
    }

    fn name(&self) -> &'static str {
        self.kind.strategy_kind().as_str()
    }
}
