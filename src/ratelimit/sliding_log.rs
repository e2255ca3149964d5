//! Sliding window log strategy.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::key::RateLimitKey;
use super::strategy::{Strategy, StrategyKind, StrategyParams, DEFAULT_KEY_NAMESPACE};
use crate::clock::Clock;

/// Exact sliding window over a log of event timestamps.
///
/// Every call prunes timestamps older than the window, records the new
/// event, and admits while the log holds at most `rate` entries. Denied
/// events are logged too, so a caller hammering a key stays limited.
///
/// The log lives in this process only. With several instances each one
/// enforces the limit on its own share of the traffic. Timestamps are whole
/// seconds, and one lock covers all keys.
pub struct SlidingWindowLog {
    clock: Arc<dyn Clock>,
    params: StrategyParams,
    key_prefix: String,
    logs: Mutex<HashMap<String, Vec<u64>>>,
}

impl SlidingWindowLog {
    /// Create an empty log with keys under the default namespace.
    pub fn new(clock: Arc<dyn Clock>, params: StrategyParams) -> Self {
        Self {
            clock,
            params,
            key_prefix: prefix_for(DEFAULT_KEY_NAMESPACE),
            logs: Mutex::new(HashMap::new()),
        }
    }

    /// Place keys under `namespace` instead of the default one.
    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.key_prefix = prefix_for(namespace);
        self
    }

    /// Number of keys with a log, including ones whose entries have all aged out.
    pub fn tracked_keys(&self) -> usize {
        self.logs.lock().len()
    }

    /// Timestamps currently recorded for `identity`, oldest first.
    pub fn entries(&self, identity: &str) -> Vec<u64> {
        let log_key = self.log_key(identity);
        self.logs.lock().get(&log_key).cloned().unwrap_or_default()
    }

    fn log_key(&self, identity: &str) -> String {
        RateLimitKey::plain(&self.key_prefix, identity).to_string()
    }
}

fn prefix_for(namespace: &str) -> String {
    format!("{}{}", namespace, StrategyKind::SlidingLog.key_segment())
}

impl Strategy for SlidingWindowLog {
    fn allow(&self, key: &str) -> bool {
        let log_key = self.log_key(key);
        let interval = self.params.interval_secs();

        let mut logs = self.logs.lock();
        let now = self.clock.now_secs();

        // Keep ts > now - interval, written without underflow
        let entries = logs.entry(log_key).or_default();
        entries.retain(|&ts| ts.saturating_add(interval) > now);
        entries.push(now);

        let count = entries.len() as u64;
        let allowed = count <= self.params.rate;

        debug!(
            strategy = self.name(),
            key = %key,
            count,
            threshold = self.params.rate,
            allowed,
            "Rate limit decision"
        );

        allowed
    }

    fn name(&self) -> &'static str {
        StrategyKind::SlidingLog.as_str()
    }
}
