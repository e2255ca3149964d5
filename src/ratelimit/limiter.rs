//! The limiter facade.

use std::sync::Arc;
use tracing::info;

use super::strategy::{build_strategy, Strategy, StrategyParams};
use crate::clock::Clock;
use crate::config::LimiterSettings;
use crate::error::Result;
use crate::store::CounterStore;

/// Admission control entrypoint.
///
/// Holds exactly one strategy, fixed at construction. Build one per process
/// and share it behind an `Arc`; there is no global instance.
pub struct Limiter {
    strategy: Box<dyn Strategy>,
}

impl Limiter {
    /// Create a limiter running `strategy`.
    pub fn new(strategy: Box<dyn Strategy>) -> Self {
        Self { strategy }
    }

    /// Create a limiter from configuration, over an already-built store.
    pub fn from_settings(
        settings: &LimiterSettings,
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        settings.validate()?;

        let params = StrategyParams::from(settings);
        let strategy = build_strategy(
            settings.strategy,
            store,
            clock,
            params,
            &settings.key_namespace,
        );

        info!(
            strategy = %settings.strategy,
            rate = params.rate,
            interval_secs = params.interval_secs(),
            burst = params.burst,
            "Rate limiter initialized"
        );

        Ok(Self::new(strategy))
    }

    /// Decide whether one more event for `key` is admitted.
    pub fn allow(&self, key: &str) -> bool {
        self.strategy.allow(key)
    }

    /// Name of the active strategy.
    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }
}

impl std::fmt::Debug for Limiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Limiter")
            .field("strategy", &self.strategy.name())
            .finish()
    }
}
