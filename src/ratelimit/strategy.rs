//! Strategy trait and strategy selection.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::counter::{CounterKind, CounterStrategy};
use super::sliding_log::SlidingWindowLog;
use crate::clock::Clock;
use crate::config::LimiterSettings;
use crate::error::TurnstileError;
use crate::store::CounterStore;

/// Namespace used when none is configured.
pub const DEFAULT_KEY_NAMESPACE: &str = "rate:limiter:";

/// An admission control algorithm.
///
/// Implementations are shared across threads and make one decision per call.
/// A decision never fails: infrastructure errors resolve to admitting the request.
pub trait Strategy: Send + Sync {
    /// Decide whether one more event for `key` is admitted.
    fn allow(&self, key: &str) -> bool;

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}

/// The available strategies.
///
/// Deserializes through [`FromStr`](std::str::FromStr), so configuration files
/// and environment variables accept the same spellings as the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum StrategyKind {
    /// Counter with a plain key, compared against burst
    #[default]
    Token,
    /// Counter per time bucket, compared against rate
    Fixed,
    /// Process-local log of event timestamps
    SlidingLog,
    /// Counter with a plain key in its own namespace, compared against burst
    Leaky,
    /// Counter per time bucket kept alive for two intervals
    Moving,
}

impl StrategyKind {
    /// Every strategy, in a stable order.
    pub const ALL: [StrategyKind; 5] = [
        StrategyKind::Token,
        StrategyKind::Fixed,
        StrategyKind::SlidingLog,
        StrategyKind::Leaky,
        StrategyKind::Moving,
    ];

    /// Canonical configuration name.
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Token => "token",
            StrategyKind::Fixed => "fixed",
            StrategyKind::SlidingLog => "log",
            StrategyKind::Leaky => "leaky",
            StrategyKind::Moving => "moving",
        }
    }

    /// Key segment appended to the namespace so strategies never share counters.
    pub fn key_segment(&self) -> &'static str {
        match self {
            StrategyKind::Token => "token:",
            StrategyKind::Fixed => "fixed:",
            StrategyKind::SlidingLog => "log:",
            StrategyKind::Leaky => "leaky:",
            StrategyKind::Moving => "moving:",
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StrategyKind {
    type Err = TurnstileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "token" | "token_bucket" => Ok(StrategyKind::Token),
            "fixed" | "fixed_window" => Ok(StrategyKind::Fixed),
            "log" | "sliding_log" | "sliding_window_log" => Ok(StrategyKind::SlidingLog),
            "leaky" | "leaky_bucket" => Ok(StrategyKind::Leaky),
            "moving" | "moving_window" => Ok(StrategyKind::Moving),
            other => Err(TurnstileError::Config(format!("unknown strategy: {}", other))),
        }
    }
}

impl TryFrom<String> for StrategyKind {
    type Error = TurnstileError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<StrategyKind> for String {
    fn from(kind: StrategyKind) -> Self {
        kind.as_str().to_string()
    }
}

/// Thresholds and window shared by every strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategyParams {
    /// Events allowed per interval
    pub rate: u64,
    /// Window length, used at whole-second granularity
    pub interval: Duration,
    /// Secondary threshold for the token and leaky strategies
    pub burst: u64,
}

impl StrategyParams {
    /// Parameters with `burst` equal to `rate`.
    pub fn new(rate: u64, interval: Duration) -> Self {
        Self {
            rate,
            interval,
            burst: rate,
        }
    }

    /// Override the burst threshold.
    pub fn with_burst(mut self, burst: u64) -> Self {
        self.burst = burst;
        self
    }

    /// Window length in whole seconds, never less than one.
    pub fn interval_secs(&self) -> u64 {
        self.interval.as_secs().max(1)
    }
}

impl From<&LimiterSettings> for StrategyParams {
    fn from(settings: &LimiterSettings) -> Self {
        let params = Self::new(settings.rate, Duration::from_secs(settings.interval_secs));
        match settings.burst {
            Some(burst) => params.with_burst(burst),
            None => params,
        }
    }
}

/// Build the strategy `kind` over `store`, with keys under `namespace`.
///
/// The sliding log ignores `store`; its state lives in this process.
pub fn build_strategy(
    kind: StrategyKind,
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    params: StrategyParams,
    namespace: &str,
) -> Box<dyn Strategy> {
    let counter = |kind: CounterKind| -> Box<dyn Strategy> {
        Box::new(
            CounterStrategy::new(kind, store.clone(), clock.clone(), params)
                .with_namespace(namespace),
        )
    };

    match kind {
        StrategyKind::Token => counter(CounterKind::Token),
        StrategyKind::Fixed => counter(CounterKind::Fixed),
        StrategyKind::Leaky => counter(CounterKind::Leaky),
        StrategyKind::Moving => counter(CounterKind::Moving),
        StrategyKind::SlidingLog => {
            Box::new(SlidingWindowLog::new(clock.clone(), params).with_namespace(namespace))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;

    #[test]
    fn test_strategy_kind_deserialize_matches_from_str() {
        for name in ["Fixed_Window", "FIXED", "sliding_window_log", "Leaky_Bucket"] {
            let parsed: StrategyKind = serde_yaml::from_str(name).unwrap();
            assert_eq!(parsed, name.parse::<StrategyKind>().unwrap());
        }
        assert!(serde_yaml::from_str::<StrategyKind>("bogus").is_err());
        assert_eq!(serde_yaml::to_string(&StrategyKind::SlidingLog).unwrap().trim(), "log");
    }

    #[test]
    fn test_strategy_kind_from_str() {
        assert_eq!("token".parse::<StrategyKind>().unwrap(), StrategyKind::Token);
        assert_eq!("Fixed_Window".parse::<StrategyKind>().unwrap(), StrategyKind::Fixed);
        assert_eq!("sliding_log".parse::<StrategyKind>().unwrap(), StrategyKind::SlidingLog);
        assert_eq!("LEAKY".parse::<StrategyKind>().unwrap(), StrategyKind::Leaky);
        assert_eq!("moving_window".parse::<StrategyKind>().unwrap(), StrategyKind::Moving);
        assert!("gcra".parse::<StrategyKind>().is_err());
    }

    #[test]
    fn test_strategy_kind_display_round_trips() {
        for kind in StrategyKind::ALL {
            assert_eq!(kind.to_string().parse::<StrategyKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_key_segments_are_distinct() {
        let mut segments: Vec<_> = StrategyKind::ALL.iter().map(|k| k.key_segment()).collect();
        segments.sort();
        segments.dedup();
        assert_eq!(segments.len(), StrategyKind::ALL.len());
    }

    #[test]
    fn test_params_from_settings() {
        let settings = LimiterSettings {
            rate: 10,
            interval_secs: 60,
            burst: None,
            ..Default::default()
        };
        let params = StrategyParams::from(&settings);
        assert_eq!(params.rate, 10);
        assert_eq!(params.burst, 10);
        assert_eq!(params.interval, Duration::from_secs(60));

        let settings = LimiterSettings {
            burst: Some(3),
            ..settings
        };
        assert_eq!(StrategyParams::from(&settings).burst, 3);
    }

    #[test]
    fn test_interval_secs_floor() {
        let params = StrategyParams::new(1, Duration::from_millis(500));
        assert_eq!(params.interval_secs(), 1);
    }

    #[test]
    fn test_build_strategy_names() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::at_secs(0));
        let store: Arc<dyn CounterStore> = Arc::new(MemoryStore::new(clock.clone()));
        let params = StrategyParams::new(2, Duration::from_secs(1));

        for kind in StrategyKind::ALL {
            let strategy = build_strategy(
                kind,
                store.clone(),
                clock.clone(),
                params,
                DEFAULT_KEY_NAMESPACE,
            );
            assert_eq!(strategy.name(), kind.as_str());
        }
    }
}
