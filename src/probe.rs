//! Probe driver: fires a paced series of decisions against a limiter.
//!
//! This is what the binary uses to exercise a configured limiter from the
//! command line. A rejected decision is the equivalent of an HTTP 429.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::ratelimit::Limiter;

/// Outcome of a single admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    /// Over the limit; a request handler would answer 429
    Rejected,
}

impl Decision {
    pub fn from_allowed(allowed: bool) -> Self {
        if allowed {
            Decision::Allowed
        } else {
            Decision::Rejected
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }

    /// HTTP status a request handler would answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Decision::Allowed => 200,
            Decision::Rejected => 429,
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decision::Allowed => f.write_str("allowed"),
            Decision::Rejected => f.write_str("rejected"),
        }
    }
}

/// Tally of a probe run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeSummary {
    pub allowed: u64,
    pub denied: u64,
}

impl ProbeSummary {
    pub fn record(&mut self, decision: Decision) {
        match decision {
            Decision::Allowed => self.allowed += 1,
            Decision::Rejected => self.denied += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.allowed + self.denied
    }
}

/// Ask `limiter` about `key` up to `requests` times, `spacing` apart.
///
/// Stops early once `shutdown` resolves. Each decision runs on the blocking
/// pool since a store round trip may block the calling thread.
pub async fn run<F>(
    limiter: Arc<Limiter>,
    key: &str,
    requests: u64,
    spacing: Duration,
    shutdown: F,
) -> ProbeSummary
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    // interval() panics on a zero period
    let mut ticker = tokio::time::interval(spacing.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut summary = ProbeSummary::default();

    for request in 1..=requests {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                info!(sent = summary.total(), "Probe interrupted");
                break;
            }
            _ = ticker.tick() => {}
        }

        let task_limiter = limiter.clone();
        let task_key = key.to_string();
        let decision = match tokio::task::spawn_blocking(move || task_limiter.allow(&task_key)).await
        {
            Ok(allowed) => Decision::from_allowed(allowed),
            Err(e) => {
                warn!(error = %e, "Decision task failed, failing open");
                Decision::Allowed
            }
        };

        summary.record(decision);
        info!(
            request,
            key = %key,
            decision = %decision,
            status = decision.status_code(),
            "Probe decision"
        );
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::LimiterSettings;
    use crate::ratelimit::StrategyKind;
    use crate::store::MemoryStore;

    fn limiter(kind: StrategyKind, rate: u64) -> Arc<Limiter> {
        let clock = Arc::new(ManualClock::at_secs(1_000));
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let settings = LimiterSettings {
            strategy: kind,
            rate,
            interval_secs: 60,
            burst: None,
            ..Default::default()
        };
        Arc::new(Limiter::from_settings(&settings, store, clock).unwrap())
    }

    #[test]
    fn test_decision() {
        assert_eq!(Decision::from_allowed(true), Decision::Allowed);
        assert_eq!(Decision::from_allowed(false).status_code(), 429);
        assert!(Decision::Allowed.is_allowed());
        assert_eq!(Decision::Rejected.to_string(), "rejected");
    }

    #[test]
    fn test_summary_record() {
        let mut summary = ProbeSummary::default();
        summary.record(Decision::Allowed);
        summary.record(Decision::Rejected);
        summary.record(Decision::Rejected);
        assert_eq!(summary, ProbeSummary { allowed: 1, denied: 2 });
        assert_eq!(summary.total(), 3);
    }

    #[tokio::test]
    async fn test_probe_counts_decisions() {
        let limiter = limiter(StrategyKind::Token, 2);

        let summary = run(
            limiter,
            "client",
            5,
            Duration::from_millis(1),
            std::future::pending(),
        )
        .await;

        assert_eq!(summary, ProbeSummary { allowed: 2, denied: 3 });
    }

    #[tokio::test]
    async fn test_probe_zero_spacing() {
        let limiter = limiter(StrategyKind::SlidingLog, 3);

        let summary = run(limiter, "client", 4, Duration::ZERO, std::future::pending()).await;

        assert_eq!(summary.allowed, 3);
        assert_eq!(summary.denied, 1);
    }

    #[tokio::test]
    async fn test_probe_stops_on_shutdown() {
        let limiter = limiter(StrategyKind::Fixed, 10);

        let summary = run(
            limiter,
            "client",
            100,
            Duration::from_millis(1),
            std::future::ready(()),
        )
        .await;

        assert_eq!(summary.total(), 0);
    }
}
