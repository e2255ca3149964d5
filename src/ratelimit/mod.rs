//! Rate limiting strategies and the limiter facade.

mod counter;
mod key;
mod limiter;
mod sliding_log;
mod strategy;

pub use counter::{CounterKind, CounterStrategy};
pub use key::{time_bucket, RateLimitKey};
pub use limiter::Limiter;
pub use sliding_log::SlidingWindowLog;
pub use strategy::{build_strategy, Strategy, StrategyKind, StrategyParams, DEFAULT_KEY_NAMESPACE};
