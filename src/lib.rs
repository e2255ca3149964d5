//! Turnstile - admission control over a shared counter store
//!
//! This crate decides, per key, whether an incoming action is admitted. It
//! offers five interchangeable rate limiting strategies. Four of them keep
//! their counters in a [`store::CounterStore`] that several service
//! instances can share. The fifth, the sliding window log, keeps its state in
//! process memory. If the store fails, requests are admitted.

pub mod clock;
pub mod config;
pub mod error;
pub mod probe;
pub mod ratelimit;
pub mod store;

pub use ratelimit::{Limiter, Strategy, StrategyKind};
