//! Failure recovery for calls to external collaborators.
//!
//! This module provides:
//! - Retry with exponential backoff and jitter
//! - A lazily-recovering circuit breaker
//! - Injectable clocks and sleepers for deterministic tests

mod circuit_breaker;
mod clock;
mod retry;

pub use circuit_breaker::{BreakerConfig, CircuitBreaker, CircuitState};
pub use clock::{Clock, ManualClock, SystemClock};
pub use retry::{
    retrying, BackoffPolicy, RetryExecutor, Sleeper, ThreadSleeper, JITTER_MAX, JITTER_MIN,
};
