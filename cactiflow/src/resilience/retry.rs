//! Retry with exponential backoff and jitter.
//!
//! A [`RetryExecutor`] wraps a fallible operation and reattempts it while
//! its failures are classified as transient. The blocking form sleeps on the
//! calling thread, so pipeline stages using it belong on dedicated workers,
//! never on a thread that has to stay responsive.

use crate::errors::{RetryError, RetryExhausted};
use crate::metrics::ResilienceMetrics;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Lower bound of the jitter factor.
pub const JITTER_MIN: f64 = 0.75;
/// Upper bound of the jitter factor.
pub const JITTER_MAX: f64 = 1.25;

/// Backoff parameters for a retry sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Maximum attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    #[serde(with = "duration_secs")]
    pub base_delay: Duration,
    /// Cap applied before jitter.
    #[serde(with = "duration_secs")]
    pub max_delay: Duration,
    /// Growth factor between consecutive delays.
    pub exponential_base: f64,
    /// Multiply each delay by a random factor in [0.75, 1.25].
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

impl BackoffPolicy {
    /// Creates a policy with the default parameters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum attempts (at least one).
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the exponential base.
    #[must_use]
    pub fn with_exponential_base(mut self, base: f64) -> Self {
        self.exponential_base = base;
        self
    }

    /// Enables or disables jitter.
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Un-jittered delay after the given failed attempt (1-based):
    /// `min(base_delay * exponential_base^(attempt-1), max_delay)`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.exponential_base.powi(exponent);
        let max = self.max_delay.as_secs_f64();

        if !secs.is_finite() || secs >= max {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs.max(0.0))
        }
    }

    /// Delay after the given failed attempt, with jitter applied when enabled.
    #[must_use]
    pub fn compute_delay(&self, attempt: u32) -> Duration {
        let delay = self.delay_for(attempt);
        if self.jitter {
            let factor = rand::thread_rng().gen_range(JITTER_MIN..=JITTER_MAX);
            Duration::try_from_secs_f64(delay.as_secs_f64() * factor).unwrap_or(Duration::MAX)
        } else {
            delay
        }
    }
}

/// Serializes durations as fractional seconds.
pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

/// Blocks the calling thread between attempts.
#[cfg_attr(test, mockall::automock)]
pub trait Sleeper: Send + Sync {
    /// Sleeps for the given duration.
    fn sleep(&self, duration: Duration);
}

/// Sleeps with [`std::thread::sleep`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

type RetryPredicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;
type RetryHook<E> = Arc<dyn Fn(u32, &E, Duration) + Send + Sync>;

/// Runs operations under a [`BackoffPolicy`].
///
/// Failures matching the retry predicate (every failure, by default) are
/// reattempted; anything else is returned at once as
/// [`RetryError::Terminal`].
pub struct RetryExecutor<E> {
    policy: BackoffPolicy,
    retryable: RetryPredicate<E>,
    on_retry: Option<RetryHook<E>>,
    sleeper: Arc<dyn Sleeper>,
    metrics: Option<ResilienceMetrics>,
}

impl<E> Clone for RetryExecutor<E> {
    fn clone(&self) -> Self {
        Self {
            policy: self.policy.clone(),
            retryable: Arc::clone(&self.retryable),
            on_retry: self.on_retry.clone(),
            sleeper: Arc::clone(&self.sleeper),
            metrics: self.metrics.clone(),
        }
    }
}

impl<E> fmt::Debug for RetryExecutor<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("policy", &self.policy)
            .field("has_on_retry", &self.on_retry.is_some())
            .field("has_metrics", &self.metrics.is_some())
            .finish_non_exhaustive()
    }
}

impl<E: fmt::Display> RetryExecutor<E> {
    /// Creates an executor that retries every failure.
    #[must_use]
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            retryable: Arc::new(|_| true),
            on_retry: None,
            sleeper: Arc::new(ThreadSleeper),
            metrics: None,
        }
    }

    /// Restricts retries to failures matching the predicate.
    #[must_use]
    pub fn retry_if<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.retryable = Arc::new(predicate);
        self
    }

    /// Sets a hook called as `(attempt, error, delay)` before each backoff.
    ///
    /// A panicking hook is logged and otherwise ignored.
    #[must_use]
    pub fn on_retry<H>(mut self, hook: H) -> Self
    where
        H: Fn(u32, &E, Duration) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(hook));
        self
    }

    /// Replaces the blocking sleeper.
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Records attempts and backoff delays.
    #[must_use]
    pub fn with_metrics(mut self, metrics: ResilienceMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Returns the policy.
    #[must_use]
    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Runs `operation`, blocking the calling thread during backoff.
    pub fn execute<T, F>(&self, mut operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Result<T, E>,
    {
        let mut attempt = 1;
        loop {
            let err = match operation() {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            let delay = self.after_failure(attempt, err)?;
            self.sleeper.sleep(delay);
            attempt += 1;
        }
    }

    /// Runs `operation`, awaiting a tokio timer during backoff.
    pub async fn execute_async<T, F, Fut>(&self, mut operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            let delay = self.after_failure(attempt, err)?;
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Classifies a failed attempt, returning the delay before the next one.
    fn after_failure(&self, attempt: u32, err: E) -> Result<Duration, RetryError<E>> {
        if !(self.retryable)(&err) {
            return Err(RetryError::Terminal(err));
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_attempt_failure();
        }

        if attempt >= self.policy.max_attempts {
            error!(
                attempts = attempt,
                error = %err,
                "Retry exhausted"
            );
            if let Some(metrics) = &self.metrics {
                metrics.record_exhausted();
            }
            return Err(RetryError::Exhausted(RetryExhausted::new(err, attempt)));
        }

        let delay = self.policy.compute_delay(attempt);
        warn!(
            attempt,
            max_attempts = self.policy.max_attempts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %err,
            "Attempt failed, retrying"
        );

        if let Some(hook) = &self.on_retry {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| hook(attempt, &err, delay))) {
                debug!("on_retry hook panicked: {:?}", panic);
            }
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_backoff(delay);
        }

        Ok(delay)
    }
}

/// Wraps `operation` so every call runs through `executor`.
pub fn retrying<T, E, F>(
    executor: RetryExecutor<E>,
    mut operation: F,
) -> impl FnMut() -> Result<T, RetryError<E>>
where
    E: fmt::Display,
    F: FnMut() -> Result<T, E>,
{
    move || executor.execute(&mut operation)
}
