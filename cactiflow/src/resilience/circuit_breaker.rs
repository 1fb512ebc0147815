//! Circuit breaker for external dependencies.
//!
//! One breaker is shared by every call site of a dependency. After
//! `failure_threshold` failures it opens and rejects calls without making
//! them. Once `recovery_timeout` has passed since it opened, the next read of
//! its state moves it to half-open and calls are let through again; there is
//! no background timer.

use super::clock::{Clock, SystemClock};
use super::retry::duration_secs;
use crate::errors::{BreakerError, CircuitBreakerUnavailable};
use crate::metrics::ResilienceMetrics;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Circuit breaker state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls flow through.
    Closed,
    /// Calls fail fast.
    Open,
    /// Recovery window elapsed; calls are let through as probes.
    HalfOpen,
}

impl CircuitState {
    /// Gauge value for this state (0=closed, 1=open, 2=half-open).
    #[must_use]
    pub const fn as_metric_value(self) -> f64 {
        match self {
            Self::Closed => 0.0,
            Self::Open => 1.0,
            Self::HalfOpen => 2.0,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        })
    }
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Failures that open the circuit.
    pub failure_threshold: u32,
    /// Time spent open before probe calls are allowed.
    #[serde(with = "duration_secs")]
    pub recovery_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

impl BreakerConfig {
    /// Creates a config with the default parameters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the failure threshold (at least one).
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Sets the recovery timeout.
    #[must_use]
    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<Instant>,
}

impl BreakerState {
    const fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            opened_at: None,
        }
    }
}

/// Fail-fast guard around one external dependency.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<BreakerState>,
    metrics: Option<ResilienceMetrics>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &inner.state)
            .field("failure_count", &inner.failure_count)
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker {
    /// Creates a closed breaker for the named dependency.
    #[must_use]
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            clock: Arc::new(SystemClock),
            inner: Mutex::new(BreakerState::new()),
            metrics: None,
        }
    }

    /// Replaces the time source.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Records opens, rejections and state changes.
    #[must_use]
    pub fn with_metrics(self, metrics: ResilienceMetrics) -> Self {
        metrics.set_breaker_state(CircuitState::Closed);
        Self {
            metrics: Some(metrics),
            ..self
        }
    }

    /// Returns the dependency name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Returns the current state, moving OPEN to HALF_OPEN if the recovery
    /// window has elapsed.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner, self.clock.now());
        inner.state
    }

    /// Returns the number of failures since the last success or reset.
    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    /// Returns when the circuit last opened, if it is not closed.
    pub fn opened_at(&self) -> Option<Instant> {
        self.inner.lock().opened_at
    }

    /// Time left before an open circuit allows a probe, if it is open.
    pub fn time_until_half_open(&self) -> Option<Duration> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        self.refresh(&mut inner, now);
        match (inner.state, inner.opened_at) {
            (CircuitState::Open, Some(opened_at)) => Some(
                self.config
                    .recovery_timeout
                    .saturating_sub(now.saturating_duration_since(opened_at)),
            ),
            _ => None,
        }
    }

    /// Forces the breaker back to CLOSED with no recorded failures.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        *inner = BreakerState::new();
        info!(dependency = %self.name, "Circuit breaker reset");
        self.publish_state(CircuitState::Closed);
    }

    /// Calls `operation`, counting every error as a dependency failure.
    pub fn call<T, E, F>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        self.call_filtered(operation, |_| true)
    }

    /// Calls `operation`, counting only errors matching `is_failure`.
    ///
    /// Other errors are returned without touching the breaker.
    pub fn call_filtered<T, E, F, P>(&self, operation: F, is_failure: P) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Result<T, E>,
        P: Fn(&E) -> bool,
    {
        self.admit().map_err(BreakerError::Unavailable)?;
        match operation() {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(err) => {
                if is_failure(&err) {
                    self.on_failure();
                }
                Err(BreakerError::Inner(err))
            }
        }
    }

    /// Awaits `operation`, counting every error as a dependency failure.
    ///
    /// The breaker lock is never held across the await.
    pub async fn call_async<T, E, F, Fut>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        self.admit().map_err(BreakerError::Unavailable)?;
        match operation().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(err) => {
                self.on_failure();
                Err(BreakerError::Inner(err))
            }
        }
    }

    /// Wraps `operation` so every call goes through this breaker.
    pub fn guard<T, E, F>(self: &Arc<Self>, mut operation: F) -> impl FnMut() -> Result<T, BreakerError<E>>
    where
        F: FnMut() -> Result<T, E>,
    {
        let breaker = Arc::clone(self);
        move || breaker.call(&mut operation)
    }

    fn refresh(&self, inner: &mut BreakerState, now: Instant) {
        if inner.state != CircuitState::Open {
            return;
        }
        if let Some(opened_at) = inner.opened_at {
            if now.saturating_duration_since(opened_at) >= self.config.recovery_timeout {
                inner.state = CircuitState::HalfOpen;
                info!(dependency = %self.name, "Circuit breaker half-open, allowing probe calls");
                self.publish_state(CircuitState::HalfOpen);
            }
        }
    }

    fn admit(&self) -> Result<(), CircuitBreakerUnavailable> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        self.refresh(&mut inner, now);

        if inner.state != CircuitState::Open {
            return Ok(());
        }

        let elapsed = inner
            .opened_at
            .map_or(Duration::ZERO, |t| now.saturating_duration_since(t));
        if let Some(metrics) = &self.metrics {
            metrics.record_rejection();
        }
        Err(CircuitBreakerUnavailable {
            name: self.name.clone(),
            retry_after: self.config.recovery_timeout.saturating_sub(elapsed),
        })
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock();
        let previous = inner.state;
        *inner = BreakerState::new();
        if previous != CircuitState::Closed {
            info!(dependency = %self.name, from = %previous, "Circuit breaker closed");
            self.publish_state(CircuitState::Closed);
        }
    }

    fn on_failure(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);

        if inner.failure_count >= self.config.failure_threshold {
            let previous = inner.state;
            inner.state = CircuitState::Open;
            inner.opened_at = Some(now);
            if previous == CircuitState::Open {
                return;
            }
            warn!(
                dependency = %self.name,
                failures = inner.failure_count,
                "Circuit breaker tripped. State: OPEN"
            );
            if let Some(metrics) = &self.metrics {
                metrics.record_open();
            }
            self.publish_state(CircuitState::Open);
        }
    }

    fn publish_state(&self, state: CircuitState) {
        if let Some(metrics) = &self.metrics {
            metrics.set_breaker_state(state);
        }
    }
}
