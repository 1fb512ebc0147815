//! Error types for the cactiflow substrate.
//!
//! Failures fall into two families. Errors raised by the substrate itself
//! (metric registration, progress patches, configuration, an open circuit)
//! are plain `thiserror` types. Errors that wrap a caller's own failure type
//! (`RetryExhausted`, `RetryError`, `BreakerError`) are generic over it so the
//! original error is handed back untouched.

use std::fmt;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// The main error type for cactiflow operations that do not carry a
/// caller-supplied failure.
#[derive(Debug, Error)]
pub enum CactiflowError {
    /// A metric could not be registered.
    #[error("{0}")]
    Metrics(#[from] MetricsError),

    /// A progress update was rejected.
    #[error("{0}")]
    Progress(#[from] ProgressError),

    /// Configuration could not be loaded.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// A circuit breaker refused a call.
    #[error("{0}")]
    Unavailable(#[from] CircuitBreakerUnavailable),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Raised by an open circuit breaker instead of invoking the wrapped call.
///
/// This is never counted as a dependency failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Circuit breaker '{name}' is OPEN; service unavailable, retry in {retry_after:?}")]
pub struct CircuitBreakerUnavailable {
    /// Name of the protected dependency.
    pub name: String,
    /// Time left until the breaker lets a probe call through.
    pub retry_after: Duration,
}

/// Errors from the metrics registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetricsError {
    /// The metric name is not a valid exposition identifier.
    #[error("Invalid metric name: '{0}'")]
    InvalidName(String),

    /// A label name is not a valid exposition identifier, or is reserved.
    #[error("Invalid label name '{label}' on metric '{metric}'")]
    InvalidLabelName {
        /// The metric being registered.
        metric: String,
        /// The offending label name.
        label: String,
    },

    /// The name is already registered with a different kind.
    #[error("Metric '{name}' is already registered as a {existing}, not a {requested}")]
    KindMismatch {
        /// The metric name.
        name: String,
        /// The kind fixed by the first registration.
        existing: &'static str,
        /// The kind of the rejected request.
        requested: &'static str,
    },

    /// Histogram boundaries are empty or contain NaN.
    #[error("Invalid histogram buckets for '{0}'")]
    InvalidBuckets(String),
}

/// Errors from the progress store.
#[derive(Debug, Error)]
pub enum ProgressError {
    /// The section name is not `scraping` or `ocr`.
    #[error("Unknown progress section: '{0}'")]
    UnknownSection(String),

    /// A JSON patch did not match the progress field set.
    #[error("Invalid progress patch: {0}")]
    InvalidPatch(#[from] serde_json::Error),
}

/// A progress subscriber is no longer receiving frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Progress subscriber disconnected")]
pub struct SubscriberDisconnected;

/// Errors from configuration loading and validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// An environment value could not be parsed.
    #[error("Invalid value for {key}: '{value}'")]
    InvalidValue {
        /// The variable name.
        key: String,
        /// The raw value.
        value: String,
    },

    /// A parsed configuration violates a constraint.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Raised after the final attempt of a retry sequence fails transiently.
#[derive(Debug)]
pub struct RetryExhausted<E> {
    /// Human-readable summary.
    pub message: String,
    /// The error raised by the final attempt.
    pub last_failure: E,
    /// Number of attempts made.
    pub attempts: u32,
}

impl<E: fmt::Display> RetryExhausted<E> {
    /// Creates the error from the final failure.
    #[must_use]
    pub fn new(last_failure: E, attempts: u32) -> Self {
        Self {
            message: format!("Failed after {attempts} attempts: {last_failure}"),
            last_failure,
            attempts,
        }
    }
}

impl<E> RetryExhausted<E> {
    /// Returns the error raised by the final attempt.
    pub fn last_failure(&self) -> &E {
        &self.last_failure
    }

    /// Consumes the error, returning the final failure.
    pub fn into_last_failure(self) -> E {
        self.last_failure
    }
}

impl<E> fmt::Display for RetryExhausted<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl<E: fmt::Debug> std::error::Error for RetryExhausted<E> {}

/// Outcome of a failed retry sequence.
#[derive(Debug)]
pub enum RetryError<E> {
    /// Every attempt failed transiently.
    Exhausted(RetryExhausted<E>),
    /// A non-retryable failure, returned as soon as it occurred.
    Terminal(E),
}

impl<E> RetryError<E> {
    /// Returns true if the sequence gave up after exhausting its attempts.
    pub const fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted(_))
    }

    /// Number of attempts made, if the sequence was exhausted.
    pub const fn attempts(&self) -> Option<u32> {
        match self {
            Self::Exhausted(e) => Some(e.attempts),
            Self::Terminal(_) => None,
        }
    }

    /// Returns the underlying failure (the last one when exhausted).
    pub fn inner(&self) -> &E {
        match self {
            Self::Exhausted(e) => &e.last_failure,
            Self::Terminal(e) => e,
        }
    }

    /// Consumes the error, returning the underlying failure.
    pub fn into_inner(self) -> E {
        match self {
            Self::Exhausted(e) => e.last_failure,
            Self::Terminal(e) => e,
        }
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhausted(e) => fmt::Display::fmt(e, f),
            Self::Terminal(e) => fmt::Display::fmt(e, f),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RetryError<E> {}

/// Outcome of a call through a circuit breaker.
#[derive(Debug)]
pub enum BreakerError<E> {
    /// The breaker was open; the call was not made.
    Unavailable(CircuitBreakerUnavailable),
    /// The wrapped call failed.
    Inner(E),
}

impl<E> BreakerError<E> {
    /// Returns true if the call was rejected without being made.
    pub const fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    /// Returns the wrapped call's error, if it was made.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Unavailable(_) => None,
            Self::Inner(e) => Some(e),
        }
    }
}

impl<E: fmt::Display> fmt::Display for BreakerError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable(e) => fmt::Display::fmt(e, f),
            Self::Inner(e) => fmt::Display::fmt(e, f),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for BreakerError<E> {}

/// Returns true for I/O failures that are worth another attempt.
#[must_use]
pub fn is_transient_io(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
    )
}

/// Returns true if any error in the chain is a transient I/O failure.
///
/// Collaborators usually report through `anyhow`; this walks the whole
/// chain so context layers added with `.context(..)` do not hide the cause.
#[must_use]
pub fn is_transient_error(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<io::Error>())
        .any(is_transient_io)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_retry_exhausted_message() {
        let err = RetryExhausted::new("connection reset".to_string(), 3);
        assert_eq!(err.to_string(), "Failed after 3 attempts: connection reset");
        assert_eq!(err.attempts, 3);
        assert_eq!(err.last_failure(), "connection reset");
    }

    #[test]
    fn test_retry_error_accessors() {
        let exhausted: RetryError<String> =
            RetryError::Exhausted(RetryExhausted::new("boom".to_string(), 2));
        assert!(exhausted.is_exhausted());
        assert_eq!(exhausted.attempts(), Some(2));
        assert_eq!(exhausted.into_inner(), "boom");

        let terminal: RetryError<String> = RetryError::Terminal("bad input".to_string());
        assert!(!terminal.is_exhausted());
        assert_eq!(terminal.attempts(), None);
        assert_eq!(terminal.to_string(), "bad input");
    }

    #[test]
    fn test_breaker_error_unavailable() {
        let err: BreakerError<String> = BreakerError::Unavailable(CircuitBreakerUnavailable {
            name: "cacti".to_string(),
            retry_after: Duration::from_secs(5),
        });
        assert!(err.is_unavailable());
        assert!(err.to_string().contains("'cacti' is OPEN"));
        assert!(err.into_inner().is_none());
    }

    #[test]
    fn test_transient_io_classification() {
        assert!(is_transient_io(&io::Error::from(io::ErrorKind::TimedOut)));
        assert!(is_transient_io(&io::Error::from(io::ErrorKind::ConnectionReset)));
        assert!(!is_transient_io(&io::Error::from(io::ErrorKind::NotFound)));
        assert!(!is_transient_io(&io::Error::from(io::ErrorKind::PermissionDenied)));
    }

    #[test]
    fn test_transient_error_walks_chain() {
        let err = Err::<(), _>(io::Error::from(io::ErrorKind::TimedOut))
            .context("downloading graph image")
            .unwrap_err();
        assert!(is_transient_error(&err));

        let err = anyhow::anyhow!("selector not found");
        assert!(!is_transient_error(&err));
    }

    #[test]
    fn test_umbrella_conversion() {
        let err: CactiflowError = MetricsError::InvalidName("1bad".to_string()).into();
        assert!(matches!(err, CactiflowError::Metrics(_)));
        assert_eq!(err.to_string(), "Invalid metric name: '1bad'");
    }
}
