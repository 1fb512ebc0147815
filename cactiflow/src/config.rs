//! Runtime settings loaded from the environment.

use crate::errors::ConfigError;
use crate::observability::LogFormat;
use crate::progress::DEFAULT_INTERVAL;
use crate::resilience::{BackoffPolicy, BreakerConfig};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Settings for the resilience and progress layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Default retry policy.
    pub retry: BackoffPolicy,
    /// Default circuit breaker parameters.
    pub breaker: BreakerConfig,
    /// Time between progress frames.
    #[serde(with = "interval_ms")]
    pub progress_interval: Duration,
    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            retry: BackoffPolicy::default(),
            breaker: BreakerConfig::default(),
            progress_interval: DEFAULT_INTERVAL,
            log_format: LogFormat::default(),
        }
    }
}

impl Settings {
    /// Loads settings from the process environment.
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads settings through `lookup`, which maps a variable name to its
    /// value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();

        if let Some(v) = read(&lookup, "RETRY_MAX_ATTEMPTS")? {
            settings.retry.max_attempts = v;
        }
        if let Some(v) = read_secs(&lookup, "RETRY_BASE_DELAY")? {
            settings.retry.base_delay = v;
        }
        if let Some(v) = read_secs(&lookup, "RETRY_MAX_DELAY")? {
            settings.retry.max_delay = v;
        }
        if let Some(v) = read(&lookup, "RETRY_EXPONENTIAL_BASE")? {
            settings.retry.exponential_base = v;
        }
        if let Some(v) = read_bool(&lookup, "RETRY_JITTER")? {
            settings.retry.jitter = v;
        }
        if let Some(v) = read(&lookup, "CIRCUIT_FAILURE_THRESHOLD")? {
            settings.breaker.failure_threshold = v;
        }
        if let Some(v) = read_secs(&lookup, "CIRCUIT_RECOVERY_TIMEOUT")? {
            settings.breaker.recovery_timeout = v;
        }
        if let Some(v) = read::<u64, _>(&lookup, "PROGRESS_INTERVAL_MS")? {
            settings.progress_interval = Duration::from_millis(v);
        }
        if let Some(v) = read(&lookup, "LOG_FORMAT")? {
            settings.log_format = v;
        }

        Ok(settings)
    }

    /// Checks constraints that the individual values cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".to_string()));
        }
        if !(self.retry.exponential_base.is_finite() && self.retry.exponential_base > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "exponential_base must be positive, got {}",
                self.retry.exponential_base
            )));
        }
        if self.retry.max_delay < self.retry.base_delay {
            return Err(ConfigError::Invalid(format!(
                "max_delay ({:?}) is shorter than base_delay ({:?})",
                self.retry.max_delay, self.retry.base_delay
            )));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.progress_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "progress_interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn read<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| invalid(key, &raw)),
    }
}

fn read_secs<F>(lookup: &F, key: &str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<f64>()
        .ok()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .map(Some)
        .ok_or_else(|| invalid(key, &raw))
}

fn read_bool<F>(lookup: &F, key: &str) -> Result<Option<bool>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(Some(true)),
        "false" | "0" | "no" | "off" => Ok(Some(false)),
        _ => Err(invalid(key, &raw)),
    }
}

mod interval_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
