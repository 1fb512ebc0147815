//! # Cactiflow
//!
//! Resilience and observability for the dashboard capture pipeline.
//!
//! Every fallible pipeline call (network requests, browser actions, OCR,
//! file I/O) runs through this crate, and every long-running phase reports
//! through it:
//!
//! - **Retry with backoff**: bounded exponential backoff with optional jitter
//! - **Circuit breaking**: per-dependency CLOSED/OPEN/HALF_OPEN state machine
//! - **Metrics**: counters, gauges and histograms with a text exposition format
//! - **Progress**: shared scraping/OCR status streamed to subscribers
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cactiflow::prelude::*;
//!
//! let registry = MetricsRegistry::new();
//! let metrics = ResilienceMetrics::for_dependency(&registry, "ocr")?;
//! let breaker = CircuitBreaker::new("ocr", BreakerConfig::default())
//!     .with_metrics(metrics.clone());
//! let retry = RetryExecutor::new(BackoffPolicy::default()).with_metrics(metrics);
//!
//! let text = retry.execute(|| breaker.call(|| ocr.extract(&path)))?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod errors;
pub mod metrics;
pub mod observability;
pub mod progress;
pub mod resilience;
pub mod testing;
pub mod utils;

#[cfg(test)]
mod integration_tests;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::Settings;
    pub use crate::errors::{
        BreakerError, CactiflowError, CircuitBreakerUnavailable, MetricsError, ProgressError,
        RetryError, RetryExhausted,
    };
    pub use crate::metrics::{
        default_registry, track_duration, Counter, Gauge, Histogram, MetricsRegistry,
        PipelineMetrics, ResilienceMetrics,
    };
    pub use crate::observability::{init_logging, LogFormat};
    pub use crate::progress::{
        default_progress, ProgressBroadcaster, ProgressPatch, ProgressStatus, ProgressStore,
        Section,
    };
    pub use crate::resilience::{
        BackoffPolicy, BreakerConfig, CircuitBreaker, CircuitState, RetryExecutor,
    };
    pub use crate::utils::{now_utc, Timestamp};
}
