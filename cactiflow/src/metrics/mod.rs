//! In-process metrics with a text exposition format.
//!
//! This module provides:
//! - Counter, gauge and histogram types, each behind its own lock
//! - A get-or-create registry keyed by name and label set
//! - Byte-stable text rendering for a scrape endpoint
//! - Instrumentation wrappers and the standard pipeline metric sets

mod exposition;
mod instrument;
mod registry;
mod standard;
mod types;

pub use exposition::{format_value, EXPOSITION_CONTENT_TYPE};
pub use instrument::{track_duration, track_outcome};
pub use registry::{default_registry, Metric, MetricKey, MetricsRegistry, DEFAULT_REGISTRY};
pub use standard::{PipelineMetrics, ResilienceMetrics, BACKOFF_BUCKETS, PIPELINE_RUN_BUCKETS};
pub use types::{
    labels, Counter, Gauge, Histogram, HistogramSnapshot, HistogramTimer, Labels, MetricKind,
    DEFAULT_BUCKETS,
};
