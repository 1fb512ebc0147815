//! Standard metric sets for the capture pipeline.

use super::registry::MetricsRegistry;
use super::types::{Counter, Gauge, Histogram, DEFAULT_BUCKETS};
use crate::errors::MetricsError;
use crate::resilience::CircuitState;
use std::sync::Arc;
use std::time::Duration;

/// Buckets for whole pipeline runs, in seconds.
pub const PIPELINE_RUN_BUCKETS: &[f64] = &[
    1.0,
    5.0,
    10.0,
    30.0,
    60.0,
    120.0,
    300.0,
    600.0,
    1800.0,
    3600.0,
    f64::INFINITY,
];

/// Buckets for retry backoff delays, in seconds.
pub const BACKOFF_BUCKETS: &[f64] = &[0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, f64::INFINITY];

/// Request, run, scraping and OCR metrics.
#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    /// Total HTTP requests served.
    pub http_requests_total: Arc<Counter>,
    /// HTTP request latency.
    pub http_request_duration_seconds: Arc<Histogram>,
    /// Total pipeline runs.
    pub pipeline_runs_total: Arc<Counter>,
    /// Pipeline run duration.
    pub pipeline_run_duration_seconds: Arc<Histogram>,
    /// Items scraped.
    pub scraping_items_total: Arc<Counter>,
    /// Scraping errors.
    pub scraping_errors_total: Arc<Counter>,
    /// Items processed by OCR.
    pub ocr_items_total: Arc<Counter>,
    /// OCR time per item.
    pub ocr_duration_seconds: Arc<Histogram>,
    /// Active worker threads.
    pub active_workers: Arc<Gauge>,
    /// Constant 1, labelled with version and environment.
    pub app_info: Arc<Gauge>,
}

impl PipelineMetrics {
    /// Registers the pipeline metrics (idempotent).
    pub fn register(registry: &MetricsRegistry, version: &str, env: &str) -> Result<Self, MetricsError> {
        let app_info = registry.gauge(
            "app_info",
            "Application information",
            &[("version", version), ("env", env)],
        )?;
        app_info.set(1.0);

        Ok(Self {
            http_requests_total: registry.counter(
                "http_requests_total",
                "Total number of HTTP requests",
                &[],
            )?,
            http_request_duration_seconds: registry.histogram(
                "http_request_duration_seconds",
                "HTTP request duration in seconds",
                &[],
                DEFAULT_BUCKETS,
            )?,
            pipeline_runs_total: registry.counter(
                "pipeline_runs_total",
                "Total number of pipeline runs",
                &[],
            )?,
            pipeline_run_duration_seconds: registry.histogram(
                "pipeline_run_duration_seconds",
                "Pipeline run duration in seconds",
                &[],
                PIPELINE_RUN_BUCKETS,
            )?,
            scraping_items_total: registry.counter(
                "scraping_items_total",
                "Total number of items scraped",
                &[],
            )?,
            scraping_errors_total: registry.counter(
                "scraping_errors_total",
                "Total number of scraping errors",
                &[],
            )?,
            ocr_items_total: registry.counter(
                "ocr_items_total",
                "Total number of items processed by OCR",
                &[],
            )?,
            ocr_duration_seconds: registry.histogram(
                "ocr_duration_seconds",
                "OCR processing duration per item in seconds",
                &[],
                DEFAULT_BUCKETS,
            )?,
            active_workers: registry.gauge("active_workers", "Number of active worker threads", &[])?,
            app_info,
        })
    }
}

/// Retry and circuit breaker metrics for one dependency.
#[derive(Debug, Clone)]
pub struct ResilienceMetrics {
    attempt_failures: Arc<Counter>,
    exhausted: Arc<Counter>,
    backoff: Arc<Histogram>,
    breaker_opens: Arc<Counter>,
    breaker_rejections: Arc<Counter>,
    breaker_state: Arc<Gauge>,
}

impl ResilienceMetrics {
    /// Registers the metrics labelled with `dependency` (idempotent).
    pub fn for_dependency(registry: &MetricsRegistry, dependency: &str) -> Result<Self, MetricsError> {
        let labels = [("dependency", dependency)];
        Ok(Self {
            attempt_failures: registry.counter(
                "retry_attempt_failures_total",
                "Attempts that failed with a retryable error",
                &labels,
            )?,
            exhausted: registry.counter(
                "retry_exhausted_total",
                "Retry sequences that gave up after the final attempt",
                &labels,
            )?,
            backoff: registry.histogram(
                "retry_backoff_seconds",
                "Backoff delay before a retry in seconds",
                &labels,
                BACKOFF_BUCKETS,
            )?,
            breaker_opens: registry.counter(
                "circuit_breaker_opens_total",
                "Times the circuit breaker opened",
                &labels,
            )?,
            breaker_rejections: registry.counter(
                "circuit_breaker_rejections_total",
                "Calls rejected while the circuit breaker was open",
                &labels,
            )?,
            breaker_state: registry.gauge(
                "circuit_breaker_state",
                "Circuit breaker state (0=closed, 1=open, 2=half_open)",
                &labels,
            )?,
        })
    }

    pub(crate) fn record_attempt_failure(&self) {
        self.attempt_failures.inc();
    }

    pub(crate) fn record_exhausted(&self) {
        self.exhausted.inc();
    }

    pub(crate) fn record_backoff(&self, delay: Duration) {
        self.backoff.observe(delay.as_secs_f64());
    }

    pub(crate) fn record_open(&self) {
        self.breaker_opens.inc();
    }

    pub(crate) fn record_rejection(&self) {
        self.breaker_rejections.inc();
    }

    pub(crate) fn set_breaker_state(&self, state: CircuitState) {
        self.breaker_state.set(state.as_metric_value());
    }
}
