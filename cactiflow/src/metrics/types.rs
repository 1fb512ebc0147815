//! Counter, gauge and histogram metric types.

use crate::errors::MetricsError;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;
use tracing::warn;

/// A canonical (sorted) label set.
pub type Labels = BTreeMap<String, String>;

/// Builds a canonical label set from pairs.
#[must_use]
pub fn labels(pairs: &[(&str, &str)]) -> Labels {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

/// Default histogram boundaries, in seconds.
pub const DEFAULT_BUCKETS: &[f64] = &[
    0.005,
    0.01,
    0.025,
    0.05,
    0.075,
    0.1,
    0.25,
    0.5,
    0.75,
    1.0,
    2.5,
    5.0,
    7.5,
    10.0,
    f64::INFINITY,
];

/// The kind of a metric family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    /// Monotonic counter.
    Counter,
    /// Settable gauge.
    Gauge,
    /// Cumulative-bucket histogram.
    Histogram,
}

impl MetricKind {
    /// Returns the exposition `TYPE` keyword.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
            Self::Histogram => "histogram",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A monotonically non-decreasing value.
#[derive(Debug)]
pub struct Counter {
    name: String,
    help: String,
    labels: Labels,
    value: Mutex<f64>,
}

impl Counter {
    /// Creates a counter at zero.
    #[must_use]
    pub fn new(name: impl Into<String>, help: impl Into<String>, labels: Labels) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            labels,
            value: Mutex::new(0.0),
        }
    }

    /// Adds one.
    pub fn inc(&self) {
        self.inc_by(1.0);
    }

    /// Adds `delta`. Negative or NaN deltas are logged and ignored.
    pub fn inc_by(&self, delta: f64) {
        if delta.is_nan() || delta < 0.0 {
            warn!(metric = %self.name, delta, "Ignoring invalid counter increment");
            return;
        }
        *self.value.lock() += delta;
    }

    /// Returns the current value.
    pub fn value(&self) -> f64 {
        *self.value.lock()
    }

    /// Returns the metric name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the help text.
    #[must_use]
    pub fn help(&self) -> &str {
        &self.help
    }

    /// Returns the label set.
    #[must_use]
    pub fn labels(&self) -> &Labels {
        &self.labels
    }
}

/// A freely settable value.
#[derive(Debug)]
pub struct Gauge {
    name: String,
    help: String,
    labels: Labels,
    value: Mutex<f64>,
}

impl Gauge {
    /// Creates a gauge at zero.
    #[must_use]
    pub fn new(name: impl Into<String>, help: impl Into<String>, labels: Labels) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            labels,
            value: Mutex::new(0.0),
        }
    }

    /// Overwrites the value.
    pub fn set(&self, value: f64) {
        *self.value.lock() = value;
    }

    /// Adds one.
    pub fn inc(&self) {
        self.inc_by(1.0);
    }

    /// Subtracts one.
    pub fn dec(&self) {
        self.dec_by(1.0);
    }

    /// Adds `delta`.
    pub fn inc_by(&self, delta: f64) {
        *self.value.lock() += delta;
    }

    /// Subtracts `delta`.
    pub fn dec_by(&self, delta: f64) {
        *self.value.lock() -= delta;
    }

    /// Returns the current value.
    pub fn value(&self) -> f64 {
        *self.value.lock()
    }

    /// Returns the metric name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the help text.
    #[must_use]
    pub fn help(&self) -> &str {
        &self.help
    }

    /// Returns the label set.
    #[must_use]
    pub fn labels(&self) -> &Labels {
        &self.labels
    }
}

#[derive(Debug)]
struct HistogramState {
    bucket_counts: Vec<u64>,
    sum: f64,
    count: u64,
}

/// A point-in-time copy of a histogram.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramSnapshot {
    /// `(boundary, cumulative count)` pairs, ascending.
    pub buckets: Vec<(f64, u64)>,
    /// Sum of observed values.
    pub sum: f64,
    /// Number of observations.
    pub count: u64,
}

/// Observations counted into cumulative buckets.
#[derive(Debug)]
pub struct Histogram {
    name: String,
    help: String,
    labels: Labels,
    bounds: Vec<f64>,
    state: Mutex<HistogramState>,
}

impl Histogram {
    /// Creates a histogram. Boundaries are sorted and deduplicated; they must
    /// be non-empty and free of NaN.
    pub fn new(
        name: impl Into<String>,
        help: impl Into<String>,
        labels: Labels,
        buckets: &[f64],
    ) -> Result<Self, MetricsError> {
        let name = name.into();
        let bounds = normalize_buckets(&name, buckets)?;
        let slots = bounds.len();
        Ok(Self {
            name,
            help: help.into(),
            labels,
            bounds,
            state: Mutex::new(HistogramState {
                bucket_counts: vec![0; slots],
                sum: 0.0,
                count: 0,
            }),
        })
    }

    /// Records one observation.
    ///
    /// NaN is ignored.
    pub fn observe(&self, value: f64) {
        if value.is_nan() {
            warn!(metric = %self.name, "Ignoring NaN histogram observation");
            return;
        }
        let mut state = self.state.lock();
        state.sum += value;
        state.count += 1;
        for (slot, bound) in state.bucket_counts.iter_mut().zip(&self.bounds) {
            if value <= *bound {
                *slot += 1;
            }
        }
    }

    /// Starts a timer that observes elapsed seconds when dropped.
    #[must_use]
    pub fn start_timer(&self) -> HistogramTimer<'_> {
        HistogramTimer {
            histogram: self,
            start: Instant::now(),
            observed: false,
        }
    }

    /// Returns a consistent copy of the buckets, sum and count.
    pub fn snapshot(&self) -> HistogramSnapshot {
        let state = self.state.lock();
        HistogramSnapshot {
            buckets: self
                .bounds
                .iter()
                .copied()
                .zip(state.bucket_counts.iter().copied())
                .collect(),
            sum: state.sum,
            count: state.count,
        }
    }

    /// Returns the sum of observed values.
    pub fn sum(&self) -> f64 {
        self.state.lock().sum
    }

    /// Returns the number of observations.
    pub fn count(&self) -> u64 {
        self.state.lock().count
    }

    /// Returns the configured boundaries.
    #[must_use]
    pub fn buckets(&self) -> &[f64] {
        &self.bounds
    }

    /// Returns the metric name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the help text.
    #[must_use]
    pub fn help(&self) -> &str {
        &self.help
    }

    /// Returns the label set.
    #[must_use]
    pub fn labels(&self) -> &Labels {
        &self.labels
    }
}

fn normalize_buckets(name: &str, buckets: &[f64]) -> Result<Vec<f64>, MetricsError> {
    if buckets.is_empty() || buckets.iter().any(|b| b.is_nan()) {
        return Err(MetricsError::InvalidBuckets(name.to_string()));
    }
    let mut bounds = buckets.to_vec();
    bounds.sort_by(f64::total_cmp);
    bounds.dedup();
    Ok(bounds)
}

/// Observes elapsed wall time into a histogram when dropped.
#[derive(Debug)]
pub struct HistogramTimer<'a> {
    histogram: &'a Histogram,
    start: Instant,
    observed: bool,
}

impl HistogramTimer<'_> {
    /// Observes now and returns the elapsed seconds.
    pub fn observe_duration(mut self) -> f64 {
        self.record()
    }

    fn record(&mut self) -> f64 {
        let secs = self.start.elapsed().as_secs_f64();
        if !self.observed {
            self.histogram.observe(secs);
            self.observed = true;
        }
        secs
    }
}

impl Drop for HistogramTimer<'_> {
    fn drop(&mut self) {
        self.record();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_counter_inc() {
        let counter = Counter::new("ocr_items_total", "OCR items", Labels::new());
        counter.inc();
        counter.inc_by(2.5);
        assert!((counter.value() - 3.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_counter_ignores_negative_delta() {
        let counter = Counter::new("x_total", "x", Labels::new());
        counter.inc_by(2.0);
        counter.inc_by(-1.0);
        counter.inc_by(f64::NAN);
        assert!((counter.value() - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_counter_concurrent_increments() {
        let counter = Arc::new(Counter::new("x_total", "x", Labels::new()));
        let handles: Vec<_> = (0..5)
            .map(|_| {
                let counter = counter.clone();
                std::thread::spawn(move || counter.inc())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!((counter.value() - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_gauge_ops() {
        let gauge = Gauge::new("active_workers", "workers", Labels::new());
        gauge.set(4.0);
        gauge.inc();
        gauge.dec_by(3.0);
        gauge.dec();
        assert!((gauge.value() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_histogram_cumulative_buckets() {
        let hist = Histogram::new("latency", "latency", Labels::new(), &[1.0, 5.0, 10.0]).unwrap();
        for v in [0.5, 3.0, 7.0, 20.0] {
            hist.observe(v);
        }

        let snap = hist.snapshot();
        assert_eq!(snap.buckets, vec![(1.0, 1), (5.0, 2), (10.0, 3)]);
        assert!((snap.sum - 30.5).abs() < f64::EPSILON);
        assert_eq!(snap.count, 4);
    }

    #[test]
    fn test_histogram_ignores_nan() {
        let hist = Histogram::new("h", "h", Labels::new(), &[1.0]).unwrap();
        hist.observe(0.5);
        hist.observe(f64::NAN);

        let snap = hist.snapshot();
        assert_eq!(snap.count, 1);
        assert!((snap.sum - 0.5).abs() < f64::EPSILON);
        assert_eq!(snap.buckets, vec![(1.0, 1)]);
    }

    #[test]
    fn test_histogram_boundary_is_inclusive() {
        let hist = Histogram::new("h", "h", Labels::new(), &[1.0]).unwrap();
        hist.observe(1.0);
        assert_eq!(hist.snapshot().buckets, vec![(1.0, 1)]);
    }

    #[test]
    fn test_histogram_sorts_and_dedups_buckets() {
        let hist = Histogram::new("h", "h", Labels::new(), &[10.0, 1.0, 5.0, 1.0]).unwrap();
        assert_eq!(hist.buckets(), &[1.0, 5.0, 10.0]);
    }

    #[test]
    fn test_histogram_rejects_bad_buckets() {
        assert!(matches!(
            Histogram::new("h", "h", Labels::new(), &[]),
            Err(MetricsError::InvalidBuckets(_))
        ));
        assert!(Histogram::new("h", "h", Labels::new(), &[1.0, f64::NAN]).is_err());
    }

    #[test]
    fn test_timer_observes_once() {
        let hist = Histogram::new("h", "h", Labels::new(), DEFAULT_BUCKETS).unwrap();
        {
            let _timer = hist.start_timer();
        }
        let timer = hist.start_timer();
        let secs = timer.observe_duration();
        assert!(secs >= 0.0);
        assert_eq!(hist.count(), 2);
    }

    #[test]
    fn test_labels_are_sorted() {
        let set = labels(&[("version", "1.0.0"), ("env", "production")]);
        let keys: Vec<_> = set.keys().cloned().collect();
        assert_eq!(keys, vec!["env".to_string(), "version".to_string()]);
    }
}
