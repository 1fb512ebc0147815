//! Get-or-create metric registry.
//!
//! Each `(name, label set)` key maps to exactly one metric instance. The
//! first registration of a name fixes its kind and help text; asking for the
//! same name as another kind is an error rather than a silent alias.

use super::exposition::{self, FamilySnapshot, Sample, SampleValue};
use super::types::{labels as label_set, Counter, Gauge, Histogram, Labels, MetricKind};
use crate::errors::MetricsError;
use dashmap::DashMap;
use regex::Regex;
use std::sync::{Arc, LazyLock};

#[allow(clippy::expect_used)]
static METRIC_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z_:][a-zA-Z0-9_:]*$").expect("valid metric name pattern"));

#[allow(clippy::expect_used)]
static LABEL_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").expect("valid label name pattern"));

/// Process-wide registry for call sites that have no registry handed to them.
pub static DEFAULT_REGISTRY: LazyLock<Arc<MetricsRegistry>> =
    LazyLock::new(|| Arc::new(MetricsRegistry::new()));

/// Returns the process-wide registry.
#[must_use]
pub fn default_registry() -> Arc<MetricsRegistry> {
    Arc::clone(&DEFAULT_REGISTRY)
}

/// Registry key: a metric name plus its canonical label set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricKey {
    /// Metric name.
    pub name: String,
    /// Sorted labels.
    pub labels: Labels,
}

/// A registered metric instance.
#[derive(Debug, Clone)]
pub enum Metric {
    /// A counter.
    Counter(Arc<Counter>),
    /// A gauge.
    Gauge(Arc<Gauge>),
    /// A histogram.
    Histogram(Arc<Histogram>),
}

impl Metric {
    /// Returns the kind of this metric.
    #[must_use]
    pub const fn kind(&self) -> MetricKind {
        match self {
            Self::Counter(_) => MetricKind::Counter,
            Self::Gauge(_) => MetricKind::Gauge,
            Self::Histogram(_) => MetricKind::Histogram,
        }
    }

    fn sample_value(&self) -> SampleValue {
        match self {
            Self::Counter(c) => SampleValue::Scalar(c.value()),
            Self::Gauge(g) => SampleValue::Scalar(g.value()),
            Self::Histogram(h) => SampleValue::Histogram(h.snapshot()),
        }
    }
}

#[derive(Debug, Clone)]
struct Family {
    kind: MetricKind,
    help: String,
}

/// Thread-safe store of named metrics.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    families: DashMap<String, Family>,
    metrics: DashMap<MetricKey, Metric>,
}

impl MetricsRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets or creates a counter.
    pub fn counter(
        &self,
        name: &str,
        help: &str,
        labels: &[(&str, &str)],
    ) -> Result<Arc<Counter>, MetricsError> {
        let key = self.prepare(name, help, labels, MetricKind::Counter)?;
        let metric = self
            .metrics
            .entry(key)
            .or_insert_with(|| Metric::Counter(Arc::new(Counter::new(name, help, label_set(labels)))))
            .value()
            .clone();
        match metric {
            Metric::Counter(counter) => Ok(counter),
            other => Err(mismatch(name, other.kind(), MetricKind::Counter)),
        }
    }

    /// Gets or creates a gauge.
    pub fn gauge(
        &self,
        name: &str,
        help: &str,
        labels: &[(&str, &str)],
    ) -> Result<Arc<Gauge>, MetricsError> {
        let key = self.prepare(name, help, labels, MetricKind::Gauge)?;
        let metric = self
            .metrics
            .entry(key)
            .or_insert_with(|| Metric::Gauge(Arc::new(Gauge::new(name, help, label_set(labels)))))
            .value()
            .clone();
        match metric {
            Metric::Gauge(gauge) => Ok(gauge),
            other => Err(mismatch(name, other.kind(), MetricKind::Gauge)),
        }
    }

    /// Gets or creates a histogram. `buckets` only applies on creation.
    pub fn histogram(
        &self,
        name: &str,
        help: &str,
        labels: &[(&str, &str)],
        buckets: &[f64],
    ) -> Result<Arc<Histogram>, MetricsError> {
        if let Some(Metric::Histogram(existing)) = self.get(name, labels) {
            return Ok(existing);
        }
        let fresh = Arc::new(Histogram::new(name, help, label_set(labels), buckets)?);
        let key = self.prepare(name, help, labels, MetricKind::Histogram)?;
        let metric = self
            .metrics
            .entry(key)
            .or_insert_with(|| Metric::Histogram(fresh))
            .value()
            .clone();
        match metric {
            Metric::Histogram(histogram) => Ok(histogram),
            other => Err(mismatch(name, other.kind(), MetricKind::Histogram)),
        }
    }

    /// Looks up a registered metric without creating it.
    #[must_use]
    pub fn get(&self, name: &str, labels: &[(&str, &str)]) -> Option<Metric> {
        let key = MetricKey {
            name: name.to_string(),
            labels: label_set(labels),
        };
        self.metrics.get(&key).map(|entry| entry.value().clone())
    }

    /// Returns the number of registered `(name, labels)` instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Renders every metric in the text exposition format.
    ///
    /// Families are ordered by name and samples by label set, so a fixed
    /// state always renders to the same bytes.
    pub fn format_text(&self) -> String {
        exposition::render(&self.collect())
    }

    /// Copies every metric value, briefly locking each one in turn.
    fn collect(&self) -> Vec<FamilySnapshot> {
        let mut samples: Vec<(MetricKey, SampleValue)> = self
            .metrics
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().sample_value()))
            .collect();
        samples.sort_by(|a, b| a.0.cmp(&b.0));

        let mut families: Vec<FamilySnapshot> = Vec::new();
        for (key, value) in samples {
            let sample = Sample {
                labels: key.labels,
                value,
            };
            match families.last_mut() {
                Some(family) if family.name == key.name => family.samples.push(sample),
                _ => {
                    let Some(meta) = self.families.get(&key.name).map(|f| f.value().clone()) else {
                        continue;
                    };
                    families.push(FamilySnapshot {
                        name: key.name,
                        help: meta.help,
                        kind: meta.kind,
                        samples: vec![sample],
                    });
                }
            }
        }
        families
    }

    /// Validates a request and fixes the family kind on first use.
    fn prepare(
        &self,
        name: &str,
        help: &str,
        labels: &[(&str, &str)],
        kind: MetricKind,
    ) -> Result<MetricKey, MetricsError> {
        if !METRIC_NAME.is_match(name) {
            return Err(MetricsError::InvalidName(name.to_string()));
        }
        for (label, _) in labels {
            let reserved = *label == "le" && kind == MetricKind::Histogram;
            if reserved || label.starts_with("__") || !LABEL_NAME.is_match(label) {
                return Err(MetricsError::InvalidLabelName {
                    metric: name.to_string(),
                    label: (*label).to_string(),
                });
            }
        }

        let existing = self
            .families
            .entry(name.to_string())
            .or_insert_with(|| Family {
                kind,
                help: help.to_string(),
            })
            .kind;
        if existing != kind {
            return Err(mismatch(name, existing, kind));
        }

        Ok(MetricKey {
            name: name.to_string(),
            labels: label_set(labels),
        })
    }
}

fn mismatch(name: &str, existing: MetricKind, requested: MetricKind) -> MetricsError {
    MetricsError::KindMismatch {
        name: name.to_string(),
        existing: existing.as_str(),
        requested: requested.as_str(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_counter_is_idempotent() {
        let registry = MetricsRegistry::new();
        let a = registry.counter("pipeline_runs_total", "Runs", &[]).unwrap();
        let b = registry.counter("pipeline_runs_total", "Ignored help", &[]).unwrap();

        a.inc();
        assert!(Arc::ptr_eq(&a, &b));
        assert!((b.value() - 1.0).abs() < f64::EPSILON);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_label_order_does_not_matter() {
        let registry = MetricsRegistry::new();
        let a = registry
            .gauge("app_info", "Info", &[("version", "1.0.0"), ("env", "production")])
            .unwrap();
        let b = registry
            .gauge("app_info", "Info", &[("env", "production"), ("version", "1.0.0")])
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_distinct_labels_are_distinct_instances() {
        let registry = MetricsRegistry::new();
        let ok = registry.counter("http_requests_total", "Requests", &[("status", "200")]).unwrap();
        let err = registry.counter("http_requests_total", "Requests", &[("status", "500")]).unwrap();
        assert!(!Arc::ptr_eq(&ok, &err));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_kind_mismatch_fails_fast() {
        let registry = MetricsRegistry::new();
        registry.counter("active_workers", "Workers", &[]).unwrap();

        let err = registry.gauge("active_workers", "Workers", &[]).unwrap_err();
        assert_eq!(
            err,
            MetricsError::KindMismatch {
                name: "active_workers".to_string(),
                existing: "counter",
                requested: "gauge",
            }
        );

        let err = registry
            .histogram("active_workers", "Workers", &[("pool", "ocr")], &[1.0])
            .unwrap_err();
        assert!(matches!(err, MetricsError::KindMismatch { .. }));
    }

    #[test]
    fn test_invalid_names_rejected() {
        let registry = MetricsRegistry::new();
        assert!(matches!(
            registry.counter("1st_total", "x", &[]),
            Err(MetricsError::InvalidName(_))
        ));
        assert!(matches!(
            registry.counter("ok_total", "x", &[("bad-label", "v")]),
            Err(MetricsError::InvalidLabelName { .. })
        ));
        assert!(matches!(
            registry.histogram("h", "x", &[("le", "1")], &[1.0]),
            Err(MetricsError::InvalidLabelName { .. })
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_histogram_buckets_fixed_on_creation() {
        let registry = MetricsRegistry::new();
        let a = registry.histogram("latency", "Latency", &[], &[1.0, 5.0]).unwrap();
        let b = registry.histogram("latency", "Latency", &[], &[100.0]).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.buckets(), &[1.0, 5.0]);

        let c = registry.histogram("latency", "Latency", &[], &[]).unwrap();
        assert!(Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn test_histogram_rejects_empty_buckets_on_creation() {
        let registry = MetricsRegistry::new();
        assert!(matches!(
            registry.histogram("latency", "Latency", &[], &[]),
            Err(MetricsError::InvalidBuckets(_))
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_get_existing_metric() {
        let registry = MetricsRegistry::new();
        registry.counter("ocr_items_total", "Items", &[]).unwrap().inc();
        assert!(matches!(
            registry.get("ocr_items_total", &[]),
            Some(Metric::Counter(c)) if (c.value() - 1.0).abs() < f64::EPSILON
        ));
        assert!(registry.get("missing", &[]).is_none());
    }

    #[test]
    fn test_format_single_counter() {
        let registry = MetricsRegistry::new();
        registry.counter("x_total", "desc", &[]).unwrap().inc_by(5.0);
        assert_eq!(
            registry.format_text(),
            "# HELP x_total desc\n# TYPE x_total counter\nx_total 5\n"
        );
    }

    #[test]
    fn test_format_is_sorted_and_stable() {
        let registry = MetricsRegistry::new();
        registry
            .counter("scraping_items_total", "Items scraped", &[("folder", "b")])
            .unwrap()
            .inc_by(2.0);
        registry.gauge("active_workers", "Active workers", &[]).unwrap().set(3.0);
        registry
            .counter("scraping_items_total", "Items scraped", &[("folder", "a")])
            .unwrap()
            .inc();
        let hist = registry
            .histogram("ocr_duration_seconds", "OCR seconds", &[], &[1.0, 5.0, 10.0])
            .unwrap();
        for v in [0.5, 3.0, 7.0, 20.0] {
            hist.observe(v);
        }

        let expected = "\
# HELP active_workers Active workers
# TYPE active_workers gauge
active_workers 3
# HELP ocr_duration_seconds OCR seconds
# TYPE ocr_duration_seconds histogram
ocr_duration_seconds_bucket{le=\"1\"} 1
ocr_duration_seconds_bucket{le=\"5\"} 2
ocr_duration_seconds_bucket{le=\"10\"} 3
ocr_duration_seconds_bucket{le=\"+Inf\"} 4
ocr_duration_seconds_sum 30.5
ocr_duration_seconds_count 4
# HELP scraping_items_total Items scraped
# TYPE scraping_items_total counter
scraping_items_total{folder=\"a\"} 1
scraping_items_total{folder=\"b\"} 2
";
        assert_eq!(registry.format_text(), expected);
        assert_eq!(registry.format_text(), expected);
    }

    #[test]
    fn test_empty_registry_renders_nothing() {
        assert_eq!(MetricsRegistry::new().format_text(), "");
    }

    #[test]
    fn test_concurrent_get_or_create_yields_one_instance() {
        let registry = Arc::new(MetricsRegistry::new());
        let handles: Vec<_> = (0..5)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    registry.counter("x_total", "desc", &[]).unwrap().inc();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.format_text(),
            "# HELP x_total desc\n# TYPE x_total counter\nx_total 5\n"
        );
    }

    #[test]
    fn test_default_registry_is_shared() {
        let a = default_registry();
        let b = default_registry();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
