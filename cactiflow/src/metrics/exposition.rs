//! Text exposition format.
//!
//! Rendering works on copied values only, so no metric lock is held while
//! the output is built.

use super::types::{HistogramSnapshot, Labels, MetricKind};
use std::fmt::Write;

/// Content type for the metrics endpoint.
pub const EXPOSITION_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// A copied sample value.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SampleValue {
    Scalar(f64),
    Histogram(HistogramSnapshot),
}

/// One label combination of a family.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Sample {
    pub labels: Labels,
    pub value: SampleValue,
}

/// All samples sharing a metric name.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FamilySnapshot {
    pub name: String,
    pub help: String,
    pub kind: MetricKind,
    pub samples: Vec<Sample>,
}

/// Renders families in the order given.
pub(crate) fn render(families: &[FamilySnapshot]) -> String {
    let mut out = String::new();
    for family in families {
        let _ = writeln!(out, "# HELP {} {}", family.name, escape_help(&family.help));
        let _ = writeln!(out, "# TYPE {} {}", family.name, family.kind);

        for sample in &family.samples {
            match &sample.value {
                SampleValue::Scalar(value) => {
                    let _ = writeln!(
                        out,
                        "{}{} {}",
                        family.name,
                        render_labels(&sample.labels, None),
                        format_value(*value)
                    );
                }
                SampleValue::Histogram(snapshot) => {
                    render_histogram(&mut out, &family.name, &sample.labels, snapshot);
                }
            }
        }
    }
    out
}

fn render_histogram(out: &mut String, name: &str, labels: &Labels, snapshot: &HistogramSnapshot) {
    for (bound, count) in &snapshot.buckets {
        let le = format_value(*bound);
        let _ = writeln!(out, "{name}_bucket{} {count}", render_labels(labels, Some(&le)));
    }
    let has_inf = snapshot
        .buckets
        .last()
        .is_some_and(|(bound, _)| bound.is_infinite() && bound.is_sign_positive());
    if !has_inf {
        let _ = writeln!(
            out,
            "{name}_bucket{} {}",
            render_labels(labels, Some("+Inf")),
            snapshot.count
        );
    }

    let plain = render_labels(labels, None);
    let _ = writeln!(out, "{name}_sum{plain} {}", format_value(snapshot.sum));
    let _ = writeln!(out, "{name}_count{plain} {}", snapshot.count);
}

/// Renders `{k="v",...}`, with an optional trailing `le` label.
fn render_labels(labels: &Labels, le: Option<&str>) -> String {
    if labels.is_empty() && le.is_none() {
        return String::new();
    }
    let mut parts: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{k}=\"{}\"", escape_label_value(v)))
        .collect();
    if let Some(le) = le {
        parts.push(format!("le=\"{le}\""));
    }
    format!("{{{}}}", parts.join(","))
}

/// Formats a sample value or bucket boundary.
///
/// Integral values print without a fractional part (`5`, not `5.0`).
#[must_use]
pub fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        "+Inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        value.to_string()
    }
}

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}
