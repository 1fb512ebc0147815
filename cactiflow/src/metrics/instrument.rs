//! Wrappers that instrument a callable with metrics.

use super::types::{Counter, Histogram};
use std::sync::Arc;

/// Wraps `operation` so each call's wall time is observed into `histogram`.
pub fn track_duration<R, F>(histogram: Arc<Histogram>, mut operation: F) -> impl FnMut() -> R
where
    F: FnMut() -> R,
{
    move || {
        let _timer = histogram.start_timer();
        operation()
    }
}

/// Wraps a fallible `operation`, counting successes and failures.
pub fn track_outcome<T, E, F>(
    successes: Arc<Counter>,
    failures: Arc<Counter>,
    mut operation: F,
) -> impl FnMut() -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
{
    move || {
        let result = operation();
        match &result {
            Ok(_) => successes.inc(),
            Err(_) => failures.inc(),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::types::{Labels, DEFAULT_BUCKETS};

    #[test]
    fn test_track_duration_observes_each_call() {
        let hist = Arc::new(Histogram::new("h", "h", Labels::new(), DEFAULT_BUCKETS).unwrap());
        let mut timed = track_duration(hist.clone(), || "screenshot.png");

        assert_eq!(timed(), "screenshot.png");
        assert_eq!(timed(), "screenshot.png");
        assert_eq!(hist.count(), 2);
    }

    #[test]
    fn test_track_outcome_counts() {
        let ok = Arc::new(Counter::new("scraping_items_total", "ok", Labels::new()));
        let failed = Arc::new(Counter::new("scraping_errors_total", "err", Labels::new()));
        let mut calls = 0;
        let mut scrape = track_outcome(ok.clone(), failed.clone(), move || {
            calls += 1;
            if calls % 2 == 0 {
                Err("no data sources present")
            } else {
                Ok(calls)
            }
        });

        for _ in 0..5 {
            let _ = scrape();
        }
        assert!((ok.value() - 3.0).abs() < f64::EPSILON);
        assert!((failed.value() - 2.0).abs() < f64::EPSILON);
    }
}
