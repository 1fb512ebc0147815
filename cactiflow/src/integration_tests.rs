//! End-to-end tests composing retry, circuit breaking, metrics and progress.

#[cfg(test)]
mod tests {
    use crate::errors::{is_transient_error, BreakerError, RetryError};
    use crate::metrics::{MetricsRegistry, ResilienceMetrics};
    use crate::progress::{
        ProgressBroadcaster, ProgressPatch, ProgressSnapshot, ProgressStatus, ProgressStore,
        Section,
    };
    use crate::resilience::{BackoffPolicy, BreakerConfig, CircuitBreaker, CircuitState, RetryExecutor};
    use crate::testing::{
        assert_exhausted_after, assert_has_sample, assert_terminal, CollectingFrameSink,
        FlakyOperation, RecordingSleeper,
    };
    use crate::utils::now_utc;
    use std::io;
    use std::sync::Arc;
    use std::time::Duration;

    fn policy(max_attempts: u32) -> BackoffPolicy {
        BackoffPolicy::new()
            .with_max_attempts(max_attempts)
            .with_base_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(10))
            .with_jitter(false)
    }

    #[test]
    fn test_retry_through_breaker_recovers() {
        let registry = MetricsRegistry::new();
        let metrics = ResilienceMetrics::for_dependency(&registry, "dashboard").unwrap();
        let breaker = CircuitBreaker::new("dashboard", BreakerConfig::default())
            .with_metrics(metrics.clone());
        let sleeper = Arc::new(RecordingSleeper::new());
        let executor = RetryExecutor::new(policy(3))
            .with_sleeper(sleeper.clone())
            .with_metrics(metrics);

        let fetch = FlakyOperation::new(2, io::ErrorKind::TimedOut, "page loaded");
        let result = executor.execute(|| breaker.call(|| fetch.call().map_err(io::Error::from)));

        assert_eq!(result.ok(), Some("page loaded"));
        assert_eq!(fetch.calls(), 3);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
        assert_eq!(
            sleeper.recorded(),
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );

        let text = registry.format_text();
        assert_has_sample(&text, "retry_attempt_failures_total{dependency=\"dashboard\"} 2");
        assert_has_sample(&text, "retry_exhausted_total{dependency=\"dashboard\"} 0");
        assert_has_sample(&text, "circuit_breaker_state{dependency=\"dashboard\"} 0");
    }

    #[test]
    fn test_open_breaker_stops_retry_sequence() {
        let registry = MetricsRegistry::new();
        let metrics = ResilienceMetrics::for_dependency(&registry, "ocr").unwrap();
        let breaker = CircuitBreaker::new("ocr", BreakerConfig::new().with_failure_threshold(2))
            .with_metrics(metrics.clone());
        let executor = RetryExecutor::new(policy(5))
            .retry_if(|e: &BreakerError<io::Error>| !e.is_unavailable())
            .with_sleeper(Arc::new(RecordingSleeper::new()))
            .with_metrics(metrics);

        let ocr = FlakyOperation::always_failing(io::ErrorKind::ConnectionRefused, ());
        let result = executor.execute(|| breaker.call(|| ocr.call().map_err(io::Error::from)));

        assert_terminal(&result);
        assert!(matches!(
            result,
            Err(RetryError::Terminal(BreakerError::Unavailable(_)))
        ));
        assert_eq!(ocr.calls(), 2);
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.failure_count(), 2);

        let text = registry.format_text();
        assert_has_sample(&text, "circuit_breaker_opens_total{dependency=\"ocr\"} 1");
        assert_has_sample(&text, "circuit_breaker_rejections_total{dependency=\"ocr\"} 1");
        assert_has_sample(&text, "circuit_breaker_state{dependency=\"ocr\"} 1");
        assert_has_sample(&text, "retry_attempt_failures_total{dependency=\"ocr\"} 2");
    }

    #[test]
    fn test_transient_classification_with_anyhow() {
        let executor: RetryExecutor<anyhow::Error> = RetryExecutor::new(policy(3))
            .retry_if(is_transient_error)
            .with_sleeper(Arc::new(RecordingSleeper::new()));

        let refused = FlakyOperation::always_failing(io::ErrorKind::ConnectionRefused, ());
        let result = executor.execute(|| {
            refused
                .call()
                .map_err(|kind| anyhow::Error::new(io::Error::from(kind)).context("opening dashboard"))
        });
        assert_exhausted_after(&result, 3);
        assert_eq!(refused.calls(), 3);

        let denied = FlakyOperation::always_failing(io::ErrorKind::PermissionDenied, ());
        let result = executor.execute(|| denied.call().map_err(|kind| anyhow::Error::new(io::Error::from(kind))));
        assert_terminal(&result);
        assert_eq!(denied.calls(), 1);
    }

    #[test]
    fn test_retry_hook_reports_into_progress() {
        let store = Arc::new(ProgressStore::new());
        store.update(
            Section::Scraping,
            ProgressPatch::new()
                .status(ProgressStatus::Running)
                .total(4)
                .start_time(now_utc())
                .current_folder("output/2024-05-01"),
        );

        let hook_store = store.clone();
        let executor = RetryExecutor::new(policy(3))
            .with_sleeper(Arc::new(RecordingSleeper::new()))
            .on_retry(move |attempt, err: &String, delay| {
                hook_store.update(
                    Section::Scraping,
                    ProgressPatch::new()
                        .message(format!("Retry {attempt} after {err}, waiting {}s", delay.as_secs())),
                );
            });

        let capture = FlakyOperation::new(1, "timeout".to_string(), 1u64);
        let captured = executor.execute(|| capture.call()).unwrap();
        store.update(Section::Scraping, ProgressPatch::new().current(captured));

        let scraping = store.section(Section::Scraping);
        assert_eq!(scraping.message, "Retry 1 after timeout, waiting 1s");
        assert_eq!(scraping.current, 1);
        assert_eq!(scraping.total, 4);
        assert_eq!(scraping.status, ProgressStatus::Running);
        assert_eq!(scraping.current_folder, "output/2024-05-01");
        assert!(scraping.start_time.is_some());
    }

    #[tokio::test]
    async fn test_async_pipeline_streams_progress() {
        let store = Arc::new(ProgressStore::new());
        let broadcaster =
            ProgressBroadcaster::new(store.clone()).with_interval(Duration::from_millis(5));
        let breaker = CircuitBreaker::new("ocr", BreakerConfig::default());
        let executor = RetryExecutor::new(
            BackoffPolicy::new()
                .with_base_delay(Duration::from_millis(1))
                .with_jitter(false),
        );

        let files = ["user_01.png", "user_02.png", "user_03.png"];
        store.update(
            Section::Ocr,
            ProgressPatch::new()
                .status(ProgressStatus::Running)
                .total(files.len() as u64),
        );

        for (i, file) in files.iter().enumerate() {
            let ocr = FlakyOperation::new(1, io::ErrorKind::TimedOut, file.len());
            let chars = executor
                .execute_async(|| breaker.call_async(|| async { ocr.call().map_err(io::Error::from) }))
                .await
                .unwrap();
            assert_eq!(chars, 11);
            store.update(
                Section::Ocr,
                ProgressPatch::new().current(i as u64 + 1).current_file(*file),
            );
        }
        store.update(
            Section::Ocr,
            ProgressPatch::new()
                .status(ProgressStatus::Complete)
                .message("OCR finished"),
        );

        let sink = CollectingFrameSink::closing_after(2);
        let sent = tokio::time::timeout(Duration::from_secs(5), broadcaster.run(&sink))
            .await
            .unwrap();
        assert_eq!(sent, 2);

        let frames = sink.frames();
        assert_eq!(frames[0].id, 0);
        assert_eq!(frames[1].id, 1);
        let snapshot: ProgressSnapshot = serde_json::from_str(&frames[1].data).unwrap();
        assert_eq!(snapshot.ocr.status, ProgressStatus::Complete);
        assert_eq!(snapshot.ocr.current, 3);
        assert_eq!(snapshot.ocr.current_file, "user_03.png");
        assert_eq!(snapshot.scraping.status, ProgressStatus::Idle);
        assert!(frames[1].to_event_stream().starts_with("id: 1\ndata: {\"scraping\":"));
    }
}
