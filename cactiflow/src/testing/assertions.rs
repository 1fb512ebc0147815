//! Assertions for exposition text and retry outcomes.

use crate::errors::RetryError;
use std::fmt::Debug;

/// Asserts that exposition text contains `line` as a complete line.
pub fn assert_has_sample(text: &str, line: &str) {
    assert!(
        text.lines().any(|l| l == line),
        "Expected exposition to contain line '{line}', got:\n{text}"
    );
}

/// Asserts that exposition text has no sample lines for `name`.
pub fn assert_no_samples(text: &str, name: &str) {
    let found: Vec<&str> = text
        .lines()
        .filter(|l| !l.starts_with('#'))
        .filter(|l| l.starts_with(name))
        .collect();
    assert!(found.is_empty(), "Expected no samples for '{name}', got: {found:?}");
}

/// Asserts that a retry sequence gave up after `attempts` attempts.
pub fn assert_exhausted_after<T: Debug, E: Debug>(result: &Result<T, RetryError<E>>, attempts: u32) {
    match result {
        Err(err) => assert_eq!(
            err.attempts(),
            Some(attempts),
            "Expected exhaustion after {attempts} attempts, got {err:?}"
        ),
        Ok(value) => panic!("Expected exhaustion after {attempts} attempts, got Ok({value:?})"),
    }
}

/// Asserts that a retry sequence stopped on a non-retryable error.
pub fn assert_terminal<T: Debug, E: Debug>(result: &Result<T, RetryError<E>>) {
    assert!(
        matches!(result, Err(RetryError::Terminal(_))),
        "Expected a terminal failure, got {result:?}"
    );
}
