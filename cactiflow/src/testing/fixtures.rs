//! Fixtures for exercising retry and breaker behavior.

use std::sync::atomic::{AtomicU32, Ordering};

/// An operation that fails a fixed number of times, then succeeds.
///
/// Stands in for a flaky network call, browser action or OCR request.
#[derive(Debug)]
pub struct FlakyOperation<T, E> {
    failures: u32,
    error: E,
    value: T,
    calls: AtomicU32,
}

impl<T: Clone, E: Clone> FlakyOperation<T, E> {
    /// Creates an operation that returns `error` for the first `failures`
    /// calls and `value` afterwards.
    pub fn new(failures: u32, error: E, value: T) -> Self {
        Self {
            failures,
            error,
            value,
            calls: AtomicU32::new(0),
        }
    }

    /// Creates an operation that never succeeds.
    pub fn always_failing(error: E, value: T) -> Self {
        Self::new(u32::MAX, error, value)
    }

    /// Invokes the operation.
    pub fn call(&self) -> Result<T, E> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= self.failures {
            Err(self.error.clone())
        } else {
            Ok(self.value.clone())
        }
    }

    /// Returns how many times the operation was invoked.
    #[must_use]
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}
