//! Cooperative cancellation.
//!
//! There is no way to abort an in-flight retry sequence from outside; the
//! retried operation checks a [`CancellationToken`] itself and fails with a
//! non-retryable error once it is set.

mod token;

pub use token::CancellationToken;
