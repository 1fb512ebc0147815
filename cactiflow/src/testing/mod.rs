//! Testing utilities for code built on cactiflow.
//!
//! This module provides:
//! - A sleeper that records backoff delays instead of waiting
//! - A frame sink that collects progress frames
//! - A flaky operation fixture
//! - Assertions for exposition text and retry outcomes

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{assert_exhausted_after, assert_has_sample, assert_no_samples, assert_terminal};
pub use fixtures::FlakyOperation;
pub use mocks::{CollectingFrameSink, RecordingSleeper};
