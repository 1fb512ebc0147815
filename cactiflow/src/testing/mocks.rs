//! Test doubles for sleepers and frame sinks.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;

use crate::errors::SubscriberDisconnected;
use crate::progress::{FrameSink, ProgressFrame};
use crate::resilience::Sleeper;

/// A sleeper that records requested delays and returns immediately.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    /// Creates a new recording sleeper.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the delays requested so far, in order.
    #[must_use]
    pub fn recorded(&self) -> Vec<Duration> {
        self.delays.lock().clone()
    }

    /// Returns the sum of the requested delays.
    #[must_use]
    pub fn total(&self) -> Duration {
        self.delays.lock().iter().sum()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.delays.lock().push(duration);
    }
}

/// A frame sink that keeps every frame it receives.
///
/// With a limit, the sink reports a disconnect once it holds that many
/// frames.
#[derive(Debug, Default)]
pub struct CollectingFrameSink {
    frames: Mutex<Vec<ProgressFrame>>,
    limit: Option<usize>,
}

impl CollectingFrameSink {
    /// Creates a sink that accepts every frame.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a sink that disconnects after `limit` frames.
    #[must_use]
    pub fn closing_after(limit: usize) -> Self {
        Self {
            frames: Mutex::new(Vec::new()),
            limit: Some(limit),
        }
    }

    /// Returns the frames received so far.
    #[must_use]
    pub fn frames(&self) -> Vec<ProgressFrame> {
        self.frames.lock().clone()
    }

    /// Returns the number of frames received.
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    /// Returns true if no frames have been received.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }
}

#[async_trait]
impl FrameSink for CollectingFrameSink {
    async fn push(&self, frame: ProgressFrame) -> Result<(), SubscriberDisconnected> {
        let mut frames = self.frames.lock();
        if self.limit.is_some_and(|limit| frames.len() >= limit) {
            return Err(SubscriberDisconnected);
        }
        frames.push(frame);
        Ok(())
    }
}
