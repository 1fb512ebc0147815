//! Periodic progress snapshots pushed to subscribers.

use super::store::ProgressStore;
use crate::cancellation::CancellationToken;
use crate::errors::SubscriberDisconnected;
use crate::utils::generate_uuid;
use async_trait::async_trait;
use futures::Stream;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Default time between frames.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(500);

/// One serialized snapshot sent to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressFrame {
    /// Sequence number, starting at 0 for each subscriber.
    pub id: u64,
    /// The snapshot as JSON.
    pub data: String,
}

impl ProgressFrame {
    /// Renders the frame for an event-stream response body.
    #[must_use]
    pub fn to_event_stream(&self) -> String {
        format!("id: {}\ndata: {}\n\n", self.id, self.data)
    }
}

/// Destination for progress frames.
///
/// An error from `push` means the subscriber is gone and ends its loop.
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// Delivers one frame, waiting for the subscriber if needed.
    async fn push(&self, frame: ProgressFrame) -> Result<(), SubscriberDisconnected>;
}

#[async_trait]
impl FrameSink for mpsc::Sender<ProgressFrame> {
    async fn push(&self, frame: ProgressFrame) -> Result<(), SubscriberDisconnected> {
        self.send(frame).await.map_err(|_| SubscriberDisconnected)
    }
}

/// Streams [`ProgressStore`] snapshots on a fixed interval.
///
/// Each subscriber gets its own loop. There is no buffering or replay: a
/// subscriber only sees state from the moment it connects. Clones share the
/// stop signal.
#[derive(Debug, Clone)]
pub struct ProgressBroadcaster {
    store: Arc<ProgressStore>,
    interval: Duration,
    token: Arc<CancellationToken>,
}

impl ProgressBroadcaster {
    /// Creates a broadcaster with the default 500 ms interval.
    #[must_use]
    pub fn new(store: Arc<ProgressStore>) -> Self {
        Self {
            store,
            interval: DEFAULT_INTERVAL,
            token: Arc::new(CancellationToken::new()),
        }
    }

    /// Sets the time between frames.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Returns the time between frames.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns the store being broadcast.
    #[must_use]
    pub fn store(&self) -> &Arc<ProgressStore> {
        &self.store
    }

    /// Pushes snapshots into `sink` until it disconnects or the broadcaster
    /// is stopped. Returns the number of frames delivered.
    ///
    /// The first frame is sent immediately. Snapshots are copied under the
    /// store lock; waiting happens outside it.
    pub async fn run<S>(&self, sink: &S) -> u64
    where
        S: FrameSink + ?Sized,
    {
        let subscriber_id = generate_uuid();
        info!(
            subscriber_id = %subscriber_id,
            interval = ?self.interval,
            "Progress subscriber connected"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut sent = 0u64;

        loop {
            tokio::select! {
                biased;
                () = self.token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let data = match serde_json::to_string(&self.store.snapshot()) {
                Ok(data) => data,
                Err(e) => {
                    warn!(subscriber_id = %subscriber_id, error = %e, "Failed to serialize progress snapshot");
                    continue;
                }
            };

            let frame = ProgressFrame { id: sent, data };
            let delivered = tokio::select! {
                biased;
                () = self.token.cancelled() => break,
                result = sink.push(frame) => result.is_ok(),
            };
            if !delivered {
                break;
            }
            sent += 1;
        }

        debug!(
            subscriber_id = %subscriber_id,
            frames_sent = sent,
            stopped = self.token.is_cancelled(),
            "Progress subscriber loop finished"
        );
        sent
    }

    /// Starts a subscriber loop on the current tokio runtime and returns its
    /// frames as a stream.
    ///
    /// Dropping the stream disconnects the subscriber.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn subscribe(&self) -> impl Stream<Item = ProgressFrame> + Send + 'static {
        let (tx, rx) = mpsc::channel::<ProgressFrame>(1);
        let broadcaster = self.clone();
        tokio::spawn(async move {
            broadcaster.run(&tx).await;
        });

        futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|frame| (frame, rx))
        })
    }

    /// Ends every subscriber loop, current and future.
    pub fn stop(&self) {
        self.token.cancel("progress broadcaster stopped");
    }

    /// Returns whether [`stop`](Self::stop) has been called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}
