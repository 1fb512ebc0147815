//! Live status for long-running pipeline sections.
//!
//! [`ProgressStore`] holds the scraping and OCR records behind one lock and
//! only ever merges partial updates into them. [`ProgressBroadcaster`] polls
//! the store and pushes serialized snapshots to each subscriber.

mod broadcaster;
mod store;

pub use broadcaster::{FrameSink, ProgressBroadcaster, ProgressFrame, DEFAULT_INTERVAL};
pub use store::{
    default_progress, ProgressPatch, ProgressSnapshot, ProgressStatus, ProgressStore, Section,
    SectionProgress, DEFAULT_MESSAGE, DEFAULT_PROGRESS,
};
