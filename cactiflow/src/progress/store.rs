//! Shared status for the scraping and OCR sections.

use crate::errors::ProgressError;
use crate::utils::Timestamp;
use parking_lot::Mutex;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};

/// Message every section starts with.
pub const DEFAULT_MESSAGE: &str = "Ready to start";

/// Process-wide progress store.
pub static DEFAULT_PROGRESS: LazyLock<Arc<ProgressStore>> =
    LazyLock::new(|| Arc::new(ProgressStore::new()));

/// Returns a handle to the process-wide progress store.
///
/// Pipelines that own their own store should pass it around instead.
pub fn default_progress() -> Arc<ProgressStore> {
    Arc::clone(&DEFAULT_PROGRESS)
}

/// A pipeline section that reports progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Section {
    /// Dashboard capture.
    Scraping,
    /// Text extraction from captured screenshots.
    Ocr,
}

impl Section {
    /// Both sections, in snapshot order.
    pub const ALL: [Self; 2] = [Self::Scraping, Self::Ocr];

    /// Returns the wire name of the section.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scraping => "scraping",
            Self::Ocr => "ocr",
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Section {
    type Err = ProgressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scraping" => Ok(Self::Scraping),
            "ocr" => Ok(Self::Ocr),
            other => Err(ProgressError::UnknownSection(other.to_string())),
        }
    }
}

/// Lifecycle status of a section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    /// Nothing has started.
    #[default]
    Idle,
    /// Work is in progress.
    Running,
    /// Finished successfully.
    Complete,
    /// Stopped on an error.
    Error,
}

/// The field set of one section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionProgress {
    /// Items processed so far.
    pub current: u64,
    /// Items expected in total.
    pub total: u64,
    /// Lifecycle status.
    pub status: ProgressStatus,
    /// Human-readable status line.
    pub message: String,
    /// File currently being processed.
    pub current_file: String,
    /// Output folder of the current run.
    pub current_folder: String,
    /// When the run started, at second precision.
    pub start_time: Option<Timestamp>,
    /// Number of accounts the run covers.
    pub usernames_count: u64,
}

impl Default for SectionProgress {
    fn default() -> Self {
        Self {
            current: 0,
            total: 0,
            status: ProgressStatus::Idle,
            message: DEFAULT_MESSAGE.to_string(),
            current_file: String::new(),
            current_folder: String::new(),
            start_time: None,
            usernames_count: 0,
        }
    }
}

/// A partial update: only fields that are set get merged.
///
/// The JSON form accepts the same field names as [`SectionProgress`];
/// `"start_time": null` clears the start time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProgressPatch {
    #[serde(default)]
    current: Option<u64>,
    #[serde(default)]
    total: Option<u64>,
    #[serde(default)]
    status: Option<ProgressStatus>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    current_file: Option<String>,
    #[serde(default)]
    current_folder: Option<String>,
    #[serde(default, deserialize_with = "present")]
    start_time: Option<Option<Timestamp>>,
    #[serde(default)]
    usernames_count: Option<u64>,
}

// Distinguishes an explicit `null` from a missing field.
fn present<'de, D>(deserializer: D) -> Result<Option<Option<Timestamp>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<Timestamp>::deserialize(deserializer).map(Some)
}

impl ProgressPatch {
    /// Creates an empty patch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `current`.
    #[must_use]
    pub const fn current(mut self, current: u64) -> Self {
        self.current = Some(current);
        self
    }

    /// Sets `total`.
    #[must_use]
    pub const fn total(mut self, total: u64) -> Self {
        self.total = Some(total);
        self
    }

    /// Sets `status`.
    #[must_use]
    pub const fn status(mut self, status: ProgressStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Sets `message`.
    #[must_use]
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Sets `current_file`.
    #[must_use]
    pub fn current_file(mut self, file: impl Into<String>) -> Self {
        self.current_file = Some(file.into());
        self
    }

    /// Sets `current_folder`.
    #[must_use]
    pub fn current_folder(mut self, folder: impl Into<String>) -> Self {
        self.current_folder = Some(folder.into());
        self
    }

    /// Sets `start_time`.
    #[must_use]
    pub const fn start_time(mut self, start: Timestamp) -> Self {
        self.start_time = Some(Some(start));
        self
    }

    /// Sets the start time back to unset.
    #[must_use]
    pub const fn clear_start_time(mut self) -> Self {
        self.start_time = Some(None);
        self
    }

    /// Sets `usernames_count`.
    #[must_use]
    pub const fn usernames_count(mut self, count: u64) -> Self {
        self.usernames_count = Some(count);
        self
    }

    /// Returns true when the patch sets no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    fn apply(self, target: &mut SectionProgress) {
        if let Some(v) = self.current {
            target.current = v;
        }
        if let Some(v) = self.total {
            target.total = v;
        }
        if let Some(v) = self.status {
            target.status = v;
        }
        if let Some(v) = self.message {
            target.message = v;
        }
        if let Some(v) = self.current_file {
            target.current_file = v;
        }
        if let Some(v) = self.current_folder {
            target.current_folder = v;
        }
        if let Some(v) = self.start_time {
            target.start_time = v;
        }
        if let Some(v) = self.usernames_count {
            target.usernames_count = v;
        }
    }
}

/// A consistent copy of both sections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Scraping section.
    pub scraping: SectionProgress,
    /// OCR section.
    pub ocr: SectionProgress,
}

impl ProgressSnapshot {
    /// Returns one section of the snapshot.
    #[must_use]
    pub const fn get(&self, section: Section) -> &SectionProgress {
        match section {
            Section::Scraping => &self.scraping,
            Section::Ocr => &self.ocr,
        }
    }

    fn get_mut(&mut self, section: Section) -> &mut SectionProgress {
        match section {
            Section::Scraping => &mut self.scraping,
            Section::Ocr => &mut self.ocr,
        }
    }
}

/// Thread-safe progress for both sections behind one lock.
///
/// Every merge, reset and copy takes the lock once and holds it only for
/// that operation, so a snapshot never mixes two updates.
#[derive(Debug, Default)]
pub struct ProgressStore {
    state: Mutex<ProgressSnapshot>,
}

impl ProgressStore {
    /// Creates a store with both sections idle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges the fields set in `patch` into `section`.
    pub fn update(&self, section: Section, patch: ProgressPatch) {
        patch.apply(self.state.lock().get_mut(section));
    }

    /// Parses a JSON object of fields and merges it into the named section.
    ///
    /// Unknown sections and unknown or mistyped fields are rejected without
    /// touching the store.
    pub fn update_json(&self, section: &str, patch: &serde_json::Value) -> Result<(), ProgressError> {
        let section: Section = section.parse()?;
        let patch = ProgressPatch::deserialize(patch)?;
        self.update(section, patch);
        Ok(())
    }

    /// Restores factory defaults for `section`.
    pub fn reset(&self, section: Section) {
        *self.state.lock().get_mut(section) = SectionProgress::default();
    }

    /// Restores factory defaults for both sections.
    pub fn reset_all(&self) {
        *self.state.lock() = ProgressSnapshot::default();
    }

    /// Copies both sections.
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.state.lock().clone()
    }

    /// Copies one section.
    pub fn section(&self, section: Section) -> SectionProgress {
        self.state.lock().get(section).clone()
    }
}
