//! Timestamp helpers.

use chrono::{DateTime, SubsecRound, Utc};

/// Represents a timestamp that can be serialized/deserialized.
pub type Timestamp = DateTime<Utc>;

/// Returns the current UTC time truncated to whole seconds.
///
/// Progress start times are reported at second precision.
#[must_use]
pub fn now_utc() -> Timestamp {
    Utc::now().trunc_subsecs(0)
}
