//! Timestamp and UUID helpers.

mod timestamps;
mod uuid_utils;

pub use timestamps::{now_utc, Timestamp};
pub use uuid_utils::generate_uuid;
