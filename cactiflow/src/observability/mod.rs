//! Logging setup.

mod logging;

pub use logging::{init_logging, LogFormat, DEFAULT_FILTER};
