//! Shared utilities for the Time Tokenizer workspace.

pub mod logging;
pub mod time;

pub use logging::init_tracing;
pub use time::format_duration;
