//! Utility modules - logging and time helpers

pub mod logger;
pub mod time;

pub use logger::{init_logger, init_logger_with_level};
pub use time::{format_display_end, parse_end_expression};
