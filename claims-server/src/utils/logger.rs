//! Logging Infrastructure
//!
//! Structured logging setup. `RUST_LOG` controls the filter; the default
//! keeps the server at info and everything else at warn.

use tracing_subscriber::EnvFilter;

/// Initialize the logger
pub fn init_logger() {
    init_logger_with_level(None);
}

/// Initialize the logger with an explicit default filter
pub fn init_logger_with_level(default_filter: Option<&str>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(default_filter.unwrap_or("warn,claims_server=info,shared=info"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_target(false)
        .init();
}
