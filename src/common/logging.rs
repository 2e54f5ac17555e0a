//! Logging and tracing configuration
//!
//! CLI commands log compactly to stderr; the daemon additionally logs
//! to a file since it runs in the background.

use std::path::PathBuf;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

use super::paths;

/// Initialize tracing for CLI commands (stderr only)
///
/// Controlled by `RUST_LOG`; defaults to INFO for this crate, WARN for
/// dependencies.
pub fn init_cli() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("storyrun=info,warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .init();
}

/// Initialize tracing for the daemon (file + stderr)
///
/// Defaults to DEBUG for this crate so engine wire traffic is captured.
/// Returns the log file path when file logging could be set up.
pub fn init_daemon() -> Option<PathBuf> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("storyrun=debug,info"));

    if let Some(log_dir) = paths::log_dir() {
        if std::fs::create_dir_all(&log_dir).is_ok() {
            let log_file = log_dir.join("daemon.log");

            match std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_file)
            {
                Ok(file) => {
                    let file_layer = fmt::layer()
                        .with_writer(file)
                        .with_ansi(false)
                        .with_target(true)
                        .with_thread_ids(true)
                        .with_file(true)
                        .with_line_number(true);

                    let stderr_layer = fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(true)
                        .with_thread_ids(false)
                        .with_file(false)
                        .compact();

                    tracing_subscriber::registry()
                        .with(filter)
                        .with(file_layer)
                        .with(stderr_layer)
                        .init();

                    return Some(log_file);
                }
                Err(e) => {
                    eprintln!("Warning: Could not open log file: {}", e);
                }
            }
        }
    }

    // Fallback: stderr only
    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(true),
        )
        .init();

    None
}
