//! Error types for the test-run coordinator
//!
//! Three failure families matter to the coordinator: index fetching
//! (surfaced, caller decides whether to retry), runner lifecycle
//! (coordinator drops to a no-active-runner state), and run execution
//! (surfaced, the next request may proceed).

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the coordinator daemon
#[derive(Error, Debug)]
pub enum Error {
    // === Index Resolution Errors ===
    #[error("Failed to fetch test index from {url}: {reason}")]
    IndexFetch { url: String, reason: String },

    // === Runner Lifecycle Errors ===
    #[error("Test runner '{name}' not found. Searched: {searched}")]
    RunnerNotFound { name: String, searched: String },

    #[error("Test runner failed to start: {0}")]
    EngineStartFailed(String),

    #[error("Test runner failed to shut down cleanly: {0}")]
    EngineCloseFailed(String),

    #[error("Test runner process exited unexpectedly")]
    EngineCrashed,

    #[error("No active test runner. A previous lifecycle failure requires an explicit restart")]
    NoActiveRunner,

    #[error("Test runner did not become ready within {0} seconds")]
    StartupTimeout(u64),

    // === Engine Protocol Errors ===
    #[error("Engine protocol error: {0}")]
    EngineProtocol(String),

    #[error("Engine request '{command}' failed: {message}")]
    EngineRequestFailed { command: String, message: String },

    // === Channel Errors ===
    #[error("Channel protocol error: {0}")]
    ChannelProtocol(String),

    #[error("Channel not reachable: {0}")]
    ChannelConnect(#[source] io::Error),

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an index fetch error from any displayable cause
    pub fn index_fetch(url: &str, reason: impl std::fmt::Display) -> Self {
        Self::IndexFetch {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create a runner not found error with search locations
    pub fn runner_not_found<S: AsRef<str>>(name: &str, searched: &[S]) -> Self {
        Self::RunnerNotFound {
            name: name.to_string(),
            searched: searched
                .iter()
                .map(|s| s.as_ref())
                .collect::<Vec<_>>()
                .join(", "),
        }
    }

    /// Create an engine request failed error
    pub fn engine_request_failed(command: &str, message: &str) -> Self {
        Self::EngineRequestFailed {
            command: command.to_string(),
            message: message.to_string(),
        }
    }
}

/// Channel-serializable error for outbound error messages
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ChannelError {
    pub code: String,
    pub message: String,
}

impl From<&Error> for ChannelError {
    fn from(e: &Error) -> Self {
        let code = match e {
            Error::IndexFetch { .. } => "INDEX_FETCH",
            Error::RunnerNotFound { .. }
            | Error::EngineStartFailed(_)
            | Error::EngineCloseFailed(_)
            | Error::StartupTimeout(_) => "ENGINE_LIFECYCLE",
            Error::EngineCrashed | Error::NoActiveRunner => "ENGINE_LIFECYCLE",
            Error::EngineProtocol(_) | Error::EngineRequestFailed { .. } => "RUN_EXECUTION",
            Error::ChannelProtocol(_) | Error::ChannelConnect(_) => "CHANNEL",
            Error::Config(_) | Error::ConfigParse(_) | Error::FileRead { .. } => "CONFIG",
            _ => "INTERNAL",
        }
        .to_string();

        Self {
            code,
            message: e.to_string(),
        }
    }
}
