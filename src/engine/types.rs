//! Engine-facing data types and wire message frames
//!
//! The external runner speaks a framed JSON protocol: seq-numbered
//! requests, responses matched by `requestSeq`, and unsolicited events
//! emitted while a run is in flight.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Notify;

/// Run configuration for the test runner
///
/// `coverage` and `a11y` are fixed at engine construction; changing them
/// requires a rebuild. `watch_mode` is mutable on a live engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunConfig {
    /// Re-run affected tests on file changes
    pub watch_mode: bool,
    /// Collect coverage during runs
    pub coverage: bool,
    /// Run accessibility checks alongside tests
    pub a11y: bool,
}

impl RunConfig {
    /// Apply a partial configuration change
    pub fn merged(&self, patch: &ConfigPatch) -> Self {
        Self {
            watch_mode: self.watch_mode,
            coverage: patch.coverage.unwrap_or(self.coverage),
            a11y: patch.a11y.unwrap_or(self.a11y),
        }
    }

    /// The same configuration with coverage forced off
    pub fn without_coverage(mut self) -> Self {
        self.coverage = false;
        self
    }
}

/// Partial configuration carried by a config-change request
///
/// Watch mode has its own request type and is not part of the patch.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub a11y: Option<bool>,
}

/// One resolvable test module, the unit of execution handed to the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleSpec {
    /// Project handle the module belongs to
    pub project: String,
    /// Absolute path of the test module
    pub module_id: PathBuf,
}

/// Terminal status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Passed,
    Failed,
    Cancelled,
}

/// Result of a `runFiles` request
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
    pub status: RunStatus,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Progress snapshot emitted during a run
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestProgress {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total: usize,
}

/// Events emitted by the engine while runs execute
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "body", rename_all = "camelCase")]
pub enum EngineEvent {
    RunStarted { total: usize },
    TestProgress(TestProgress),
    RunFinished(RunOutcome),
}

impl EngineEvent {
    /// Decode a wire event; unknown event names yield `None`
    pub fn from_wire(event: &str, body: Option<Value>) -> Option<Self> {
        let value = serde_json::json!({ "event": event, "body": body });
        serde_json::from_value(value).ok()
    }
}

/// Response frame from the runner
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireResponse {
    pub request_seq: u64,
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub body: Option<Value>,
}

/// Event frame from the runner
#[derive(Debug, Deserialize)]
pub struct WireEvent {
    pub event: String,
    #[serde(default)]
    pub body: Option<Value>,
}

/// Cooperative cancellation handle for in-flight runs
///
/// Cloneable; `cancel` may be called from any task. Long-running engine
/// operations observe the token and wind down, returning a cancelled
/// outcome as the acknowledgment.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of the current run
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Clear the token before starting a new run
    pub fn rearm(&self) {
        self.inner.cancelled.store(false, Ordering::SeqCst);
    }

    /// Wait until cancellation is requested
    pub async fn cancelled(&self) {
        loop {
            // Register interest before checking the flag so a concurrent
            // cancel() cannot slip between check and wait
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}
