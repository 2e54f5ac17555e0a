//! storyrun - component test-run coordination daemon
//!
//! Sits between a design-tool add-on's message channel and an external
//! test-execution engine: owns a single long-lived engine instance,
//! rebuilds it only when construction-time options (coverage, a11y)
//! change, maps story selections to module runs, and publishes status
//! back over the channel.

pub mod channel;
pub mod common;
pub mod engine;
pub mod index;
pub mod manager;

// Re-export commonly used types
pub use common::{Error, Result};
pub use engine::{ModuleSpec, RunConfig, RunOutcome, RunStatus};
pub use manager::{RunCoordinator, RunRequest};
