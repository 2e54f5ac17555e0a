//! Test-execution engine client
//!
//! The engine is an external subprocess; this module owns the interface
//! boundary (traits), the wire client, and the runner-handle lifecycle
//! wrapper the coordinator works with.

pub mod codec;
pub mod process;
pub mod runner;
pub mod types;

pub use process::{ProcessEngine, ProcessEngineFactory};
pub use runner::{EngineFactory, RunnerHandle, TestEngine};
pub use types::{
    CancelToken, ConfigPatch, EngineEvent, ModuleSpec, RunConfig, RunOutcome, RunStatus,
    TestProgress,
};
