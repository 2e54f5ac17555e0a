//! Runner handle - owned lifecycle wrapper around one engine instance
//!
//! The engine interface boundary lives here: `TestEngine` is what the
//! coordinator needs from the external test-execution engine, and
//! `EngineFactory` builds a fresh instance whenever the configuration
//! fingerprint forces a rebuild.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::common::Result;

use super::types::{CancelToken, EngineEvent, ModuleSpec, RunConfig, RunOutcome};

/// Interface to the external test-execution engine
///
/// Coverage instrumentation and accessibility checks are configured at
/// construction time by the factory and cannot change on a live engine;
/// watch mode can.
#[async_trait]
pub trait TestEngine: Send {
    /// Discover all executable test modules
    async fn glob_test_specs(&mut self) -> Result<Vec<ModuleSpec>>;

    /// Execute the given modules
    ///
    /// Observes `cancel`; a cancelled run returns a `Cancelled` outcome
    /// rather than an error. Returning is the cancellation acknowledgment.
    async fn run_files(
        &mut self,
        specs: &[ModuleSpec],
        update_snapshots: bool,
        cancel: &CancelToken,
    ) -> Result<RunOutcome>;

    /// Restrict execution to test names matching `pattern`; `None` clears
    async fn set_name_pattern(&mut self, pattern: Option<&str>) -> Result<()>;

    /// Toggle file-watch listeners on the live engine
    async fn set_watch_mode(&mut self, enabled: bool) -> Result<()>;

    /// Drop cached modules so the next glob sees the current file set
    async fn invalidate(&mut self) -> Result<()>;

    /// Shut the engine down
    async fn close(&mut self) -> Result<()>;
}

/// Builds engine instances for a given run configuration
#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn create(
        &self,
        config: RunConfig,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> Result<Box<dyn TestEngine>>;
}

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// The single live engine instance owned by a coordinator
///
/// Carries the configuration fingerprint the engine was built with; the
/// reconciler compares incoming configuration against it to decide
/// between rebuild and in-place mutation. Watch mode is mutable in place,
/// so the fingerprint tracks its live value.
pub struct RunnerHandle {
    engine: Box<dyn TestEngine>,
    fingerprint: RunConfig,
    generation: u64,
}

impl RunnerHandle {
    /// Create a new runner for `config`
    pub async fn create(
        factory: &dyn EngineFactory,
        config: RunConfig,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> Result<Self> {
        let engine = factory.create(config, events).await?;
        let generation = NEXT_GENERATION.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(generation, ?config, "Test runner created");
        Ok(Self {
            engine,
            fingerprint: config,
            generation,
        })
    }

    /// Configuration the engine was constructed with (watch kept current)
    pub fn fingerprint(&self) -> RunConfig {
        self.fingerprint
    }

    /// Monotonic instance id, useful in logs and tests
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Close the engine, consuming the handle
    pub async fn close(mut self) -> Result<()> {
        tracing::debug!(generation = self.generation, "Closing test runner");
        self.engine.close().await
    }

    pub async fn glob_specs(&mut self) -> Result<Vec<ModuleSpec>> {
        self.engine.glob_test_specs().await
    }

    pub async fn run_files(
        &mut self,
        specs: &[ModuleSpec],
        update_snapshots: bool,
        cancel: &CancelToken,
    ) -> Result<RunOutcome> {
        self.engine.run_files(specs, update_snapshots, cancel).await
    }

    pub async fn set_name_pattern(&mut self, pattern: Option<&str>) -> Result<()> {
        self.engine.set_name_pattern(pattern).await
    }

    pub async fn set_watch_mode(&mut self, enabled: bool) -> Result<()> {
        self.engine.set_watch_mode(enabled).await?;
        self.fingerprint.watch_mode = enabled;
        Ok(())
    }

    pub async fn invalidate(&mut self) -> Result<()> {
        self.engine.invalidate().await
    }
}
