//! Run coordination core
//!
//! Owns the single runner handle and the run configuration. Maps run
//! requests to module specs via the index resolver, applies the
//! focused-run coverage override, keeps the test-name filter from
//! leaking across requests, and surfaces every failure through the
//! observer collaborator without retrying.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::common::{Error, Result};
use crate::engine::{
    CancelToken, ConfigPatch, EngineEvent, EngineFactory, ModuleSpec, RunConfig, RunOutcome,
    RunnerHandle,
};
use crate::index::{module_specs_for, IndexResolver, TestIndexEntry};

use super::reconcile::reconcile;

/// Collaborator callbacks supplied at construction
pub trait RunObserver: Send + Sync {
    /// The initial runner exists; the coordinator accepts requests
    fn on_ready(&self);
    /// A failure surfaced; the coordinator does not retry on its own
    fn on_error(&self, message: &str, error: &Error);
    /// The run configuration changed (config patch or watch toggle)
    fn on_config_changed(&self, config: &RunConfig);
}

/// A request to run tests
///
/// `story_ids: None` runs everything; `Some(vec![])` runs exactly
/// nothing (valid, not an error); `Some(ids)` runs the matching subset.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub index_url: String,
    pub story_ids: Option<Vec<String>>,
}

/// Coordinator run state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// No run in flight
    Idle,
    /// A run is executing
    Running,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
        }
    }
}

/// Construction options
#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    /// Provider this coordinator serves; stamps logs and outbound events
    pub provider_id: String,
    /// Initial run configuration
    pub config: RunConfig,
}

/// The orchestration core
///
/// All operations take `&mut self`: the coordinator has a single owner
/// (the channel adapter's command task) and engine operations are
/// thereby serialized - a request arriving mid-run queues behind it.
pub struct RunCoordinator {
    provider_id: String,
    factory: Arc<dyn EngineFactory>,
    resolver: IndexResolver,
    observer: Arc<dyn RunObserver>,
    events: mpsc::UnboundedSender<EngineEvent>,
    /// Requested configuration. The runner fingerprint may differ while
    /// coverage is suspended for a focused run.
    config: RunConfig,
    runner: Option<RunnerHandle>,
    /// Coverage disabled for a focused run; restore is pending until the
    /// next full run or an explicit configuration change
    coverage_suspended: bool,
    /// A test-name filter is installed on the live engine
    name_filter: bool,
    state: RunState,
    cancel: CancelToken,
}

impl RunCoordinator {
    /// Create the coordinator and its initial runner
    ///
    /// Resolves only after the runner exists and `on_ready` has fired.
    pub async fn start(
        options: CoordinatorOptions,
        factory: Arc<dyn EngineFactory>,
        resolver: IndexResolver,
        observer: Arc<dyn RunObserver>,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> Result<Self> {
        let runner =
            match RunnerHandle::create(factory.as_ref(), options.config, events.clone()).await {
                Ok(runner) => runner,
                Err(e) => {
                    observer.on_error("Failed to create test runner", &e);
                    return Err(e);
                }
            };

        tracing::info!(
            provider_id = %options.provider_id,
            generation = runner.generation(),
            "Coordinator ready"
        );
        observer.on_ready();

        Ok(Self {
            provider_id: options.provider_id,
            factory,
            resolver,
            observer,
            events,
            config: options.config,
            runner: Some(runner),
            coverage_suspended: false,
            name_filter: false,
            state: RunState::Idle,
            cancel: CancelToken::new(),
        })
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn config(&self) -> RunConfig {
        self.config
    }

    /// Generation of the live runner, if any
    pub fn runner_generation(&self) -> Option<u64> {
        self.runner.as_ref().map(|r| r.generation())
    }

    /// Token used to cancel an in-flight run from another task
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Apply a partial configuration change
    ///
    /// Rebuilds the runner only when coverage or a11y changed; the
    /// updated configuration is emitted regardless.
    pub async fn handle_config_change(&mut self, patch: ConfigPatch) -> Result<()> {
        let desired = self.config.merged(&patch);
        tracing::debug!(?patch, ?desired, "Configuration change");
        self.config = desired;
        // An explicit change settles any pending coverage restore
        self.coverage_suspended = false;

        let fingerprint = match &self.runner {
            Some(runner) => runner.fingerprint(),
            None => return Err(self.surface(Error::NoActiveRunner, "Cannot apply configuration")),
        };

        let plan = reconcile(fingerprint, desired);
        if plan.rebuild {
            self.rebuild_runner(desired).await?;
        } else if let Some(watch) = plan.set_watch {
            let result = match self.runner.as_mut() {
                Some(runner) => runner.set_watch_mode(watch).await,
                None => Err(Error::NoActiveRunner),
            };
            if let Err(e) = result {
                return Err(self.surface(e, "Failed to toggle watch mode"));
            }
        }

        self.observer.on_config_changed(&self.config);
        Ok(())
    }

    /// Toggle watch mode on the live runner; never rebuilds
    pub async fn handle_watch_mode_request(&mut self, watch_mode: bool) -> Result<()> {
        tracing::debug!(watch_mode, "Watch mode request");
        self.config.watch_mode = watch_mode;

        let result = match self.runner.as_mut() {
            Some(runner) => runner.set_watch_mode(watch_mode).await,
            None => Err(Error::NoActiveRunner),
        };
        if let Err(e) = result {
            return Err(self.surface(e, "Failed to toggle watch mode"));
        }

        self.observer.on_config_changed(&self.config);
        Ok(())
    }

    /// Execute a run request
    pub async fn handle_run_request(&mut self, request: RunRequest) -> Result<()> {
        self.cancel.rearm();
        match request.story_ids {
            None => self.run_all().await,
            Some(ids) => self.run_filtered(&request.index_url, ids).await,
        }
    }

    /// Recover from a lifecycle failure: build a fresh runner from the
    /// current configuration
    pub async fn restart(&mut self) -> Result<()> {
        tracing::info!("Restarting test runner");
        self.coverage_suspended = false;
        self.rebuild_runner(self.config).await
    }

    /// Tear the coordinator down, closing the runner
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(runner) = self.runner.take() {
            runner.close().await?;
        }
        Ok(())
    }

    async fn run_all(&mut self) -> Result<()> {
        // Restore coverage left suspended by a focused run
        if self.coverage_suspended {
            tracing::debug!("Restoring coverage after focused run");
            self.rebuild_runner(self.config).await?;
            self.coverage_suspended = false;
        }

        let specs = match self.full_specs().await {
            Ok(specs) => specs,
            Err(e) => return Err(self.surface(e, "Failed to discover test modules")),
        };

        tracing::info!(modules = specs.len(), "Running full test suite");
        self.execute(&specs, true).await.map(|_| ())
    }

    async fn run_filtered(&mut self, index_url: &str, ids: Vec<String>) -> Result<()> {
        if ids.is_empty() {
            // A valid "run nothing" request
            tracing::info!("Running empty story selection");
            return self.execute(&[], true).await.map(|_| ());
        }

        let index = match self.resolver.resolve(index_url).await {
            Ok(index) => index,
            Err(e) => return Err(self.surface(e, "Failed to fetch test index")),
        };

        // Coverage instrumentation is incompatible with partial runs;
        // drop it for this run and restore at the next full run
        if self.config.coverage && !self.coverage_suspended {
            tracing::debug!("Suspending coverage for focused run");
            self.rebuild_runner(self.config.without_coverage()).await?;
            self.coverage_suspended = true;
        }

        let selected = index.select(&ids);
        let pattern = name_pattern(selected.iter().map(|e| e.name.as_str()));

        let specs = match self.filtered_specs(pattern.as_deref(), &selected).await {
            Ok(specs) => specs,
            Err(e) => return Err(self.surface(e, "Failed to prepare focused run")),
        };

        tracing::info!(
            stories = ids.len(),
            modules = specs.len(),
            "Running focused test selection"
        );
        self.execute(&specs, true).await.map(|_| ())
    }

    /// Clear a leaked name filter, refresh the module graph and glob the
    /// full spec set
    async fn full_specs(&mut self) -> Result<Vec<ModuleSpec>> {
        let runner = self.runner.as_mut().ok_or(Error::NoActiveRunner)?;
        if self.name_filter {
            runner.set_name_pattern(None).await?;
            self.name_filter = false;
        }
        runner.invalidate().await?;
        runner.glob_specs().await
    }

    /// Install the name filter and resolve the selected entries against
    /// the discovered modules
    async fn filtered_specs(
        &mut self,
        pattern: Option<&str>,
        selected: &[&TestIndexEntry],
    ) -> Result<Vec<ModuleSpec>> {
        let runner = self.runner.as_mut().ok_or(Error::NoActiveRunner)?;
        if let Some(pattern) = pattern {
            runner.set_name_pattern(Some(pattern)).await?;
            self.name_filter = true;
        }
        let discovered = runner.glob_specs().await?;
        Ok(module_specs_for(selected, &discovered))
    }

    /// Run the given specs, tracking run state
    async fn execute(&mut self, specs: &[ModuleSpec], update_snapshots: bool) -> Result<RunOutcome> {
        self.state = RunState::Running;
        let result = match self.runner.as_mut() {
            Some(runner) => runner.run_files(specs, update_snapshots, &self.cancel).await,
            None => Err(Error::NoActiveRunner),
        };
        self.state = RunState::Idle;

        match result {
            Ok(outcome) => {
                tracing::info!(
                    status = ?outcome.status,
                    passed = outcome.passed,
                    failed = outcome.failed,
                    "Run finished"
                );
                Ok(outcome)
            }
            Err(e) => Err(self.surface(e, "Test run failed")),
        }
    }

    /// Close the current runner (if any) and create one for `config`
    ///
    /// A close failure leaves the coordinator with no active runner; an
    /// explicit restart is required to recover.
    async fn rebuild_runner(&mut self, config: RunConfig) -> Result<()> {
        if let Some(runner) = self.runner.take() {
            let old_generation = runner.generation();
            if let Err(e) = runner.close().await {
                return Err(self.surface(e, "Failed to close test runner"));
            }
            tracing::debug!(old_generation, "Runner closed for rebuild");
        }

        let runner =
            match RunnerHandle::create(self.factory.as_ref(), config, self.events.clone()).await {
                Ok(runner) => runner,
                Err(e) => return Err(self.surface(e, "Failed to create test runner")),
            };

        // A fresh engine carries no name filter
        self.name_filter = false;
        self.runner = Some(runner);
        Ok(())
    }

    /// Report a failure through the observer and hand it back
    fn surface(&self, error: Error, message: &str) -> Error {
        tracing::error!(error = %error, "{}", message);
        self.observer.on_error(message, &error);
        error
    }
}

/// Build the engine test-name filter for a set of display names
///
/// Each name is anchored at both ends, so a single name `One` yields a
/// pattern matching exactly `One`. Returns `None` when there are no
/// names to match.
pub fn name_pattern<'a>(names: impl Iterator<Item = &'a str>) -> Option<String> {
    let parts: Vec<String> = names.map(|n| format!("^{}$", regex::escape(n))).collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("|"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_name_is_anchored() {
        assert_eq!(name_pattern(["One"].into_iter()).unwrap(), "^One$");
    }

    #[test]
    fn several_names_form_an_alternation() {
        assert_eq!(
            name_pattern(["One", "Two"].into_iter()).unwrap(),
            "^One$|^Two$"
        );
    }

    #[test]
    fn metacharacters_are_escaped() {
        assert_eq!(
            name_pattern(["With (Props)"].into_iter()).unwrap(),
            r"^With \(Props\)$"
        );
    }

    #[test]
    fn no_names_no_pattern() {
        assert_eq!(name_pattern(std::iter::empty()), None);
    }
}
