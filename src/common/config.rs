//! Configuration file handling

use serde::Deserialize;
use std::path::PathBuf;

use super::paths::config_path;
use super::{Error, Result};

/// Runner binary searched on $PATH when none is configured
const DEFAULT_RUNNER_BIN: &str = "story-test-runner";

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// External test runner configuration
    #[serde(default)]
    pub runner: RunnerConfig,

    /// Initial run configuration
    #[serde(default)]
    pub defaults: Defaults,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Channel settings
    #[serde(default)]
    pub channel: ChannelConfig,
}

/// Configuration for the external test runner process
#[derive(Debug, Deserialize, Clone)]
pub struct RunnerConfig {
    /// Path to the runner executable; searched on $PATH when absent
    pub command: Option<PathBuf>,

    /// Additional arguments passed to the runner
    #[serde(default)]
    pub args: Vec<String>,

    /// Project handle stamped on module specs
    #[serde(default = "default_project")]
    pub project: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            project: default_project(),
        }
    }
}

fn default_project() -> String {
    "storybook".to_string()
}

/// Initial run configuration defaults
#[derive(Debug, Deserialize, Clone, Copy, Default)]
pub struct Defaults {
    /// Start in watch mode
    #[serde(default)]
    pub watch_mode: bool,

    /// Collect coverage
    #[serde(default)]
    pub coverage: bool,

    /// Run accessibility checks
    #[serde(default)]
    pub a11y: bool,
}

/// Timeout settings in seconds
///
/// Test runs themselves are unbounded; only engine startup and small
/// control requests carry a deadline.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct Timeouts {
    /// Timeout for spawning and configuring the runner
    #[serde(default = "default_engine_start")]
    pub engine_start_secs: u64,

    /// Timeout for control requests (glob, filters, watch toggles)
    #[serde(default = "default_engine_request")]
    pub engine_request_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            engine_start_secs: default_engine_start(),
            engine_request_secs: default_engine_request(),
        }
    }
}

fn default_engine_start() -> u64 {
    30
}
fn default_engine_request() -> u64 {
    60
}

/// Channel settings
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ChannelConfig {
    /// Socket name override; platform default when absent
    pub socket: Option<String>,
}

/// A runner binary resolved to a concrete path
#[derive(Debug, Clone)]
pub struct ResolvedRunner {
    pub path: PathBuf,
    pub args: Vec<String>,
    pub project: String,
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if the file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = config_path() {
            if path.exists() {
                return Self::load_from(&path);
            }
        }
        Ok(Self::default())
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        toml::from_str(&content).map_err(|e| Error::ConfigParse(e.to_string()))
    }

    /// Resolve the runner binary
    ///
    /// Falls back to searching $PATH when no command is configured
    pub fn resolve_runner(&self) -> Result<ResolvedRunner> {
        if let Some(command) = &self.runner.command {
            return Ok(ResolvedRunner {
                path: command.clone(),
                args: self.runner.args.clone(),
                project: self.runner.project.clone(),
            });
        }

        let path = which::which(DEFAULT_RUNNER_BIN)
            .map_err(|_| Error::runner_not_found(DEFAULT_RUNNER_BIN, &["$PATH"]))?;
        Ok(ResolvedRunner {
            path,
            args: self.runner.args.clone(),
            project: self.runner.project.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_missing_sections() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.timeouts.engine_start_secs, 30);
        assert_eq!(config.runner.project, "storybook");
        assert!(!config.defaults.coverage);
    }

    #[test]
    fn load_from_reads_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[timeouts]\nengine_start_secs = 5\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.timeouts.engine_start_secs, 5);

        let missing = Config::load_from(&dir.path().join("absent.toml"));
        assert!(matches!(missing, Err(Error::FileRead { .. })));
    }

    #[test]
    fn runner_section_parses() {
        let config: Config = toml::from_str(
            r#"
[runner]
command = "/usr/local/bin/test-runner"
args = ["--quiet"]
project = "design-system"

[defaults]
coverage = true
"#,
        )
        .unwrap();

        let runner = config.resolve_runner().unwrap();
        assert_eq!(runner.path, PathBuf::from("/usr/local/bin/test-runner"));
        assert_eq!(runner.args, vec!["--quiet".to_string()]);
        assert_eq!(runner.project, "design-system");
        assert!(config.defaults.coverage);
    }
}
