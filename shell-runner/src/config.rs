use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use shell_exec::{DEFAULT_KILL_GRACE, DispatcherConfig, ExecutorConfig, KillPolicy, OutputMode};

use crate::error::{RunnerError, RunnerResult};

pub(crate) const DEFAULT_TIMEOUT_SECS: f64 = 10.0;
pub(crate) const DEFAULT_WORKERS: usize = shell_exec::DEFAULT_WORKERS;

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub defaults: Defaults,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Defaults {
    /// Per-command timeout in seconds (fractions allowed).
    pub timeout_secs: f64,
    pub workers: usize,
    /// Fold stderr into stdout.
    pub merge_output: bool,
    pub kill: KillPolicy,
    pub kill_grace_ms: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            workers: DEFAULT_WORKERS,
            merge_output: true,
            kill: KillPolicy::Kill,
            kill_grace_ms: u64::try_from(DEFAULT_KILL_GRACE.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// Load and validate a runner config from a YAML file.
pub async fn load(path: &Path) -> RunnerResult<RunnerConfig> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| RunnerError::Config(format!("read {}: {e}", path.display())))?;
    let config: RunnerConfig = serde_yaml_ng::from_str(&content)
        .map_err(|e| RunnerError::Config(format!("parse {}: {e}", path.display())))?;
    config.defaults.validate()?;
    Ok(config)
}

/// Load `path` if given, otherwise use built-in defaults.
pub async fn load_or_default(path: Option<&Path>) -> RunnerResult<RunnerConfig> {
    match path {
        Some(path) => load(path).await,
        None => Ok(RunnerConfig::default()),
    }
}

/// Convert a seconds value from the command line or config into a timeout.
pub fn timeout_from_secs(secs: f64) -> RunnerResult<Duration> {
    match Duration::try_from_secs_f64(secs) {
        Ok(d) if !d.is_zero() => Ok(d),
        _ => Err(RunnerError::Config(format!(
            "timeout must be a positive number of seconds, got {secs}"
        ))),
    }
}

impl Defaults {
    fn validate(&self) -> RunnerResult<()> {
        timeout_from_secs(self.timeout_secs)?;
        if self.workers == 0 {
            return Err(RunnerError::Config("workers must be at least 1".into()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> RunnerResult<Duration> {
        timeout_from_secs(self.timeout_secs)
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            output: if self.merge_output {
                OutputMode::Merged
            } else {
                OutputMode::Separate
            },
            kill: self.kill,
            kill_grace: Duration::from_millis(self.kill_grace_ms),
        }
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            workers: self.workers,
            executor: self.executor_config(),
        }
    }
}
