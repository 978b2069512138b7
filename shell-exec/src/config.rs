use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ExecError, Result};

pub const DEFAULT_WORKERS: usize = 4;
/// How long to wait for a killed process group to release its pipes.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(2);

/// Where the child's stderr goes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// Capture stdout and stderr separately.
    #[default]
    Separate,
    /// Bind stdout and stderr to one pipe; the merged text lands in
    /// `CommandResult::stdout`.
    Merged,
}

/// How the watchdog terminates a command that exceeded its timeout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum KillPolicy {
    /// SIGKILL the process group immediately.
    #[default]
    Kill,
    /// SIGTERM the process group, then SIGKILL it if it has not settled
    /// within `grace`.
    Terminate {
        #[serde(with = "millis")]
        grace: Duration,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub output: OutputMode,
    pub kill: KillPolicy,
    #[serde(with = "millis")]
    pub kill_grace: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            output: OutputMode::Separate,
            kill: KillPolicy::Kill,
            kill_grace: DEFAULT_KILL_GRACE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Maximum number of commands in flight.
    pub workers: usize,
    pub executor: ExecutorConfig,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            executor: ExecutorConfig::default(),
        }
    }
}

impl DispatcherConfig {
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(ExecError::InvalidConfig("workers must be at least 1".into()));
        }
        Ok(())
    }
}

/// Durations are written as integer milliseconds in config files.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = DispatcherConfig::default();
        assert_eq!(config.workers, 4);
        assert_eq!(config.executor.output, OutputMode::Separate);
        assert_eq!(config.executor.kill, KillPolicy::Kill);
        assert_eq!(config.executor.kill_grace, Duration::from_secs(2));
    }

    #[test]
    fn zero_workers_rejected() {
        let config = DispatcherConfig {
            workers: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ExecError::InvalidConfig(_))));
    }

    #[test]
    fn terminate_policy_from_json() {
        let config: ExecutorConfig = serde_json::from_str(
            r#"{"output":"merged","kill":{"mode":"terminate","grace":250},"kill_grace":500}"#,
        )
        .unwrap();
        assert_eq!(config.output, OutputMode::Merged);
        assert_eq!(
            config.kill,
            KillPolicy::Terminate {
                grace: Duration::from_millis(250)
            }
        );
        assert_eq!(config.kill_grace, Duration::from_millis(500));
    }

    #[test]
    fn missing_fields_use_defaults() {
        let config: DispatcherConfig = serde_json::from_str(r#"{"workers":8}"#).unwrap();
        assert_eq!(config.workers, 8);
        assert_eq!(config.executor, ExecutorConfig::default());
    }
}
