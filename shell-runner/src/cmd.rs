mod batch;
mod run;

use std::process::ExitCode;
use std::time::Duration;

pub use batch::{BatchArgs, run_batch};
pub use run::{RunArgs, run_command};

use crate::config::{self, RunnerConfig};
use crate::error::RunnerResult;

/// Settings shared by every subcommand.
pub struct Context {
    pub config: RunnerConfig,
    pub json: bool,
}

impl Context {
    /// CLI timeout if given, otherwise the config default.
    fn timeout(&self, cli_secs: Option<f64>) -> RunnerResult<Duration> {
        match cli_secs {
            Some(secs) => config::timeout_from_secs(secs),
            None => self.config.defaults.timeout(),
        }
    }
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
