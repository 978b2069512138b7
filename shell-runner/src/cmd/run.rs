use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Args;
use shell_exec::{CommandRequest, Executor};
use tracing::debug;

use super::{Context, exit_code};
use crate::error::{RunnerError, RunnerResult};
use crate::report;

#[derive(Args)]
pub struct RunArgs {
    /// Timeout in seconds (overrides the config file)
    #[arg(long)]
    timeout: Option<f64>,
    /// Feed this file to the command's stdin
    #[arg(long)]
    stdin_file: Option<PathBuf>,
    /// A single command string, or a program and its arguments
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

pub async fn run_command(args: RunArgs, ctx: &Context) -> RunnerResult<ExitCode> {
    let timeout = ctx.timeout(args.timeout)?;
    let mut request = build_request(&args.command, timeout)?;
    if let Some(path) = &args.stdin_file {
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| RunnerError::Input(format!("read {}: {e}", path.display())))?;
        request = request.with_stdin(data);
    }
    debug!(command = %request.display(), ?timeout, "running command");

    let executor = Executor::new(ctx.config.defaults.executor_config());
    let result = executor.run(&request).await;

    if ctx.json {
        println!("{}", report::to_json(&result)?);
    } else {
        print!("{}", report::render(&result));
    }
    Ok(exit_code(result.outcome.is_success()))
}

/// One argument is a command string to tokenize; several are argv as-is.
fn build_request(command: &[String], timeout: Duration) -> RunnerResult<CommandRequest> {
    let request = match command {
        [single] => CommandRequest::parse(single, timeout)?,
        argv => CommandRequest::new(argv, timeout)?,
    };
    Ok(request)
}
