use std::path::PathBuf;
use std::process::ExitCode;

use clap::Args;
use shell_exec::{BatchRequest, Dispatcher, Summary};
use tracing::debug;

use super::{Context, exit_code};
use crate::command_list;
use crate::error::{RunnerError, RunnerResult};
use crate::report;

#[derive(Args)]
pub struct BatchArgs {
    /// Per-command timeout in seconds (overrides the config file)
    #[arg(long)]
    timeout: Option<f64>,
    /// Maximum number of commands running at once
    #[arg(long, short)]
    workers: Option<usize>,
    /// Read additional commands from a file, one per line
    #[arg(long, short)]
    file: Option<PathBuf>,
    /// Command strings, run after any from --file
    commands: Vec<String>,
}

pub async fn run_batch(args: BatchArgs, ctx: &Context) -> RunnerResult<ExitCode> {
    let timeout = ctx.timeout(args.timeout)?;

    let mut dispatcher_config = ctx.config.defaults.dispatcher_config();
    if let Some(workers) = args.workers {
        if workers == 0 {
            return Err(RunnerError::Config("workers must be at least 1".into()));
        }
        dispatcher_config.workers = workers;
    }

    let commands = collect_commands(args.file.as_deref(), args.commands).await?;
    if commands.is_empty() {
        return Err(RunnerError::Input("no commands given".into()));
    }

    debug!(
        commands = commands.len(),
        workers = dispatcher_config.workers,
        ?timeout,
        "running batch"
    );
    let batch = BatchRequest::parse(&commands, timeout)?;
    let dispatcher = Dispatcher::new(dispatcher_config)?;
    let results = dispatcher.run(batch).await?;

    if ctx.json {
        println!("{}", report::to_json(&results)?);
    } else {
        print!("{}", report::render_batch(&results));
        println!("\n{}", report::render_summary(&Summary::of(&results)));
    }
    Ok(exit_code(results.iter().all(|r| r.outcome.is_success())))
}

/// File commands come first, then positional ones.
async fn collect_commands(
    file: Option<&std::path::Path>,
    positional: Vec<String>,
) -> RunnerResult<Vec<String>> {
    let mut commands = match file {
        Some(path) => command_list::load(path).await?,
        None => Vec::new(),
    };
    commands.extend(positional);
    Ok(commands)
}
