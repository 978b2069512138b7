//! Bounded, order-preserving batch execution.
//!
//! Each request waits for a worker slot (a semaphore permit) before it is
//! handed to the executor, so its timeout only starts once it actually runs.
//! Results land in a slot vector indexed by submission order.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures_util::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::config::DispatcherConfig;
use crate::error::{ExecError, Result};
use crate::executor::{Execute, Executor};
use crate::types::{BatchRequest, BatchResult, CommandRequest, CommandResult, Outcome};

type Joined = std::result::Result<(usize, std::thread::Result<CommandResult>), JoinError>;

/// Runs batches of commands through at most `workers` concurrent executors.
pub struct Dispatcher<E: Execute = Executor> {
    executor: Arc<E>,
    workers: usize,
}

impl Dispatcher<Executor> {
    pub fn new(config: DispatcherConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            executor: Arc::new(Executor::new(config.executor)),
            workers: config.workers,
        })
    }
}

impl<E: Execute> Dispatcher<E> {
    pub fn with_executor(executor: E, workers: usize) -> Result<Self> {
        if workers == 0 {
            return Err(ExecError::InvalidConfig("workers must be at least 1".into()));
        }
        Ok(Self {
            executor: Arc::new(executor),
            workers,
        })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Run every request in `batch` and return results in submission order.
    ///
    /// Fails only if the batch is malformed, before anything is spawned.
    /// Individual command failures are reported in their results.
    pub async fn run(&self, batch: BatchRequest) -> Result<BatchResult> {
        let BatchRequest {
            requests,
            stdin,
            workers,
        } = batch;
        let workers = workers.unwrap_or(self.workers);
        if workers == 0 {
            return Err(ExecError::InvalidBatch("workers must be at least 1".into()));
        }
        let requests = attach_stdin(requests, stdin)?;
        if requests.is_empty() {
            return Ok(BatchResult::default());
        }
        let workers = workers.min(requests.len());

        let batch_id = Uuid::new_v4();
        let started = Instant::now();
        info!(%batch_id, commands = requests.len(), workers, "batch started");

        let commands: Vec<Vec<String>> = requests.iter().map(|r| r.argv().to_vec()).collect();
        let mut slots: Vec<Option<CommandResult>> = vec![None; requests.len()];
        let semaphore = Arc::new(Semaphore::new(workers));
        let mut jobs = JoinSet::new();

        for (index, request) in requests.into_iter().enumerate() {
            // Wait for a free worker, settling finished commands meanwhile.
            let permit = loop {
                tokio::select! {
                    permit = semaphore.clone().acquire_owned() => break permit,
                    Some(joined) = jobs.join_next(), if !jobs.is_empty() => {
                        place(&mut slots, &commands, joined);
                    }
                }
            };
            let permit = match permit {
                Ok(p) => p,
                Err(_) => {
                    error!(%batch_id, "semaphore closed unexpectedly");
                    break;
                }
            };

            debug!(%batch_id, index, "dispatching");
            let executor = Arc::clone(&self.executor);
            jobs.spawn(async move {
                let result = AssertUnwindSafe(executor.run(&request))
                    .catch_unwind()
                    .await;
                drop(permit);
                (index, result)
            });
        }

        while let Some(joined) = jobs.join_next().await {
            place(&mut slots, &commands, joined);
        }

        let results: Vec<CommandResult> = slots
            .into_iter()
            .zip(commands)
            .map(|(slot, command)| {
                slot.unwrap_or_else(|| {
                    CommandResult::internal_error(command, None, "command was not run".into())
                })
            })
            .collect();

        let summary = Summary::of(&results);
        info!(
            %batch_id,
            completed = summary.completed,
            not_found = summary.not_found,
            timed_out = summary.timed_out,
            internal_errors = summary.internal_errors,
            elapsed = ?started.elapsed(),
            "batch finished"
        );
        Ok(BatchResult::from_ordered(results))
    }
}

/// Store a finished job's result in its slot.
fn place(slots: &mut [Option<CommandResult>], commands: &[Vec<String>], joined: Joined) {
    let (index, result) = match joined {
        Ok(done) => done,
        Err(e) => {
            // Without the index the slot stays empty and is reported as not run.
            error!(error = %e, "worker task failed");
            return;
        }
    };
    let result = result.unwrap_or_else(|payload| {
        let message = panic_message(&*payload);
        error!(index, panic = %message, "executor panicked");
        let command = commands.get(index).cloned().unwrap_or_default();
        CommandResult::internal_error(command, None, format!("executor panicked: {message}"))
    });
    match slots.get_mut(index) {
        Some(slot) => *slot = Some(result),
        None => error!(index, "result index out of range"),
    }
}

fn attach_stdin(
    requests: Vec<CommandRequest>,
    stdin: Option<Vec<Option<Vec<u8>>>>,
) -> Result<Vec<CommandRequest>> {
    let Some(stdin) = stdin else {
        return Ok(requests);
    };
    if stdin.len() != requests.len() {
        return Err(ExecError::InvalidBatch(format!(
            "{} stdin payloads for {} commands",
            stdin.len(),
            requests.len()
        )));
    }
    Ok(requests
        .into_iter()
        .zip(stdin)
        .map(|(request, payload)| match payload {
            Some(payload) => request.with_stdin(payload),
            None => request,
        })
        .collect())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Outcome counts for a finished batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub completed: usize,
    pub not_found: usize,
    pub timed_out: usize,
    pub internal_errors: usize,
}

impl Summary {
    pub fn of<'a>(results: impl IntoIterator<Item = &'a CommandResult>) -> Self {
        results
            .into_iter()
            .fold(Self::default(), |mut summary, result| {
                match result.outcome {
                    Outcome::Completed { .. } => summary.completed += 1,
                    Outcome::NotFound => summary.not_found += 1,
                    Outcome::TimedOut => summary.timed_out += 1,
                    Outcome::InternalError => summary.internal_errors += 1,
                }
                summary
            })
    }
}
