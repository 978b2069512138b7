//! Single-command execution with a timeout watchdog.
//!
//! Two things are tracked separately for every command: the exit of the
//! child itself and end-of-stream on every captured pipe (with the stdin
//! payload delivered). A command *settles* once both are done. Settlement
//! races a timer armed for the request's timeout:
//!
//! - the child is still running when the timer fires: its process group is
//!   terminated, whatever output already arrived is kept and the result is
//!   `TimedOut`;
//! - the child already exited but a descendant still holds its pipes: the
//!   group is killed to release them and the result is `Completed` with the
//!   child's own exit status.

use std::future::Future;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::pipe;
use tokio::process::{Child, ChildStdin, Command};
use tracing::{debug, warn};

use crate::config::{ExecutorConfig, KillPolicy, OutputMode};
use crate::normalize::normalize_bytes;
use crate::types::{CommandRequest, CommandResult, Outcome};

pub(crate) const NOT_FOUND_MESSAGE: &str = "command not found";
pub(crate) const TIMEOUT_MARKER: &str = "command timed out";

/// Maximum length for command preview in logs
const COMMAND_PREVIEW_MAX_LEN: usize = 100;

/// Runs one command to a terminal [`Outcome`].
///
/// Implementations never fail: every failure mode is encoded in the returned
/// result. The dispatcher is generic over this trait.
#[async_trait]
pub trait Execute: Send + Sync + 'static {
    async fn run(&self, request: &CommandRequest) -> CommandResult;
}

/// Executes commands as local child processes.
#[derive(Debug, Clone, Default)]
pub struct Executor {
    config: ExecutorConfig,
}

struct Spawned {
    child: Child,
    merged: Option<pipe::Receiver>,
    started: Instant,
}

/// Everything read from or written to the child's pipes.
struct Streams {
    stdin: io::Result<()>,
    stdout: io::Result<Vec<u8>>,
    stderr: io::Result<Vec<u8>>,
    merged: io::Result<Vec<u8>>,
}

#[derive(Default)]
struct Capture {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl Streams {
    fn failed(&self) -> bool {
        self.stdin.is_err() || self.stdout.is_err() || self.stderr.is_err() || self.merged.is_err()
    }

    fn into_capture(self) -> io::Result<Capture> {
        self.stdin?;
        let mut stdout = self.stdout?;
        let stderr = self.stderr?;
        // At most one of the stdout pipe and the merged pipe is in use.
        stdout.extend(self.merged?);
        Ok(Capture { stdout, stderr })
    }
}

/// What has finished so far for one command.
#[derive(Default)]
struct Progress {
    status: Option<io::Result<ExitStatus>>,
    exited_at: Option<Instant>,
    streams: Option<Streams>,
}

impl Progress {
    /// The child has not been reaped, so its pid still names its process
    /// group and signalling the group cannot reach an unrelated one.
    fn leader_unreaped(&self) -> bool {
        self.status.is_none()
    }
}

enum Race {
    Settled,
    Faulted,
    Expired,
}

impl Executor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    /// Run `request` to completion or forced termination.
    pub async fn run(&self, request: &CommandRequest) -> CommandResult {
        let command = request.argv().to_vec();
        let preview = truncate_preview(&request.display());

        let Spawned {
            mut child,
            merged,
            started,
        } = match self.spawn(request) {
            Ok(spawned) => spawned,
            Err(e) if is_not_found(&e) => {
                debug!(command = %preview, error = %e, "executable not found");
                return self.route(CommandResult::not_found(command, NOT_FOUND_MESSAGE));
            }
            Err(e) => {
                warn!(command = %preview, error = %e, "spawn failed");
                return self.route(CommandResult::internal_error(
                    command,
                    None,
                    format!("spawn failed: {e}"),
                ));
            }
        };

        let pid = child.id();
        debug!(pid, command = %preview, timeout = ?request.timeout(), "spawned");

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let payload = request.stdin();

        let wait = child.wait();
        let streams = async {
            let (stdin, stdout, stderr, merged) = tokio::join!(
                feed(stdin, payload),
                drain(stdout),
                drain(stderr),
                drain(merged),
            );
            Streams {
                stdin,
                stdout,
                stderr,
                merged,
            }
        };
        tokio::pin!(wait, streams);

        let mut progress = Progress::default();
        match drive(
            wait.as_mut(),
            streams.as_mut(),
            &mut progress,
            request.timeout(),
        )
        .await
        {
            Race::Settled => {}
            Race::Faulted => {
                if progress.leader_unreaped() {
                    signal_group(pid, Signal::SIGKILL);
                    if let Ok(status) =
                        tokio::time::timeout(self.config.kill_grace, wait.as_mut()).await
                    {
                        progress.status = Some(status);
                    }
                }
            }
            Race::Expired if progress.leader_unreaped() => {
                warn!(pid, command = %preview, timeout = ?request.timeout(), "command timed out, terminating");
                self.terminate(pid, wait.as_mut(), streams.as_mut(), &mut progress)
                    .await;
                return self.timed_out(command, pid, started.elapsed(), progress.streams);
            }
            Race::Expired => {
                // Exited on its own; descendants in its group hold the pipes.
                warn!(pid, command = %preview, "command exited but its output stayed open, killing its process group");
                signal_group(pid, Signal::SIGKILL);
                drive(
                    wait.as_mut(),
                    streams.as_mut(),
                    &mut progress,
                    self.config.kill_grace,
                )
                .await;
            }
        }

        let runtime = progress
            .exited_at
            .map_or_else(|| started.elapsed(), |at| at.duration_since(started));
        self.finished(command, pid, runtime, progress.status, progress.streams)
    }

    fn spawn(&self, request: &CommandRequest) -> io::Result<Spawned> {
        let mut cmd = Command::new(request.program());
        cmd.args(request.args())
            .stdin(if request.stdin().is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            // Own process group so the watchdog reaches every descendant.
            .process_group(0)
            .kill_on_drop(true);

        let merged = match self.config.output {
            OutputMode::Separate => {
                cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
                None
            }
            OutputMode::Merged => {
                let (sender, receiver) = pipe::pipe()?;
                let writer = sender.into_blocking_fd()?;
                cmd.stdout(Stdio::from(writer.try_clone()?))
                    .stderr(Stdio::from(writer));
                Some(receiver)
            }
        };

        let started = Instant::now();
        let child = cmd.spawn()?;
        // `cmd` owns the parent's copies of the merged write end; the reader
        // only sees EOF once they are closed.
        drop(cmd);
        Ok(Spawned {
            child,
            merged,
            started,
        })
    }

    /// Stop the process group after the timeout and wait a bounded time for
    /// the command to settle.
    async fn terminate<W, S>(
        &self,
        pid: Option<u32>,
        mut wait: Pin<&mut W>,
        mut streams: Pin<&mut S>,
        progress: &mut Progress,
    ) where
        W: Future<Output = io::Result<ExitStatus>>,
        S: Future<Output = Streams>,
    {
        if let KillPolicy::Terminate { grace } = self.config.kill {
            signal_group(pid, Signal::SIGTERM);
            if let Race::Settled = drive(wait.as_mut(), streams.as_mut(), progress, grace).await {
                return;
            }
            debug!(pid, "process group ignored SIGTERM, escalating");
        }
        signal_group(pid, Signal::SIGKILL);
        if let Race::Expired = drive(wait, streams, progress, self.config.kill_grace).await {
            warn!(pid, grace = ?self.config.kill_grace, "killed command did not release its output");
        }
    }

    /// Classify a command the timer did not cut short.
    ///
    /// `streams` is `None` when the pipes never reached end-of-stream; the
    /// output is then reported empty.
    fn finished(
        &self,
        command: Vec<String>,
        pid: Option<u32>,
        runtime: Duration,
        status: Option<io::Result<ExitStatus>>,
        streams: Option<Streams>,
    ) -> CommandResult {
        let settled = streams
            .map_or_else(|| Ok(Capture::default()), Streams::into_capture)
            .and_then(|capture| {
                let status =
                    status.unwrap_or_else(|| Err(io::Error::other("process did not exit")))?;
                Ok((status, capture))
            });

        match settled {
            Ok((status, capture)) => {
                let code = exit_code(status);
                debug!(pid, code, ?runtime, "command completed");
                self.route(CommandResult {
                    command,
                    pid,
                    outcome: Outcome::Completed { code },
                    runtime: Some(runtime),
                    stdout: normalize_bytes(&capture.stdout),
                    stderr: normalize_bytes(&capture.stderr),
                })
            }
            Err(e) => {
                warn!(pid, error = %e, "output capture failed");
                self.route(CommandResult::internal_error(
                    command,
                    Some(runtime),
                    format!("output capture failed: {e}"),
                ))
            }
        }
    }

    fn timed_out(
        &self,
        command: Vec<String>,
        pid: Option<u32>,
        runtime: Duration,
        streams: Option<Streams>,
    ) -> CommandResult {
        // Capture faults after a kill do not change the outcome.
        let capture = streams
            .and_then(|s| s.into_capture().ok())
            .unwrap_or_default();
        let mut stderr = normalize_bytes(&capture.stderr);
        append_line(&mut stderr, TIMEOUT_MARKER);
        self.route(CommandResult {
            command,
            pid,
            outcome: Outcome::TimedOut,
            runtime: Some(runtime),
            stdout: normalize_bytes(&capture.stdout),
            stderr,
        })
    }

    /// In merged mode there is a single body, so diagnostics join stdout.
    fn route(&self, mut result: CommandResult) -> CommandResult {
        if self.config.output == OutputMode::Merged && !result.stderr.is_empty() {
            let diagnostic = std::mem::take(&mut result.stderr);
            append_line(&mut result.stdout, &diagnostic);
        }
        result
    }
}

#[async_trait]
impl Execute for Executor {
    async fn run(&self, request: &CommandRequest) -> CommandResult {
        Executor::run(self, request).await
    }
}

/// Poll the child and its streams until both finish, a stream fails or
/// `limit` passes. Results accumulate in `progress` across calls.
async fn drive<W, S>(
    mut wait: Pin<&mut W>,
    mut streams: Pin<&mut S>,
    progress: &mut Progress,
    limit: Duration,
) -> Race
where
    W: Future<Output = io::Result<ExitStatus>>,
    S: Future<Output = Streams>,
{
    let deadline = tokio::time::sleep(limit);
    tokio::pin!(deadline);
    loop {
        if progress.streams.as_ref().is_some_and(Streams::failed) {
            return Race::Faulted;
        }
        if progress.status.is_some() && progress.streams.is_some() {
            return Race::Settled;
        }
        tokio::select! {
            status = wait.as_mut(), if progress.status.is_none() => {
                progress.status = Some(status);
                progress.exited_at = Some(Instant::now());
            }
            done = streams.as_mut(), if progress.streams.is_none() => {
                progress.streams = Some(done);
            }
            () = &mut deadline => return Race::Expired,
        }
    }
}

/// Write the stdin payload, then close the pipe.
async fn feed(stdin: Option<ChildStdin>, payload: Option<&[u8]>) -> io::Result<()> {
    let (Some(mut stdin), Some(payload)) = (stdin, payload) else {
        return Ok(());
    };
    match stdin.write_all(payload).await {
        // The child exited or closed its stdin without reading everything.
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        other => other,
    }
}

async fn drain<R: AsyncRead + Unpin>(reader: Option<R>) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        reader.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

/// Send `signal` to the process group led by `pid`. A group that already
/// exited is not an error.
fn signal_group(pid: Option<u32>, signal: Signal) {
    let Some(pgid) = pid.and_then(|p| i32::try_from(p).ok()) else {
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(pgid), signal) {
        debug!(pid = pgid, signal = signal.as_str(), error = %e, "signal not delivered");
    }
}

fn is_not_found(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
    )
}

/// Exit code, or the negated signal number for signal-terminated children.
fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|sig| -sig))
        .unwrap_or(-1)
}

fn append_line(body: &mut String, line: &str) {
    if !body.is_empty() {
        body.push('\n');
    }
    body.push_str(line);
}

/// Truncate a command string for logging, preserving UTF-8 boundaries
fn truncate_preview(s: &str) -> String {
    if s.len() <= COMMAND_PREVIEW_MAX_LEN {
        return s.to_string();
    }
    let end = s
        .char_indices()
        .take_while(|(i, _)| *i < COMMAND_PREVIEW_MAX_LEN)
        .last()
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(COMMAND_PREVIEW_MAX_LEN);
    format!("{}...", s.get(..end).unwrap_or(s))
}

/// Slack allowed between a timeout and the moment a killed command is
/// reported, in tests.
#[cfg(test)]
pub(crate) const KILL_SLACK: Duration = Duration::from_secs(2);
