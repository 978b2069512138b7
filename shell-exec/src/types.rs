use std::fmt;
use std::time::Duration;

use serde::{Serialize, Serializer};

use crate::error::{ExecError, Result};

/// A single command to run. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    argv: Vec<String>,
    timeout: Duration,
    stdin: Option<Vec<u8>>,
}

impl CommandRequest {
    /// Build a request from an already tokenized argv.
    pub fn new<I, S>(argv: I, timeout: Duration) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let argv: Vec<String> = argv.into_iter().map(Into::into).collect();
        if argv.is_empty() {
            return Err(ExecError::InvalidRequest("argv is empty".into()));
        }
        if timeout.is_zero() {
            return Err(ExecError::InvalidRequest("timeout must be positive".into()));
        }
        Ok(Self {
            argv,
            timeout,
            stdin: None,
        })
    }

    /// Split a command string with POSIX shell-word rules and build a request.
    ///
    /// Only quoting and escaping are interpreted; pipes, redirections and
    /// globs are passed to the program as literal arguments.
    pub fn parse(command: &str, timeout: Duration) -> Result<Self> {
        let argv = shell_words::split(command).map_err(|e| ExecError::Parse {
            command: command.to_string(),
            detail: e.to_string(),
        })?;
        Self::new(argv, timeout)
    }

    #[must_use]
    pub fn with_stdin(mut self, stdin: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or_default()
    }

    pub fn args(&self) -> &[String] {
        self.argv.get(1..).unwrap_or_default()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn stdin(&self) -> Option<&[u8]> {
        self.stdin.as_deref()
    }

    /// Shell-quoted rendering of argv.
    pub fn display(&self) -> String {
        shell_words::join(&self.argv)
    }
}

/// How a command run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Outcome {
    /// The process exited on its own. `code` is the exit code, or the negated
    /// signal number if a signal ended it.
    Completed { code: i32 },
    /// The executable could not be located or invoked.
    NotFound,
    /// The watchdog killed the process.
    TimedOut,
    /// The engine itself failed while running the command.
    InternalError,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed { code: 0 })
    }

    /// True when the engine could not run the command to completion, as
    /// opposed to the command itself reporting failure.
    pub fn is_engine_failure(&self) -> bool {
        !matches!(self, Self::Completed { .. })
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Completed { code } => Some(*code),
            _ => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed { code } => write!(f, "completed ({code})"),
            Self::NotFound => f.write_str("not found"),
            Self::TimedOut => f.write_str("timed out"),
            Self::InternalError => f.write_str("internal error"),
        }
    }
}

/// Result of one executor invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandResult {
    pub command: Vec<String>,
    pub pid: Option<u32>,
    pub outcome: Outcome,
    #[serde(serialize_with = "secs")]
    pub runtime: Option<Duration>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    /// Result for a command whose executable could not be started.
    pub(crate) fn not_found(command: Vec<String>, diagnostic: &str) -> Self {
        Self {
            command,
            pid: None,
            outcome: Outcome::NotFound,
            runtime: None,
            stdout: String::new(),
            stderr: diagnostic.to_string(),
        }
    }

    pub(crate) fn internal_error(
        command: Vec<String>,
        runtime: Option<Duration>,
        diagnostic: String,
    ) -> Self {
        Self {
            command,
            pid: None,
            outcome: Outcome::InternalError,
            runtime,
            stdout: String::new(),
            stderr: diagnostic,
        }
    }

    pub fn display_command(&self) -> String {
        shell_words::join(&self.command)
    }

    pub fn stdout_lines(&self) -> impl Iterator<Item = &str> {
        body_lines(&self.stdout)
    }

    pub fn stderr_lines(&self) -> impl Iterator<Item = &str> {
        body_lines(&self.stderr)
    }
}

fn body_lines(body: &str) -> impl Iterator<Item = &str> {
    // An empty body has no lines, not one empty line.
    body.split('\n').filter(move |_| !body.is_empty())
}

fn secs<S: Serializer>(runtime: &Option<Duration>, s: S) -> std::result::Result<S::Ok, S::Error> {
    match runtime {
        Some(d) => s.serialize_some(&d.as_secs_f64()),
        None => s.serialize_none(),
    }
}

/// An ordered set of commands for the dispatcher.
#[derive(Debug, Clone, Default)]
pub struct BatchRequest {
    pub requests: Vec<CommandRequest>,
    /// Per-request stdin payloads, parallel to `requests`. A `Some` entry
    /// replaces that request's own stdin.
    pub stdin: Option<Vec<Option<Vec<u8>>>>,
    /// Overrides the dispatcher's configured worker count for this batch.
    pub workers: Option<usize>,
}

impl BatchRequest {
    pub fn new(requests: Vec<CommandRequest>) -> Self {
        Self {
            requests,
            stdin: None,
            workers: None,
        }
    }

    /// Parse each command string with the same timeout.
    pub fn parse<I, S>(commands: I, timeout: Duration) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let requests = commands
            .into_iter()
            .map(|c| CommandRequest::parse(c.as_ref(), timeout))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(requests))
    }

    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    #[must_use]
    pub fn with_stdin(mut self, stdin: Vec<Option<Vec<u8>>>) -> Self {
        self.stdin = Some(stdin);
        self
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

/// Results in the same order as the submitted requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct BatchResult(Vec<CommandResult>);

impl BatchResult {
    pub(crate) fn from_ordered(results: Vec<CommandResult>) -> Self {
        Self(results)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&CommandResult> {
        self.0.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CommandResult> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[CommandResult] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<CommandResult> {
        self.0
    }
}

impl<'a> IntoIterator for &'a BatchResult {
    type Item = &'a CommandResult;
    type IntoIter = std::slice::Iter<'a, CommandResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
