//! Run external commands with per-command timeouts.
//!
//! [`Executor`] runs one [`CommandRequest`] to a terminal [`Outcome`]:
//! completion, missing executable, timeout or an internal fault. It never
//! returns an error. [`Dispatcher`] runs a [`BatchRequest`] through a bounded
//! pool of workers and returns results in submission order.
//!
//! ```no_run
//! # async fn demo() -> shell_exec::Result<()> {
//! use std::time::Duration;
//! use shell_exec::{BatchRequest, Dispatcher, DispatcherConfig};
//!
//! let dispatcher = Dispatcher::new(DispatcherConfig::default())?;
//! let batch = BatchRequest::parse(["echo ok", "sleep 5"], Duration::from_secs(1))?;
//! for result in &dispatcher.run(batch).await? {
//!     println!("{}: {}", result.display_command(), result.outcome);
//! }
//! # Ok(())
//! # }
//! ```

mod config;
mod dispatcher;
mod error;
mod executor;
mod normalize;
mod types;

pub use config::{
    DEFAULT_KILL_GRACE, DEFAULT_WORKERS, DispatcherConfig, ExecutorConfig, KillPolicy, OutputMode,
};
pub use dispatcher::{Dispatcher, Summary};
pub use error::{ExecError, Result};
pub use executor::{Execute, Executor};
pub use normalize::{normalize, normalize_bytes};
pub use types::{BatchRequest, BatchResult, CommandRequest, CommandResult, Outcome};
