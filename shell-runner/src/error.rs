#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("{0}")]
    Exec(#[from] shell_exec::ExecError),

    #[error("config error: {0}")]
    Config(String),

    #[error("invalid input: {0}")]
    Input(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type RunnerResult<T> = Result<T, RunnerError>;
