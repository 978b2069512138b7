#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid batch: {0}")]
    InvalidBatch(String),

    #[error("cannot parse command {command:?}: {detail}")]
    Parse { command: String, detail: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, ExecError>;
