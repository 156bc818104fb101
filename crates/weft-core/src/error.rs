use thiserror::Error;

/// Errors surfaced by the queue's public API.
///
/// Normal admission never fails: a task whose keys are busy is parked, not
/// rejected.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue `{0}` has been shut down")]
    ShutDown(String),

    #[error("no tokio runtime available: {0}")]
    NoRuntime(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),
}

/// Error reported by a task handler. Logged by the processor; the task's
/// keys are released regardless.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}
