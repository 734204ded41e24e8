//! Engine error types.

use thiserror::Error;

use audesc_models::{ApiError, ErrorCode, InputError, JobId};

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    InvalidInput(#[from] InputError),

    #[error("job {0} not found")]
    NotFound(JobId),

    #[error("job {0} has no result yet")]
    NotReady(JobId),

    #[error("job {0} is already terminal")]
    AlreadyTerminal(JobId),

    #[error("job {0} was cancelled")]
    Cancelled(JobId),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("engine is shutting down")]
    ShuttingDown,
}

impl EngineError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::InvalidInput(e) => e.into(),
            EngineError::NotFound(id) => ApiError::not_found(id),
            EngineError::NotReady(id) => ApiError::not_ready(id),
            EngineError::AlreadyTerminal(id) => ApiError::already_terminal(id),
            EngineError::Cancelled(id) => {
                ApiError::new(ErrorCode::Cancelled, format!("job {id} was cancelled"))
            }
            EngineError::Config(msg) => ApiError::new(ErrorCode::Internal, msg),
            EngineError::ShuttingDown => {
                ApiError::new(ErrorCode::Internal, "engine is shutting down")
            }
        }
    }
}
