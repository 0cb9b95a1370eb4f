// Service Errors
// Error type shared by the executor, the config store and the worker

use crate::config::StoreError;

use thiserror::Error;

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("a pipeline run is already active on this executor")]
    AlreadyRunning,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("worker error: {0}")]
    Worker(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("interpreter '{0}' not found on PATH")]
    InterpreterNotFound(String),
}
