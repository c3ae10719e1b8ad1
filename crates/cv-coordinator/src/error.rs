use cv_log::LogError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Log error: {0}")]
    Log(#[from] LogError),

    #[error("Coordinator already started")]
    AlreadyStarted,

    #[error("Coordinator not initialized: call initialize() before start()")]
    NotInitialized,
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;
