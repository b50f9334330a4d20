//! Error types for the record service

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServiceError>;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("server is not stopped")]
    AlreadyRunning,

    #[error("server did not acknowledge stop in time")]
    StopTimeout,
}
