//! Error types for Launchpad Core.

use launchpad_training::TrainingError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the in-tree execution backends.
#[derive(Error, Debug)]
pub enum BackendError {
    /// No backend is registered under this id
    #[error("Unknown backend '{0}' (available: {available})", available = crate::AVAILABLE_BACKENDS.join(", "))]
    Unknown(String),

    /// Jobs were compiled before the environment was set up
    #[error("Environment is not initialized; call init_env first")]
    EnvNotInitialized,

    /// A job launched before variables were initialized or restored
    #[error("Model variables are not initialized")]
    ModelNotInitialized,

    /// The load directory holds no snapshot this backend wrote
    #[error("No snapshot found in {0}")]
    MissingSnapshot(PathBuf),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot metadata errors
    #[error("Snapshot metadata error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for backend operations.
pub type Result<T> = std::result::Result<T, BackendError>;

impl From<BackendError> for TrainingError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::MissingSnapshot(_) => Self::Snapshot(err.to_string()),
            other => Self::Backend(other.to_string()),
        }
    }
}
