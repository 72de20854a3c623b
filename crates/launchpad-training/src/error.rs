use thiserror::Error;

pub type TrainingResult<T> = std::result::Result<T, TrainingError>;

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("invalid training job: {0}")]
    InvalidJob(String),

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("snapshot error: {0}")]
    Snapshot(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TrainingError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidJob(msg.into())
    }
}
