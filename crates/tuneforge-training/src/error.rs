use thiserror::Error;

pub type TrainingResult<T> = std::result::Result<T, TrainingError>;

/// Fatal dataset problems. A dataset that fails here cannot be partially accepted.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("invalid JSON at line {line}: {message}")]
    InvalidJsonLine { line: usize, message: String },

    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("CSV must contain headers and at least one data row")]
    CsvTooShort,

    #[error("invalid CSV at line {line}: {message}")]
    InvalidCsv { line: usize, message: String },

    #[error("unsupported dataset format: {0}")]
    UnsupportedFormat(String),

    #[error("dataset content is not valid UTF-8")]
    NotUtf8,
}

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("invalid fine-tuning config: {0}")]
    InvalidConfig(String),

    #[error("dataset error: {0}")]
    Dataset(#[from] DatasetError),

    #[error("dataset rejected: {0}")]
    DatasetRejected(String),

    #[error("trainer error: {0}")]
    Trainer(String),

    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    #[error("training cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
