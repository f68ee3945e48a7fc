use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipeLensError {
    #[error("API request failed: {0}")]
    Api(String),

    #[error("API returned status {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("API still failing with status {status} after {retries} retries")]
    ApiErrorAfterRetries { status: u16, retries: u32 },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to persist statistics store at {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Statistics store at {path} is in use by another process")]
    StoreLocked { path: PathBuf },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PipeLensError>;
