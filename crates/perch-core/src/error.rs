//! Error types shared across all Perch crates.

/// Result alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, PerchError>;

/// Top-level error for the posting pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PerchError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Executor error: {0}")]
    Executor(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
