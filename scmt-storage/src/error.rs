use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("key not found: {0}")]
    NotFound(String),

    #[error("backend request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed backend response: {0}")]
    Decode(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;
