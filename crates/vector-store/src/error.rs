use crate::embeddings::EmbeddingError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, VectorStoreError>;

#[derive(Error, Debug)]
pub enum VectorStoreError {
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Invalid vector dimension: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Compute error: {0}")]
    Compute(String),
}

impl VectorStoreError {
    pub fn config_invalid(msg: impl Into<String>) -> Self {
        Self::ConfigInvalid(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }
}
