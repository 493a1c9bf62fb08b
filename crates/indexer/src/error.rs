use code_index_vector_store::VectorStoreError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexerError>;

#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Chunker error: {0}")]
    ChunkerError(#[from] code_index_chunker::ChunkerError),

    #[error(transparent)]
    VectorStoreError(#[from] VectorStoreError),

    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("Not a git repository: {0}")]
    NotGitRepo(String),

    #[error("Repository is not indexed yet: {0}")]
    NotInitialized(String),

    #[error("git failed: {0}")]
    Git(String),

    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    /// Stable machine-readable code for the outer surfaces.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::ConfigInvalid(_) | Self::ChunkerError(_) => "CONFIG_INVALID",
            Self::NotGitRepo(_) => "NOT_GIT_REPO",
            Self::NotInitialized(_) => "NOT_INITIALIZED",
            Self::Git(_) => "GIT_ERROR",
            Self::IoError(_) | Self::SerializationError(_) | Self::Other(_) => "STORAGE_ERROR",
            Self::VectorStoreError(inner) => match inner {
                VectorStoreError::ConfigInvalid(_) => "CONFIG_INVALID",
                VectorStoreError::Embedding(_) => "EMBEDDING_ERROR",
                VectorStoreError::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
                VectorStoreError::Compute(_) => "COMPUTE_ERROR",
                VectorStoreError::Storage(_)
                | VectorStoreError::IoError(_)
                | VectorStoreError::SerializationError(_)
                | VectorStoreError::InvalidRecord(_) => "STORAGE_ERROR",
            },
        }
    }

    /// Extra context worth showing next to the message, such as an HTTP status and body.
    #[must_use]
    pub fn detail(&self) -> Option<String> {
        match self {
            Self::VectorStoreError(VectorStoreError::Embedding(err)) => {
                match (err.status, err.detail.as_deref()) {
                    (Some(status), Some(detail)) => Some(format!("HTTP {status}: {detail}")),
                    (Some(status), None) => Some(format!("HTTP {status}")),
                    (None, Some(detail)) => Some(detail.to_string()),
                    (None, None) => None,
                }
            }
            _ => None,
        }
    }

    pub fn config_invalid(msg: impl Into<String>) -> Self {
        Self::ConfigInvalid(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use code_index_vector_store::EmbeddingError;

    #[test]
    fn codes_cover_wrapped_store_errors() {
        let dim: IndexerError = VectorStoreError::DimensionMismatch {
            expected: 3,
            actual: 4,
        }
        .into();
        assert_eq!(dim.code(), "DIMENSION_MISMATCH");
        let storage: IndexerError = VectorStoreError::storage("bad header").into();
        assert_eq!(storage.code(), "STORAGE_ERROR");
        assert_eq!(
            IndexerError::NotInitialized("/repo".into()).code(),
            "NOT_INITIALIZED"
        );
    }

    #[test]
    fn embedding_errors_carry_http_detail() {
        let err: IndexerError = VectorStoreError::from(
            EmbeddingError::new("embedding request failed")
                .with_status(500)
                .with_detail("boom"),
        )
        .into();
        assert_eq!(err.code(), "EMBEDDING_ERROR");
        assert_eq!(err.detail().as_deref(), Some("HTTP 500: boom"));
        assert_eq!(err.to_string(), "embedding request failed");
    }
}
