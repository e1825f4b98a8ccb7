//! Error types for the search service
//!
//! This module provides structured error types using thiserror for better
//! error handling and actionable error messages.

use thiserror::Error;

use crate::store::StoreError;
use crate::vector::VectorError;

/// Errors surfaced by the search service and its components
#[derive(Error, Debug)]
pub enum SearchError {
    /// Input vector has the wrong length
    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Bad query shape
    #[error("Invalid k={k}: must be between 1 and {max_k}")]
    InvalidK { k: usize, max_k: usize },

    #[error("Invalid query: {reason}")]
    InvalidQuery { reason: String },

    #[error("Invalid video id '{0}'")]
    InvalidVideoId(String),

    /// Query issued before anything was indexed
    #[error("The index is empty: no segment has been built and no records are buffered")]
    EmptyIndex,

    /// Rebuild computation failed; the previous view keeps serving
    #[error("Index rebuild failed: {reason}")]
    RebuildFailure { reason: String },

    #[error("Embedding generation failed: {reason}")]
    Embedding { reason: String },

    #[error("Invalid configuration: {reason}")]
    ConfigError { reason: String },

    #[error(transparent)]
    Store(StoreError),
}

impl SearchError {
    /// Get a stable status code for this error type.
    ///
    /// Returns a string identifier that can be used in JSON responses
    /// for programmatic error handling.
    pub fn status_code(&self) -> String {
        match self {
            Self::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
            Self::InvalidK { .. } => "INVALID_K",
            Self::InvalidQuery { .. } => "INVALID_QUERY",
            Self::InvalidVideoId(_) => "INVALID_VIDEO_ID",
            Self::EmptyIndex => "EMPTY_INDEX",
            Self::RebuildFailure { .. } => "REBUILD_FAILURE",
            Self::Embedding { .. } => "EMBEDDING_FAILED",
            Self::ConfigError { .. } => "CONFIG_ERROR",
            Self::Store(StoreError::StoreMismatch { .. }) => "STORE_MISMATCH",
            Self::Store(StoreError::Corrupt { .. }) => "STORE_CORRUPT",
            Self::Store(StoreError::LogPoisoned { .. }) => "STORE_POISONED",
            Self::Store(_) => "STORE_ERROR",
        }
        .to_string()
    }

    /// Whether the caller sent a malformed request (as opposed to a server-side failure)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::DimensionMismatch { .. }
                | Self::InvalidK { .. }
                | Self::InvalidQuery { .. }
                | Self::InvalidVideoId(_)
        )
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            Self::DimensionMismatch { .. } => vec![
                "Ensure every vector comes from the embedding model the index was created for",
                "Check index.dimension in .vidsearch/settings.toml",
            ],
            Self::InvalidK { .. } => vec![
                "Request at least one result",
                "Raise query.max_k if larger result sets are needed",
            ],
            Self::InvalidQuery { .. } => vec!["Check the query vector for NaN or infinite values"],
            Self::InvalidVideoId(_) => vec!["Video ids must be non-empty strings"],
            Self::EmptyIndex => vec![
                "Upsert or import embeddings before searching",
                "Run 'vidsearch stats' to check the corpus size",
            ],
            Self::RebuildFailure { .. } => vec![
                "The previous index is still serving queries",
                "Automatic rebuilds resume after the retry backoff; run 'vidsearch rebuild' to retry now",
            ],
            Self::Embedding { .. } => vec!["Verify the embedding model is loaded and reachable"],
            Self::ConfigError { .. } => vec![
                "Run 'vidsearch config' to inspect the effective settings",
                "Run 'vidsearch init --force' to regenerate settings.toml",
            ],
            Self::Store(StoreError::StoreMismatch { .. }) => vec![
                "Use the dimension and metric the index was created with",
                "Point index_path at a fresh directory to start a new corpus",
            ],
            Self::Store(StoreError::Corrupt { .. }) => vec![
                "Restore the record log from backup",
                "Remove the index directory and re-import the corpus",
            ],
            Self::Store(StoreError::LogPoisoned { .. }) => vec![
                "Restart the service; reopening replays the log and drops the torn frame",
                "Check disk space and permissions in the index directory",
            ],
            Self::Store(_) => vec![
                "Check disk space and permissions in the index directory",
                "The write was not applied; retry the operation",
            ],
        }
    }
}

impl From<VectorError> for SearchError {
    fn from(error: VectorError) -> Self {
        match error {
            VectorError::DimensionMismatch { expected, actual } => {
                Self::DimensionMismatch { expected, actual }
            }
            VectorError::InvalidVideoId(id) => Self::InvalidVideoId(id),
            VectorError::InvalidVector { reason } => Self::InvalidQuery { reason },
            VectorError::EmbeddingFailed(reason) => Self::Embedding { reason },
            VectorError::ClusteringFailed(reason) => Self::RebuildFailure { reason },
            VectorError::Storage(e) => Self::Store(StoreError::Io(e)),
            other => Self::InvalidQuery {
                reason: other.to_string(),
            },
        }
    }
}

impl From<StoreError> for SearchError {
    fn from(error: StoreError) -> Self {
        match error {
            // Validation failures are the caller's, not the store's
            StoreError::Vector(e) => e.into(),
            other => Self::Store(other),
        }
    }
}

/// Result type alias for search operations
pub type SearchResult<T> = Result<T, SearchError>;
