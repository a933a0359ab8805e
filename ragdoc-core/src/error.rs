//! Error types for the `ragdoc-core` crate.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while ingesting documents or answering questions.
#[derive(Debug, Error)]
pub enum RagError {
    /// The question was empty or whitespace-only.
    #[error("question must not be empty")]
    EmptyQuery,

    /// Ingestion produced zero usable chunks. The index was not touched.
    #[error("no documents found under '{}'", path.display())]
    NoDocumentsFound {
        /// The directory that was scanned.
        path: PathBuf,
    },

    /// A source file could not be read or parsed.
    #[error("failed to load '{}': {message}", path.display())]
    LoadError {
        /// The file that failed to load.
        path: PathBuf,
        /// A description of the failure.
        message: String,
    },

    /// An error occurred during embedding generation.
    #[error("Embedding error ({provider}): {message}")]
    EmbeddingFailed {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// The vector index could not be read or written.
    #[error("Vector store error ({backend}): {message}")]
    IndexUnavailable {
        /// The vector store backend that produced the error.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// A vector did not match the dimensionality fixed at collection creation.
    #[error("dimension mismatch in collection '{collection}': expected {expected}, got {actual}")]
    DimensionMismatch {
        /// The collection being written or searched.
        collection: String,
        /// Dimensionality recorded when the collection was created.
        expected: usize,
        /// Dimensionality of the offending vector.
        actual: usize,
    },

    /// The language model call failed.
    #[error("Generation error ({model}): {message}")]
    GenerationFailed {
        /// The model that was invoked.
        model: String,
        /// A description of the failure.
        message: String,
    },

    /// A configuration validation error.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl RagError {
    /// Returns `true` for errors caused by the caller's input rather than by a dependency.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::EmptyQuery | Self::NoDocumentsFound { .. } | Self::ConfigError(_)
        )
    }

    /// The message that may be shown to a remote caller.
    ///
    /// Dependency failures collapse into one opaque sentence; the detailed error is meant
    /// for the server-side log only.
    pub fn public_message(&self) -> String {
        if self.is_client_error() {
            self.to_string()
        } else {
            "the request could not be completed, please try again later".to_string()
        }
    }
}

/// A convenience result type for RAG operations.
pub type Result<T> = std::result::Result<T, RagError>;

/// Await `future`, failing with `on_timeout(duration)` if it does not finish in time.
pub(crate) async fn with_timeout<T>(
    duration: Duration,
    future: impl Future<Output = Result<T>>,
    on_timeout: impl FnOnce(Duration) -> RagError,
) -> Result<T> {
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(on_timeout(duration)),
    }
}
