//! Typed failures of the retrieval pipeline.
//!
//! Most code returns `anyhow::Result`; a [`RagError`] travels inside the
//! `anyhow::Error` whenever a caller needs to react to the specific kind
//! (retry classification, HTTP status mapping, CLI exit messages). Recover it
//! with `err.downcast_ref::<RagError>()`.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    /// The vector index or its metadata file is absent.
    #[error(
        "vector index not found (index: {}, metadata: {}). Run ingestion first: `erag ingest` or `erag index build`",
        index.display(),
        metadata.display()
    )]
    MissingIndex { index: PathBuf, metadata: PathBuf },

    /// An embedding batch failed on every attempt of its budget.
    #[error("embedding failed after {attempts} attempts: {source}")]
    EmbeddingFatal {
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    /// The embedding provider refused the request outright (client error);
    /// re-sending the same batch cannot succeed.
    #[error("embedding request rejected ({status}): {body}")]
    EmbeddingRejected { status: u16, body: String },

    #[error("question must not be empty")]
    EmptyQuestion,

    #[error("vector dimension mismatch: index has {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Parallel-array invariant broken: rows and metadata records diverge.
    #[error(
        "index has {rows} rows but metadata has {records} records; run `erag index build --full` to rebuild"
    )]
    InconsistentIndex { rows: usize, records: usize },

    #[error("corrupt vector index {}: {reason}", path.display())]
    CorruptIndex { path: PathBuf, reason: String },
}

impl RagError {
    /// Whether re-sending the same embedding batch could succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            RagError::EmbeddingRejected { .. } | RagError::DimensionMismatch { .. }
        )
    }
}

/// Returns the [`RagError`] carried by an `anyhow::Error`, if any.
pub fn rag_error(err: &anyhow::Error) -> Option<&RagError> {
    err.downcast_ref::<RagError>()
}
