//! Document-level error taxonomy.
//!
//! These are the failures that surface as a source's processing status.
//! Retrieval emptiness and citation mismatches are deliberately not here:
//! they are operational signals, not errors, and never fail a request.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    /// Corrupt or unreadable source. Terminal: the document is marked failed
    /// and no partial chunks are retained. Not retried — the same bytes fail
    /// the same way.
    #[error("parse failure: {0}")]
    Parse(String),

    /// The embedding provider failed after exhausting retries.
    #[error("embedding provider: {0}")]
    EmbeddingProvider(String),

    /// One or more index batches failed; earlier batches were not rolled
    /// back, so the document is partially indexed and must say so.
    #[error("index write: {failed} of {total} batches failed: {detail}")]
    IndexWrite {
        failed: usize,
        total: usize,
        detail: String,
    },

    #[error("unsupported document kind for file: {0}")]
    UnsupportedKind(String),

    #[error(transparent)]
    Db(#[from] sqlx::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl IngestError {
    /// Status message stored on the source row, truncated to keep rows small.
    pub fn status_message(&self) -> String {
        let mut msg = self.to_string();
        if msg.len() > 500 {
            msg.truncate(500);
        }
        msg
    }
}
