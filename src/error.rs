//! Error taxonomy for the deduplication engine.
//!
//! Library operations return [`DedupError`]. The CLI layer wraps these in
//! `anyhow` with additional context.
//!
//! | Variant | Scope | Handling |
//! |---------|-------|----------|
//! | [`Io`](DedupError::Io) | one document | logged, run continues |
//! | [`DuplicateContentHash`](DedupError::DuplicateContentHash) | one document | retried as a merge |
//! | [`MissingRequiredField`](DedupError::MissingRequiredField) | one document | stored, flagged incomplete |
//! | [`FuzzyHashUnavailable`](DedupError::FuzzyHashUnavailable) | run | logged once, near-duplicate detection skipped |
//! | [`CanonicalIdCollision`](DedupError::CanonicalIdCollision) | one document | logged, run continues |
//! | [`IntegrityViolation`](DedupError::IntegrityViolation) | run | aborts |
//! | [`Database`](DedupError::Database) | run | aborts |
//! | [`Worker`](DedupError::Worker) | run | aborts |

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, DedupError>;

#[derive(Debug, thiserror::Error)]
pub enum DedupError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("a canonical document already exists for content hash {0}")]
    DuplicateContentHash(String),

    #[error("document {document} is missing required field '{field}'")]
    MissingRequiredField { document: String, field: &'static str },

    #[error("fuzzy hashing unavailable: {0}")]
    FuzzyHashUnavailable(String),

    #[error("canonical id {canonical_id} already belongs to content hash {existing}, not {incoming}")]
    CanonicalIdCollision {
        canonical_id: String,
        existing: String,
        incoming: String,
    },

    #[error("store integrity violation: {0}")]
    IntegrityViolation(String),

    #[error("canonical document not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("hashing worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl DedupError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DedupError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error must abort the whole run rather than one document.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DedupError::IntegrityViolation(_) | DedupError::Database(_) | DedupError::Worker(_)
        )
    }

    /// Short machine-readable tag recorded in the processing log.
    pub fn kind(&self) -> &'static str {
        match self {
            DedupError::Io { .. } => "io_error",
            DedupError::DuplicateContentHash(_) => "duplicate_content_hash",
            DedupError::MissingRequiredField { .. } => "missing_required_field",
            DedupError::FuzzyHashUnavailable(_) => "fuzzy_hash_unavailable",
            DedupError::CanonicalIdCollision { .. } => "canonical_id_collision",
            DedupError::IntegrityViolation(_) => "integrity_violation",
            DedupError::NotFound(_) => "not_found",
            DedupError::Database(_) => "database_error",
            DedupError::Serialization(_) => "serialization_error",
            DedupError::Worker(_) => "worker_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(DedupError::IntegrityViolation("orphan".into()).is_fatal());
        assert!(!DedupError::DuplicateContentHash("sha256:ab".into()).is_fatal());
        let io = DedupError::io(
            "/missing.txt",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(!io.is_fatal());
        assert_eq!(io.kind(), "io_error");
        assert!(io.to_string().contains("/missing.txt"));
    }
}
