//! Crate-wide error taxonomy.
//!
//! Each layer defines its own `thiserror` enum for the errors it can produce;
//! this module holds the taxonomy they all collapse into plus the substring
//! classifier the pipeline and retrieval service use when a lower layer only
//! hands back a message string (e.g. an SDK error whose variants we don't
//! control).

use thiserror::Error;

/// The common currency every layer's error converts into when a caller needs
/// to decide whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Transient,
    Permanent,
    Configuration,
}

const PERMANENT_SUBSTRINGS: &[&str] = &[
    "unsupported format",
    "image corrupt",
    "invalid image",
    "cannot decode",
    "exceeds max dimension",
    "exceeds max size",
];

const CONFIGURATION_SUBSTRINGS: &[&str] = &["quality out of range", "effort out of range"];

const TRANSIENT_SUBSTRINGS: &[&str] = &[
    "timeout",
    "deadline exceeded",
    "connection refused",
    "connection reset",
    "temporary",
    "i/o timeout",
    "no such host",
    "network is unreachable",
];

/// Classifies an error message the way the pipeline does before deciding
/// `allowRetry`: permanent and configuration errors never retry, everything
/// else is assumed transient.
pub fn classify(message: &str) -> Classification {
    let m = message.to_lowercase();
    if PERMANENT_SUBSTRINGS.iter().any(|s| m.contains(s)) {
        Classification::Permanent
    } else if CONFIGURATION_SUBSTRINGS.iter().any(|s| m.contains(s)) {
        Classification::Configuration
    } else {
        Classification::Transient
    }
}

/// True if the message matches one of the fixed transient-DB-error substrings
/// used by the retrieval service to decide whether to evict a coalesced
/// singleflight entry so the next caller retries.
pub fn is_transient_db_error(message: &str) -> bool {
    let m = message.to_lowercase();
    TRANSIENT_SUBSTRINGS.iter().any(|s| m.contains(s))
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found at path {0}")]
    NotFound(String),
    #[error("storage backend unavailable: {0}")]
    Transient(String),
    #[error("storage configuration error: {0}")]
    Configuration(String),
    #[error("storage I/O error: {0}")]
    Io(String),
}

#[derive(Debug, Error)]
pub enum CacheError {
    /// Expected, never logged: the caller should fall through to the DB.
    #[error("cache miss")]
    Miss,
    #[error("cache backend unavailable: {0}")]
    Transient(String),
    #[error("cache encoding error: {0}")]
    Encoding(String),
}

#[derive(Debug, Error)]
pub enum VariantStoreError {
    #[error("variant row not found")]
    NotFound,
    #[error("variant row {0} was not in the expected state for this operation")]
    WrongState(i64),
    #[error("database error: {0}")]
    Database(String),
}

#[derive(Debug, Clone, Error)]
pub enum ImageStoreError {
    #[error("image not found")]
    NotFound,
    #[error("image is private")]
    Forbidden,
    #[error("database error: {0}")]
    Database(String),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("permanent: {0}")]
    Permanent(String),
    #[error("configuration: {0}")]
    Configuration(String),
    #[error("transient: {0}")]
    Transient(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn classification(&self) -> Classification {
        match self {
            PipelineError::Permanent(_) => Classification::Permanent,
            PipelineError::Configuration(_) => Classification::Configuration,
            PipelineError::Transient(_) | PipelineError::Internal(_) => Classification::Transient,
        }
    }

    /// Builds a pipeline error from a raw message, classifying it via the
    /// shared substring rules rather than assuming the caller already knows.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        match classify(&message) {
            Classification::Permanent => PipelineError::Permanent(message),
            Classification::Configuration => PipelineError::Configuration(message),
            Classification::Transient => PipelineError::Transient(message),
        }
    }
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("unsupported image format")]
    UnsupportedMime,
    #[error("upload exceeds max size")]
    TooLarge,
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("database error: {0}")]
    Database(String),
}

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("image not found")]
    NotFound,
    #[error("image is private")]
    Forbidden,
    #[error("transient error, retry: {0}")]
    Transient(String),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_permanent_substrings_case_insensitively() {
        assert_eq!(
            classify("Cannot Decode this JPEG"),
            Classification::Permanent
        );
        assert_eq!(
            classify("image EXCEEDS MAX DIMENSION of 8000px"),
            Classification::Permanent
        );
    }

    #[test]
    fn classifies_configuration_substrings() {
        assert_eq!(
            classify("webp quality out of range: 150"),
            Classification::Configuration
        );
    }

    #[test]
    fn defaults_to_transient() {
        assert_eq!(classify("connection reset by peer"), Classification::Transient);
        assert_eq!(classify("something unexpected happened"), Classification::Transient);
    }

    #[test]
    fn transient_db_error_matches_fixed_list() {
        assert!(is_transient_db_error("dial tcp: i/o timeout"));
        assert!(is_transient_db_error("deadline exceeded"));
        assert!(!is_transient_db_error("duplicate key value violates unique constraint"));
    }
}
