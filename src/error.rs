//! Closed error taxonomy for the knowledge graph engine.
//!
//! Every fallible operation in this crate returns `EngineResult<T>`. The
//! error category set is closed and mirrors the result envelope consumed by
//! callers (`crate::api::Envelope`).

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("database not found: {0}")]
    DatabaseNotFound(String),

    #[error("no database selected")]
    DatabaseNotSelected,

    #[error("database already exists: {0}")]
    DatabaseAlreadyExists(String),

    #[error("document not found: {0}")]
    DocumentNotFound(String),

    #[error("provenance record not found: {0}")]
    ProvenanceNotFound(String),

    #[error("provenance chain broken at: {0}")]
    ProvenanceChainBroken(String),

    #[error("integrity verification failed: {0}")]
    IntegrityVerificationFailed(String),

    #[error("invalid provenance chain: {0}")]
    InvalidChain(String),

    #[error("path not found: {0}")]
    PathNotFound(String),

    #[error("path is not a directory: {0}")]
    PathNotDirectory(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("embedding failed: {0}")]
    EmbeddingFailed(String),

    #[error("OCR API error: {0}")]
    OcrApiError(String),

    #[error("OCR rate limit exceeded")]
    OcrRateLimit,

    #[error("OCR request timed out")]
    OcrTimeout,

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn category(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "VALIDATION_ERROR",
            EngineError::DatabaseNotFound(_) => "DATABASE_NOT_FOUND",
            EngineError::DatabaseNotSelected => "DATABASE_NOT_SELECTED",
            EngineError::DatabaseAlreadyExists(_) => "DATABASE_ALREADY_EXISTS",
            EngineError::DocumentNotFound(_) => "DOCUMENT_NOT_FOUND",
            EngineError::ProvenanceNotFound(_) => "PROVENANCE_NOT_FOUND",
            EngineError::ProvenanceChainBroken(_) => "PROVENANCE_CHAIN_BROKEN",
            EngineError::IntegrityVerificationFailed(_) => "INTEGRITY_VERIFICATION_FAILED",
            EngineError::InvalidChain(_) => "INVALID_CHAIN",
            EngineError::PathNotFound(_) => "PATH_NOT_FOUND",
            EngineError::PathNotDirectory(_) => "PATH_NOT_DIRECTORY",
            EngineError::PermissionDenied(_) => "PERMISSION_DENIED",
            EngineError::EmbeddingFailed(_) => "EMBEDDING_FAILED",
            EngineError::OcrApiError(_) => "OCR_API_ERROR",
            EngineError::OcrRateLimit => "OCR_RATE_LIMIT",
            EngineError::OcrTimeout => "OCR_TIMEOUT",
            EngineError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl Serialize for EngineError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("EngineError", 2)?;
        state.serialize_field("category", self.category())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => EngineError::Internal("row not found".into()),
            sqlx::Error::Database(ref db_err) if db_err.is_foreign_key_violation() => {
                EngineError::IntegrityVerificationFailed(db_err.message().to_string())
            }
            other => EngineError::Internal(other.to_string()),
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => EngineError::PathNotFound(err.to_string()),
            std::io::ErrorKind::PermissionDenied => EngineError::PermissionDenied(err.to_string()),
            _ => EngineError::Internal(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Internal(format!("JSON error: {err}"))
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return EngineError::OcrTimeout;
        }
        if let Some(status) = err.status() {
            if status.as_u16() == 429 {
                return EngineError::OcrRateLimit;
            }
        }
        EngineError::OcrApiError(err.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_mapping_is_closed() {
        assert_eq!(EngineError::Validation("x".into()).category(), "VALIDATION_ERROR");
        assert_eq!(EngineError::DatabaseNotSelected.category(), "DATABASE_NOT_SELECTED");
        assert_eq!(EngineError::OcrRateLimit.category(), "OCR_RATE_LIMIT");
    }

    #[test]
    fn serializes_to_category_and_message() {
        let err = EngineError::DocumentNotFound("doc-1".into());
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["category"], "DOCUMENT_NOT_FOUND");
        assert!(json["message"].as_str().unwrap().contains("doc-1"));
    }

    #[test]
    fn io_not_found_maps_to_path_not_found() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: EngineError = io_err.into();
        assert_eq!(err.category(), "PATH_NOT_FOUND");
    }
}
