use crate::short_id::ShortId;
use std::fmt::Display;
use std::sync::Arc;
use thiserror::Error;
use tonic::{Code, Status};

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Error taxonomy shared by every storage realisation.
///
/// The sentinel variants (`NotFound`, `AlreadyExists`, `Deleted`) keep their
/// identity all the way up to the request surfaces; handlers shape responses
/// around them but never hide them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("short id not found")]
    NotFound,
    /// The `(original, owner)` pair is already stored; carries the short id
    /// it resolves to so callers can answer with the existing mapping.
    #[error("url already shortened as '{0}'")]
    AlreadyExists(ShortId),
    #[error("short id has been deleted")]
    Deleted,
    #[error("storage operation cancelled")]
    Cancelled,
    #[error("storage operation failed: {0}")]
    Internal(String),
}

impl StorageError {
    /// Wraps an opaque backend failure.
    pub fn internal(err: impl Display) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<StorageError> for Status {
    fn from(error: StorageError) -> Self {
        let (code, message) = match &error {
            StorageError::NotFound => (Code::NotFound, "not found"),
            StorageError::AlreadyExists(_) => (Code::AlreadyExists, "url already shortened"),
            StorageError::Deleted => (Code::FailedPrecondition, "url deleted"),
            StorageError::Cancelled => (Code::Cancelled, "operation cancelled"),
            StorageError::Internal(_) => (Code::Internal, "storage operation failed"),
        };

        let mut status = Status::new(code, message);
        status.set_source(Arc::new(error));
        status
    }
}

#[cfg(test)]
mod tests {
    use super::StorageError;
    use crate::short_id::ShortId;
    use tonic::{Code, Status};

    fn assert_status(error: StorageError, expected_code: Code, expected_message: &str) {
        let status: Status = error.into();
        assert_eq!(status.code(), expected_code);
        assert_eq!(status.message(), expected_message);
    }

    #[test]
    fn not_found_maps_to_not_found() {
        assert_status(StorageError::NotFound, Code::NotFound, "not found");
    }

    #[test]
    fn already_exists_maps_to_already_exists() {
        assert_status(
            StorageError::AlreadyExists(ShortId::new_unchecked("abcDEF12")),
            Code::AlreadyExists,
            "url already shortened",
        );
    }

    #[test]
    fn deleted_maps_to_failed_precondition() {
        assert_status(StorageError::Deleted, Code::FailedPrecondition, "url deleted");
    }

    #[test]
    fn cancelled_maps_to_cancelled() {
        assert_status(StorageError::Cancelled, Code::Cancelled, "operation cancelled");
    }

    #[test]
    fn internal_maps_to_internal() {
        assert_status(
            StorageError::Internal("db down".to_string()),
            Code::Internal,
            "storage operation failed",
        );
    }
}
