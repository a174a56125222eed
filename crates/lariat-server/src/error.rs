use crate::models::json_response;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use lariat_core::StorageError;
use serde_json::json;

/// Which error body shape the failing endpoint speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSurface {
    Text,
    Json,
}

/// A response-shaped error.
///
/// Handlers build these around the storage sentinels; the status mapping is
/// part of the wire contract, the message is advisory.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    surface: ErrorSurface,
}

impl ApiError {
    pub fn text(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            surface: ErrorSurface::Text,
        }
    }

    pub fn json(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            surface: ErrorSurface::Json,
        }
    }

    /// 401 for a missing or empty identity on a protected endpoint.
    pub fn unauthorized() -> Self {
        Self::json(StatusCode::UNAUTHORIZED, "unauthorized")
    }

    /// Maps a storage error to its response status on the given surface.
    ///
    /// `AlreadyExists` is not an error at this level; handlers answer 409
    /// with the existing mapping before ever reaching this.
    pub fn storage(err: StorageError, surface: ErrorSurface) -> Self {
        let (status, message) = match err {
            StorageError::NotFound => (StatusCode::NOT_FOUND, "URL not found"),
            StorageError::Deleted => (StatusCode::GONE, "URL deleted"),
            StorageError::AlreadyExists(_)
            | StorageError::Cancelled
            | StorageError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };
        Self {
            status,
            message: message.to_string(),
            surface,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.surface {
            ErrorSurface::Text => (self.status, self.message).into_response(),
            ErrorSurface::Json => json_response(self.status, &json!({ "error": self.message })),
        }
    }
}
