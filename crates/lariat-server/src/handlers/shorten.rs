use super::{is_valid_original, owner_or_empty};
use crate::app::AppState;
use crate::error::{ApiError, ErrorSurface};
use crate::identity::Identity;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Extension;
use lariat_core::StorageError;
use tracing::error;

/// `POST /` — shortens the URL carried as the plain-text body.
///
/// Answers `201 base/id` for a fresh URL and `409 base/id` when the
/// `(url, owner)` pair was already shortened.
pub async fn create_short_url(
    State(state): State<AppState>,
    identity: Option<Extension<Identity>>,
    body: String,
) -> Result<Response, ApiError> {
    let raw = body.trim();
    if raw.is_empty() {
        return Err(ApiError::text(
            StatusCode::BAD_REQUEST,
            "Invalid request body",
        ));
    }
    if !is_valid_original(raw) {
        return Err(ApiError::text(StatusCode::BAD_REQUEST, "Invalid URL format"));
    }

    let owner = owner_or_empty(identity.map(|Extension(identity)| identity));
    let (status, id) = match state.storage().save(state.shutdown(), raw, &owner).await {
        Ok(id) => (StatusCode::CREATED, id),
        Err(StorageError::AlreadyExists(id)) => (StatusCode::CONFLICT, id),
        Err(err) => {
            error!(error = %err, "save failed");
            return Err(ApiError::storage(err, ErrorSurface::Text));
        }
    };

    Ok((
        status,
        [(header::CONTENT_TYPE, "text/plain")],
        id.to_url(state.base_url()),
    )
        .into_response())
}
