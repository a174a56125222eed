use crate::app::AppState;
use crate::error::{ApiError, ErrorSurface};
use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use lariat_core::ShortId;
use tracing::error;

/// `GET /{id}` — temporary redirect to the original URL.
pub async fn redirect(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id = ShortId::new_unchecked(id);
    let original = state
        .storage()
        .get(state.shutdown(), &id)
        .await
        .map_err(|err| ApiError::storage(err, ErrorSurface::Text))?;

    // The Location value is the verbatim original URL, validated at save.
    let location = HeaderValue::from_str(&original).map_err(|err| {
        error!(error = %err, "stored URL is not a valid header value");
        ApiError::text(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    })?;

    let mut response = StatusCode::TEMPORARY_REDIRECT.into_response();
    response.headers_mut().insert(header::LOCATION, location);
    Ok(response)
}

/// `GET /ping` — storage reachability probe.
pub async fn ping(State(state): State<AppState>) -> Response {
    match state.storage().ping(state.shutdown()).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => {
            error!(error = %err, "storage ping failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
