use super::{is_json_request, is_valid_original, require_owner};
use crate::app::AppState;
use crate::error::{ApiError, ErrorSurface};
use crate::identity::Identity;
use crate::models::{
    json_response, BatchRequestItem, BatchResponseItem, ShortenRequest, ShortenResponse,
    UserUrlItem,
};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Extension;
use lariat_core::{DeleteTask, ShortId, StorageError};
use tracing::error;

fn bad_json(message: &str) -> ApiError {
    ApiError::json(StatusCode::BAD_REQUEST, message)
}

/// `POST /api/shorten` — JSON rendition of the shorten operation.
pub async fn api_shorten(
    State(state): State<AppState>,
    identity: Option<Extension<Identity>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let owner = require_owner(identity.map(|Extension(identity)| identity))?;
    if !is_json_request(&headers) {
        return Err(bad_json("Content-Type must be application/json"));
    }

    let request: ShortenRequest =
        serde_json::from_slice(&body).map_err(|_| bad_json("Invalid JSON format"))?;
    if request.url.is_empty() {
        return Err(bad_json("Invalid request body"));
    }
    if !is_valid_original(&request.url) {
        return Err(bad_json("Invalid URL format"));
    }

    let (status, id) = match state
        .storage()
        .save(state.shutdown(), &request.url, &owner)
        .await
    {
        Ok(id) => (StatusCode::CREATED, id),
        Err(StorageError::AlreadyExists(id)) => (StatusCode::CONFLICT, id),
        Err(err) => {
            error!(error = %err, "save failed");
            return Err(ApiError::storage(err, ErrorSurface::Json));
        }
    };

    Ok(json_response(
        status,
        &ShortenResponse {
            result: id.to_url(state.base_url()),
        },
    ))
}

/// `POST /api/shorten/batch` — shortens several URLs in one request,
/// echoing each item's correlation id.
pub async fn api_shorten_batch(
    State(state): State<AppState>,
    identity: Option<Extension<Identity>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let owner = require_owner(identity.map(|Extension(identity)| identity))?;
    if !is_json_request(&headers) {
        return Err(bad_json("Content-Type must be application/json"));
    }

    let items: Vec<BatchRequestItem> =
        serde_json::from_slice(&body).map_err(|_| bad_json("Invalid JSON format"))?;
    if items.is_empty() {
        return Err(bad_json("Empty batch request"));
    }
    for item in &items {
        if !is_valid_original(&item.original_url) {
            return Err(bad_json(&format!("Invalid URL: {}", item.original_url)));
        }
    }

    let originals: Vec<String> = items.iter().map(|item| item.original_url.clone()).collect();
    let (status, ids) = match state
        .storage()
        .save_batch(state.shutdown(), &originals, &owner)
        .await
    {
        Ok(ids) => (StatusCode::CREATED, ids),
        Err(StorageError::AlreadyExists(_)) => {
            // The batch is committed; re-resolve each element to answer the
            // conflict with the stored mappings.
            let mut ids = Vec::with_capacity(items.len());
            for original in &originals {
                let id = state
                    .storage()
                    .find_by_original(state.shutdown(), original, &owner)
                    .await
                    .map_err(|err| ApiError::storage(err, ErrorSurface::Json))?
                    .ok_or_else(|| {
                        ApiError::json(
                            StatusCode::INTERNAL_SERVER_ERROR,
                            "Internal server error",
                        )
                    })?;
                ids.push(id);
            }
            (StatusCode::CONFLICT, ids)
        }
        Err(err) => {
            error!(error = %err, "batch save failed");
            return Err(ApiError::storage(err, ErrorSurface::Json));
        }
    };

    let response: Vec<BatchResponseItem> = items
        .iter()
        .zip(&ids)
        .map(|(item, id)| BatchResponseItem {
            correlation_id: item.correlation_id.clone(),
            short_url: id.to_url(state.base_url()),
        })
        .collect();
    Ok(json_response(status, &response))
}

/// `GET /api/user/urls` — every live short URL of the authenticated owner;
/// 204 when there are none.
pub async fn list_user_urls(
    State(state): State<AppState>,
    identity: Option<Extension<Identity>>,
) -> Result<Response, ApiError> {
    let owner = require_owner(identity.map(|Extension(identity)| identity))?;

    let urls = state
        .storage()
        .list_owner(state.shutdown(), &owner)
        .await
        .map_err(|err| {
            error!(error = %err, "list failed");
            ApiError::storage(err, ErrorSurface::Json)
        })?;
    if urls.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let response: Vec<UserUrlItem> = urls
        .into_iter()
        .map(|(id, original)| UserUrlItem {
            short_url: id.to_url(state.base_url()),
            original_url: original,
        })
        .collect();
    Ok(json_response(StatusCode::OK, &response))
}

/// `DELETE /api/user/urls` — queues the listed ids for soft deletion and
/// answers 202 immediately.
pub async fn delete_user_urls(
    State(state): State<AppState>,
    identity: Option<Extension<Identity>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let owner = require_owner(identity.map(|Extension(identity)| identity))?;
    if !is_json_request(&headers) {
        return Err(bad_json("Content-Type must be application/json"));
    }

    let ids: Vec<String> =
        serde_json::from_slice(&body).map_err(|_| bad_json("Invalid JSON format"))?;
    if ids.is_empty() {
        return Err(bad_json("Invalid request body"));
    }

    let task = DeleteTask {
        owner,
        short_ids: ids.into_iter().map(ShortId::new_unchecked).collect(),
    };
    // Blocks while the queue is full; no timeout is applied.
    if state.delete_queue().send(task).await.is_err() {
        return Err(ApiError::json(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error",
        ));
    }

    Ok(StatusCode::ACCEPTED.into_response())
}
