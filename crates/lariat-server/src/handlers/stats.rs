use crate::app::AppState;
use crate::error::{ApiError, ErrorSurface};
use crate::models::{json_response, StatsResponse};
use crate::subnet::client_ip;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use tracing::error;

/// `GET /api/internal/stats` — aggregate counts, gated by the trusted CIDR.
///
/// The caller address resolves from `X-Real-IP`, then the first entry of
/// `X-Forwarded-For`; anything absent, unparseable or outside the subnet
/// answers 403.
pub async fn internal_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let allowed = client_ip(&headers).is_some_and(|ip| state.trusted_subnet().allows(ip));
    if !allowed {
        return Err(ApiError::json(StatusCode::FORBIDDEN, "forbidden"));
    }

    let urls = state
        .storage()
        .count_live_urls(state.shutdown())
        .await
        .map_err(|err| {
            error!(error = %err, "url count failed");
            ApiError::storage(err, ErrorSurface::Json)
        })?;
    let users = state
        .storage()
        .count_distinct_owners(state.shutdown())
        .await
        .map_err(|err| {
            error!(error = %err, "owner count failed");
            ApiError::storage(err, ErrorSurface::Json)
        })?;

    Ok(json_response(StatusCode::OK, &StatsResponse { urls, users }))
}
