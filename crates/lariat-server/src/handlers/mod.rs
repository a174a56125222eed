mod api;
mod redirect;
mod shorten;
mod stats;

pub use api::{api_shorten, api_shorten_batch, delete_user_urls, list_user_urls};
pub use redirect::{ping, redirect};
pub use shorten::create_short_url;
pub use stats::internal_stats;

use crate::error::ApiError;
use crate::identity::Identity;
use axum::http::{header, HeaderMap};
use lariat_core::OwnerId;
use url::Url;

/// Accepted originals must parse as absolute URLs with a scheme and host.
pub(crate) fn is_valid_original(raw: &str) -> bool {
    Url::parse(raw).is_ok_and(|url| url.has_host())
}

/// Extracts a non-empty identity or answers 401, for the protected API
/// handlers.
pub(crate) fn require_owner(identity: Option<Identity>) -> Result<OwnerId, ApiError> {
    identity
        .map(|identity| identity.0)
        .filter(|owner| !owner.is_empty())
        .ok_or_else(ApiError::unauthorized)
}

/// The identity the handler runs as, empty when the middleware did not
/// resolve one.
pub(crate) fn owner_or_empty(identity: Option<Identity>) -> OwnerId {
    identity
        .map(|identity| identity.0)
        .unwrap_or_else(|| OwnerId::new(""))
}

/// Strict JSON content-type check applied to the JSON endpoints.
pub(crate) fn is_json_request(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/json"))
}
