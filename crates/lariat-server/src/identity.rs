use crate::app::AppState;
use axum::extract::{Request, State};
use axum::http::header::{self, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use hmac::{Hmac, Mac};
use lariat_core::OwnerId;
use sha2::Sha256;
use std::sync::Arc;

type HmacSha256 = Hmac<Sha256>;

/// Name of the identity cookie.
pub const COOKIE_NAME: &str = "user_id";

/// Cookie lifetime in seconds.
const COOKIE_MAX_AGE: u32 = 30 * 24 * 60;

/// The identity resolved for the current request, injected into request
/// extensions by the identity middleware (HTTP) or interceptor (RPC).
#[derive(Debug, Clone)]
pub struct Identity(pub OwnerId);

/// Signs and verifies identity cookies with HMAC-SHA-256.
///
/// The cookie value is `owner|hex(hmac(owner + "/"))`; the trailing slash is
/// a literal domain separator. The secret is owned by the supervisor and
/// injected here at construction.
#[derive(Debug, Clone)]
pub struct IdentityKeys {
    secret: Arc<Vec<u8>>,
}

impl IdentityKeys {
    pub fn new(secret: Vec<u8>) -> Self {
        Self {
            secret: Arc::new(secret),
        }
    }

    fn mac(&self, owner: &str) -> HmacSha256 {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("hmac accepts any key length");
        mac.update(owner.as_bytes());
        mac.update(b"/");
        mac
    }

    /// Hex-encoded signature over `owner + "/"`.
    pub fn sign(&self, owner: &OwnerId) -> String {
        hex::encode(self.mac(owner.as_str()).finalize().into_bytes())
    }

    fn verify(&self, owner: &str, signature_hex: &str) -> bool {
        let Ok(signature) = hex::decode(signature_hex) else {
            return false;
        };
        self.mac(owner).verify_slice(&signature).is_ok()
    }

    /// Full `Set-Cookie` value for a freshly minted identity.
    pub fn set_cookie(&self, owner: &OwnerId) -> String {
        format!(
            "{COOKIE_NAME}={}|{}; Path=/; Max-Age={COOKIE_MAX_AGE}",
            owner.as_str(),
            self.sign(owner)
        )
    }

    /// Extracts the owner from a cookie value, rejecting tampered or
    /// malformed ones.
    pub fn owner_from_cookie(&self, value: &str) -> Option<OwnerId> {
        let mut parts = value.split('|');
        let owner = parts.next()?;
        let signature = parts.next()?;
        if parts.next().is_some() {
            return None;
        }
        self.verify(owner, signature).then(|| OwnerId::new(owner))
    }
}

/// Pulls the identity cookie value out of the request's `Cookie` headers.
fn identity_cookie(request: &Request) -> Option<String> {
    request
        .headers()
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|header| header.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == COOKIE_NAME)
        .map(|(_, value)| value.to_string())
}

/// Identity middleware for the HTTP surface.
///
/// A valid cookie yields its owner prefix; a missing, malformed or tampered
/// cookie mints a fresh identity and sets a signed cookie on the response.
/// Either way the identity lands in the request extensions for the handlers.
pub async fn identity_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let existing = identity_cookie(&request)
        .and_then(|value| state.identity().owner_from_cookie(&value));

    let (owner, minted) = match existing {
        Some(owner) => (owner, false),
        None => (OwnerId::mint(), true),
    };

    request.extensions_mut().insert(Identity(owner.clone()));
    let mut response = next.run(request).await;

    if minted {
        // Owner ids are uuid-based and signatures are hex, so the value is
        // always a valid header.
        let cookie = HeaderValue::from_str(&state.identity().set_cookie(&owner))
            .expect("cookie value contains only header-safe characters");
        response.headers_mut().append(header::SET_COOKIE, cookie);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys() -> IdentityKeys {
        IdentityKeys::new(b"0123456789abcdef0123456789abcdef".to_vec())
    }

    #[test]
    fn signed_cookie_round_trips() {
        let keys = keys();
        let owner = OwnerId::mint();
        let value = format!("{}|{}", owner.as_str(), keys.sign(&owner));
        assert_eq!(keys.owner_from_cookie(&value), Some(owner));
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let keys = keys();
        let owner = OwnerId::mint();
        let signature = keys.sign(&owner);
        // Flip one hex digit.
        let mut tampered: Vec<char> = signature.chars().collect();
        tampered[0] = if tampered[0] == '0' { '1' } else { '0' };
        let tampered: String = tampered.into_iter().collect();

        let value = format!("{}|{tampered}", owner.as_str());
        assert_eq!(keys.owner_from_cookie(&value), None);
    }

    #[test]
    fn replaced_owner_with_recomputed_signature_is_accepted() {
        // The signature is the cookie's only validation boundary: whoever
        // holds the secret can mint any identity.
        let keys = keys();
        let other = OwnerId::new("userSomebodyElse");
        let value = format!("{}|{}", other.as_str(), keys.sign(&other));
        assert_eq!(keys.owner_from_cookie(&value), Some(other));
    }

    #[test]
    fn malformed_cookies_are_rejected() {
        let keys = keys();
        assert_eq!(keys.owner_from_cookie("no-separator"), None);
        assert_eq!(keys.owner_from_cookie("a|b|c"), None);
        assert_eq!(keys.owner_from_cookie("owner|not-hex"), None);
    }

    #[test]
    fn different_secrets_do_not_cross_validate() {
        let owner = OwnerId::mint();
        let value = format!("{}|{}", owner.as_str(), keys().sign(&owner));
        let other = IdentityKeys::new(b"another-secret-another-secret-xx".to_vec());
        assert_eq!(other.owner_from_cookie(&value), None);
    }

    #[test]
    fn set_cookie_carries_path_and_lifetime() {
        let keys = keys();
        let owner = OwnerId::new("userX");
        let cookie = keys.set_cookie(&owner);
        assert!(cookie.starts_with("user_id=userX|"));
        assert!(cookie.ends_with("; Path=/; Max-Age=43200"));
    }
}
