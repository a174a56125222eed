use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use thiserror::Error;

/// Fixed length of every short id.
pub const LENGTH: usize = 8;

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// A short id does not match the required shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid short id: {0}")]
pub struct InvalidShortId(pub String);

/// The 8-character identifier a shortened URL resolves through.
///
/// Short ids are drawn from the 62-symbol alphabet `[A-Za-z0-9]`, giving a
/// space of 62^8 (~218 trillion) values. Uniqueness is probabilistic; the
/// in-memory map additionally regenerates on the (vanishingly rare)
/// collision with a live key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShortId(String);

impl ShortId {
    /// Draws a fresh random short id.
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let code: String = (0..LENGTH)
            .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
            .collect();
        Self(code)
    }

    /// Creates a `ShortId` after validating the shape: exactly 8 characters,
    /// all from `[A-Za-z0-9]`.
    pub fn parse(id: impl Into<String>) -> Result<Self, InvalidShortId> {
        let id = id.into();
        if id.len() != LENGTH || !id.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(InvalidShortId(id));
        }
        Ok(Self(id))
    }

    /// Creates a `ShortId` without validation.
    ///
    /// Use this only for ids that came out of storage or out of
    /// [`generate`](Self::generate).
    pub fn new_unchecked(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Renders the full shortened URL for the given base URL.
    pub fn to_url(&self, base_url: &str) -> String {
        format!("{}/{}", base_url.trim_end_matches('/'), self.0)
    }

    /// Returns the short id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ShortId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ShortId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Extracts the last path segment from a short URL.
///
/// Clients of the RPC surface may send either bare ids or full short URLs;
/// the id is whatever follows the final `/`. A string with no `/` is
/// returned unchanged.
pub fn last_path_segment(short_url: &str) -> &str {
    match short_url.rfind('/') {
        Some(idx) => &short_url[idx + 1..],
        None => short_url,
    }
}
