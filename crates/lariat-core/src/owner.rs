use serde::{Deserialize, Serialize};
use std::fmt::Display;
use uuid::Uuid;

/// The opaque per-client identity every record is owned by.
///
/// Established on a client's first request and carried thereafter via the
/// identity cookie (HTTP) or the `user-id` metadata entry (RPC).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerId(String);

impl OwnerId {
    /// Mints a fresh identity backed by 128 bits of randomness.
    pub fn mint() -> Self {
        Self(format!("user{}", Uuid::new_v4()))
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Display for OwnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
