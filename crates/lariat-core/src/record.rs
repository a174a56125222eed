use crate::owner::OwnerId;
use serde::{Deserialize, Serialize};

/// A stored URL record.
///
/// Records move `Nonexistent -> Live` on a successful save and
/// `Live -> Deleted` on an owner-matched soft delete; `Deleted` is terminal.
/// The in-memory and file realisations never physically remove a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UrlRecord {
    /// The original URL that was shortened.
    pub original_url: String,
    /// The identity that created the record.
    pub owner: OwnerId,
    /// Soft-delete flag, flipped only by the deletion worker.
    pub deleted: bool,
}

impl UrlRecord {
    pub fn new(original_url: impl Into<String>, owner: OwnerId) -> Self {
        Self {
            original_url: original_url.into(),
            owner,
            deleted: false,
        }
    }
}
