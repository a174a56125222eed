use crate::error::{Result, StorageError};
use crate::owner::OwnerId;
use crate::short_id::ShortId;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// The storage contract every realisation implements.
///
/// Four capability groups: basic (save/get/ping), batch, lookup and delete,
/// plus the aggregate counts backing the internal stats endpoint. Every
/// method takes a cancellation token and honours it at entry and at blocking
/// points, answering [`StorageError::Cancelled`] once it has fired.
///
/// Save idempotency: if the `(original, owner)` pair is already stored,
/// `save` answers `Err(AlreadyExists(existing_id))`. Batch save behaves the
/// same per element, committing the whole batch regardless and reporting
/// `AlreadyExists` at most once; callers re-resolve conflicting elements
/// with [`find_by_original`](Storage::find_by_original).
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    /// Stores `original` under a freshly generated short id owned by `owner`.
    async fn save(
        &self,
        cancel: &CancellationToken,
        original: &str,
        owner: &OwnerId,
    ) -> Result<ShortId>;

    /// Resolves a short id to its original URL.
    ///
    /// Answers `NotFound` for an unknown id and `Deleted` for a
    /// soft-deleted one.
    async fn get(&self, cancel: &CancellationToken, id: &ShortId) -> Result<String>;

    /// Verifies the backend is reachable.
    async fn ping(&self, cancel: &CancellationToken) -> Result<()>;

    /// Stores several originals for one owner, preserving the caller's
    /// order in the returned ids.
    async fn save_batch(
        &self,
        cancel: &CancellationToken,
        originals: &[String],
        owner: &OwnerId,
    ) -> Result<Vec<ShortId>>;

    /// Finds the short id an `(original, owner)` pair already resolves to.
    ///
    /// The deleted flag is not consulted: a soft-deleted record still
    /// answers its stored id, and `save` on the same pair reports it via
    /// `AlreadyExists`.
    async fn find_by_original(
        &self,
        cancel: &CancellationToken,
        original: &str,
        owner: &OwnerId,
    ) -> Result<Option<ShortId>>;

    /// Lists every live record owned by `owner` as `short_id -> original`.
    async fn list_owner(
        &self,
        cancel: &CancellationToken,
        owner: &OwnerId,
    ) -> Result<HashMap<ShortId, String>>;

    /// Soft-deletes the given ids, touching only records whose stored owner
    /// matches `owner`; unmatched or missing ids are skipped.
    async fn mark_deleted(
        &self,
        cancel: &CancellationToken,
        ids: &[ShortId],
        owner: &OwnerId,
    ) -> Result<()>;

    /// Counts records that are not soft-deleted.
    async fn count_live_urls(&self, cancel: &CancellationToken) -> Result<i64>;

    /// Counts distinct owners across records that are not soft-deleted.
    async fn count_distinct_owners(&self, cancel: &CancellationToken) -> Result<i64>;
}

/// Entry guard shared by the realisations: answers `Cancelled` once the
/// token has fired.
pub fn abort_if_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(StorageError::Cancelled);
    }
    Ok(())
}
