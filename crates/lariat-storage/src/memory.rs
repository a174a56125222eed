use async_trait::async_trait;
use lariat_core::storage::abort_if_cancelled;
use lariat_core::{OwnerId, Result, ShortId, Storage, StorageError, UrlRecord};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// In-memory realisation of the [`Storage`] contract.
///
/// A map from short id to record behind a reader-writer lock: concurrent
/// reads proceed in parallel, writes serialise. The idempotency check in
/// `save` scans values linearly, which is fine at the sizes this realisation
/// is meant for (tests, development).
#[derive(Debug, Default)]
pub struct MemoryStorage {
    data: RwLock<HashMap<ShortId, UrlRecord>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up the short id an `(original, owner)` pair is stored under.
    pub(crate) async fn lookup_pair(&self, original: &str, owner: &OwnerId) -> Option<ShortId> {
        let data = self.data.read().await;
        data.iter()
            .find(|(_, record)| record.original_url == original && &record.owner == owner)
            .map(|(id, _)| id.clone())
    }

    /// Draws a short id that is not currently a key of the map.
    ///
    /// Collisions are resolved by regeneration; with 62^8 values the loop
    /// effectively never repeats.
    pub(crate) async fn unused_id(&self) -> ShortId {
        let data = self.data.read().await;
        loop {
            let id = ShortId::generate();
            if !data.contains_key(&id) {
                return id;
            }
        }
    }

    /// Inserts a record under `id`, replacing nothing: callers guarantee the
    /// key is fresh.
    pub(crate) async fn insert(&self, id: ShortId, record: UrlRecord) {
        self.data.write().await.insert(id, record);
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn save(
        &self,
        cancel: &CancellationToken,
        original: &str,
        owner: &OwnerId,
    ) -> Result<ShortId> {
        abort_if_cancelled(cancel)?;

        let mut data = self.data.write().await;
        if let Some((id, _)) = data
            .iter()
            .find(|(_, record)| record.original_url == original && &record.owner == owner)
        {
            return Err(StorageError::AlreadyExists(id.clone()));
        }

        let mut id = ShortId::generate();
        while data.contains_key(&id) {
            id = ShortId::generate();
        }
        data.insert(id.clone(), UrlRecord::new(original, owner.clone()));
        Ok(id)
    }

    async fn get(&self, cancel: &CancellationToken, id: &ShortId) -> Result<String> {
        abort_if_cancelled(cancel)?;

        let data = self.data.read().await;
        match data.get(id) {
            None => Err(StorageError::NotFound),
            Some(record) if record.deleted => Err(StorageError::Deleted),
            Some(record) => Ok(record.original_url.clone()),
        }
    }

    async fn ping(&self, cancel: &CancellationToken) -> Result<()> {
        abort_if_cancelled(cancel)
    }

    async fn save_batch(
        &self,
        cancel: &CancellationToken,
        originals: &[String],
        owner: &OwnerId,
    ) -> Result<Vec<ShortId>> {
        abort_if_cancelled(cancel)?;

        let mut ids = Vec::with_capacity(originals.len());
        let mut conflict = None;
        for original in originals {
            match self.save(cancel, original, owner).await {
                Ok(id) => ids.push(id),
                Err(StorageError::AlreadyExists(id)) => {
                    ids.push(id.clone());
                    conflict.get_or_insert(id);
                }
                Err(err) => return Err(err),
            }
        }

        match conflict {
            Some(id) => Err(StorageError::AlreadyExists(id)),
            None => Ok(ids),
        }
    }

    async fn find_by_original(
        &self,
        cancel: &CancellationToken,
        original: &str,
        owner: &OwnerId,
    ) -> Result<Option<ShortId>> {
        abort_if_cancelled(cancel)?;
        Ok(self.lookup_pair(original, owner).await)
    }

    async fn list_owner(
        &self,
        cancel: &CancellationToken,
        owner: &OwnerId,
    ) -> Result<HashMap<ShortId, String>> {
        abort_if_cancelled(cancel)?;

        let data = self.data.read().await;
        Ok(data
            .iter()
            .filter(|(_, record)| &record.owner == owner && !record.deleted)
            .map(|(id, record)| (id.clone(), record.original_url.clone()))
            .collect())
    }

    async fn mark_deleted(
        &self,
        cancel: &CancellationToken,
        ids: &[ShortId],
        owner: &OwnerId,
    ) -> Result<()> {
        abort_if_cancelled(cancel)?;

        let mut data = self.data.write().await;
        for id in ids {
            if let Some(record) = data.get_mut(id) {
                if &record.owner == owner {
                    record.deleted = true;
                }
            }
        }
        Ok(())
    }

    async fn count_live_urls(&self, cancel: &CancellationToken) -> Result<i64> {
        abort_if_cancelled(cancel)?;

        let data = self.data.read().await;
        Ok(data.values().filter(|record| !record.deleted).count() as i64)
    }

    async fn count_distinct_owners(&self, cancel: &CancellationToken) -> Result<i64> {
        abort_if_cancelled(cancel)?;

        let data = self.data.read().await;
        let owners: HashSet<&OwnerId> = data
            .values()
            .filter(|record| !record.deleted)
            .map(|record| &record.owner)
            .collect();
        Ok(owners.len() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn owner(id: &str) -> OwnerId {
        OwnerId::new(id)
    }

    fn token() -> CancellationToken {
        CancellationToken::new()
    }

    #[tokio::test]
    async fn save_and_get_round_trip() {
        let storage = MemoryStorage::new();
        let cancel = token();

        let id = storage
            .save(&cancel, "https://example.com/", &owner("user1"))
            .await
            .unwrap();
        assert_eq!(id.as_str().len(), 8);

        let original = storage.get(&cancel, &id).await.unwrap();
        assert_eq!(original, "https://example.com/");
    }

    #[tokio::test]
    async fn repeated_save_answers_already_exists_with_the_same_id() {
        let storage = MemoryStorage::new();
        let cancel = token();
        let me = owner("user1");

        let id = storage
            .save(&cancel, "https://example.com/", &me)
            .await
            .unwrap();
        let err = storage
            .save(&cancel, "https://example.com/", &me)
            .await
            .unwrap_err();
        assert_eq!(err, StorageError::AlreadyExists(id));
    }

    #[tokio::test]
    async fn get_unknown_id_answers_not_found() {
        let storage = MemoryStorage::new();
        let err = storage
            .get(&token(), &ShortId::new_unchecked("nosuchid"))
            .await
            .unwrap_err();
        assert_eq!(err, StorageError::NotFound);
    }

    #[tokio::test]
    async fn soft_delete_is_terminal() {
        let storage = MemoryStorage::new();
        let cancel = token();
        let me = owner("user1");

        let id = storage.save(&cancel, "https://example.com/", &me).await.unwrap();
        storage
            .mark_deleted(&cancel, &[id.clone()], &me)
            .await
            .unwrap();

        assert_eq!(storage.get(&cancel, &id).await, Err(StorageError::Deleted));
        assert_eq!(storage.get(&cancel, &id).await, Err(StorageError::Deleted));
        assert!(storage.list_owner(&cancel, &me).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_is_owner_scoped() {
        let storage = MemoryStorage::new();
        let cancel = token();
        let alice = owner("alice");
        let bob = owner("bob");

        let id = storage.save(&cancel, "https://example.com/", &alice).await.unwrap();
        storage
            .mark_deleted(&cancel, &[id.clone()], &bob)
            .await
            .unwrap();

        // Bob's attempt must not flip Alice's record.
        assert!(storage.get(&cancel, &id).await.is_ok());
    }

    #[tokio::test]
    async fn list_owner_sees_only_own_records() {
        let storage = MemoryStorage::new();
        let cancel = token();
        let alice = owner("alice");
        let bob = owner("bob");

        let id = storage.save(&cancel, "https://a.test/", &alice).await.unwrap();
        storage.save(&cancel, "https://b.test/", &bob).await.unwrap();

        let listed = storage.list_owner(&cancel, &alice).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed.get(&id).map(String::as_str), Some("https://a.test/"));
    }

    #[tokio::test]
    async fn batch_save_preserves_order_and_reports_conflicts_once() {
        let storage = MemoryStorage::new();
        let cancel = token();
        let me = owner("user1");

        let originals = vec!["https://x.test/".to_string(), "https://y.test/".to_string()];
        let ids = storage.save_batch(&cancel, &originals, &me).await.unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(storage.get(&cancel, &ids[0]).await.unwrap(), "https://x.test/");
        assert_eq!(storage.get(&cancel, &ids[1]).await.unwrap(), "https://y.test/");

        // Replaying the batch commits nothing new and reports the conflict.
        let err = storage.save_batch(&cancel, &originals, &me).await.unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn counts_track_live_records_and_owners() {
        let storage = MemoryStorage::new();
        let cancel = token();
        let alice = owner("alice");
        let bob = owner("bob");

        let id = storage.save(&cancel, "https://a.test/", &alice).await.unwrap();
        storage.save(&cancel, "https://b.test/", &alice).await.unwrap();
        storage.save(&cancel, "https://c.test/", &bob).await.unwrap();

        assert_eq!(storage.count_live_urls(&cancel).await.unwrap(), 3);
        assert_eq!(storage.count_distinct_owners(&cancel).await.unwrap(), 2);

        storage.mark_deleted(&cancel, &[id], &alice).await.unwrap();
        assert_eq!(storage.count_live_urls(&cancel).await.unwrap(), 2);
        assert_eq!(storage.count_distinct_owners(&cancel).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn cancelled_token_aborts_every_operation() {
        let storage = MemoryStorage::new();
        let cancel = token();
        cancel.cancel();
        let me = owner("user1");

        assert_eq!(
            storage.save(&cancel, "https://example.com/", &me).await,
            Err(StorageError::Cancelled)
        );
        assert_eq!(
            storage.get(&cancel, &ShortId::new_unchecked("abcDEF12")).await,
            Err(StorageError::Cancelled)
        );
        assert_eq!(storage.ping(&cancel).await, Err(StorageError::Cancelled));
        assert_eq!(
            storage.list_owner(&cancel, &me).await,
            Err(StorageError::Cancelled)
        );
    }

    #[tokio::test]
    async fn concurrent_saves_of_the_same_pair_agree_on_one_id() {
        let storage = Arc::new(MemoryStorage::new());
        let cancel = token();
        let me = owner("user1");

        let (a, b) = tokio::join!(
            storage.save(&cancel, "https://example.com/", &me),
            storage.save(&cancel, "https://example.com/", &me),
        );

        // Exactly one call created the record; both agree on the id.
        let ids: Vec<ShortId> = [a, b]
            .into_iter()
            .map(|result| match result {
                Ok(id) => id,
                Err(StorageError::AlreadyExists(id)) => id,
                Err(err) => panic!("unexpected error: {err}"),
            })
            .collect();
        assert_eq!(ids[0], ids[1]);
        assert_eq!(storage.count_live_urls(&cancel).await.unwrap(), 1);
    }
}
