use crate::memory::MemoryStorage;
use async_trait::async_trait;
use lariat_core::storage::abort_if_cancelled;
use lariat_core::{OwnerId, Result, ShortId, Storage, StorageError, UrlRecord};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// One appended line of the storage file.
#[derive(Debug, Serialize, Deserialize)]
struct FileRecord {
    uuid: u64,
    short_url: String,
    original_url: String,
    user_id: String,
}

/// Append-only file realisation of the [`Storage`] contract.
///
/// Composes the in-memory map with a JSON-per-line append step: every
/// successful save is appended and fsynced before the map is touched, so the
/// file is crash-safe up to the last synced record. The whole file is read
/// at construction to rehydrate the map, and the highest seen `uuid` seeds
/// the next allocation.
///
/// Soft deletes are applied to the map only and are lost on restart; the
/// file is never compacted or rewritten. This is an accepted limitation of
/// the realisation.
pub struct FileStorage {
    memory: MemoryStorage,
    path: PathBuf,
    /// Guards the open-append-fsync sequence and the uuid counter, so two
    /// concurrent saves serialise on the file.
    append: Mutex<u64>,
}

impl FileStorage {
    /// Opens (creating if absent) the storage file at `path` and rehydrates
    /// the in-memory map from it.
    ///
    /// Blank lines are tolerated; lines that fail to parse are skipped with
    /// a log message.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(StorageError::internal)?;

        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(StorageError::internal)?;

        let memory = MemoryStorage::new();
        let mut last_uuid = 0;
        for line in contents.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let record: FileRecord = match serde_json::from_str(line) {
                Ok(record) => record,
                Err(err) => {
                    warn!(error = %err, "skipping unparseable storage line");
                    continue;
                }
            };
            last_uuid = last_uuid.max(record.uuid);
            memory
                .insert(
                    ShortId::new_unchecked(record.short_url),
                    UrlRecord::new(record.original_url, OwnerId::new(record.user_id)),
                )
                .await;
        }

        Ok(Self {
            memory,
            path,
            append: Mutex::new(last_uuid),
        })
    }

    /// Appends one record line and fsyncs it. The caller holds the append
    /// lock and inserts into the map only after this returns.
    async fn append_record(&self, record: &FileRecord) -> Result<()> {
        let mut line = serde_json::to_string(record).map_err(StorageError::internal)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(StorageError::internal)?;
        file.write_all(line.as_bytes())
            .await
            .map_err(StorageError::internal)?;
        file.sync_all().await.map_err(StorageError::internal)?;
        Ok(())
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn save(
        &self,
        cancel: &CancellationToken,
        original: &str,
        owner: &OwnerId,
    ) -> Result<ShortId> {
        abort_if_cancelled(cancel)?;

        let mut last_uuid = self.append.lock().await;

        if let Some(existing) = self.memory.lookup_pair(original, owner).await {
            return Err(StorageError::AlreadyExists(existing));
        }

        let id = self.memory.unused_id().await;
        let record = FileRecord {
            uuid: *last_uuid + 1,
            short_url: id.as_str().to_string(),
            original_url: original.to_string(),
            user_id: owner.as_str().to_string(),
        };
        // On any write failure the record is not inserted into the map.
        self.append_record(&record).await?;
        *last_uuid += 1;

        self.memory
            .insert(id.clone(), UrlRecord::new(original, owner.clone()))
            .await;
        Ok(id)
    }

    async fn get(&self, cancel: &CancellationToken, id: &ShortId) -> Result<String> {
        self.memory.get(cancel, id).await
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
        self.memory.find_by_original(cancel, original, owner).await
    }

    async fn list_owner(
        &self,
        cancel: &CancellationToken,
        owner: &OwnerId,
    ) -> Result<HashMap<ShortId, String>> {
        self.memory.list_owner(cancel, owner).await
    }

    async fn mark_deleted(
        &self,
        cancel: &CancellationToken,
        ids: &[ShortId],
        owner: &OwnerId,
    ) -> Result<()> {
        // In-memory only: tombstones are not appended to the file.
        self.memory.mark_deleted(cancel, ids, owner).await
    }

    async fn count_live_urls(&self, cancel: &CancellationToken) -> Result<i64> {
        self.memory.count_live_urls(cancel).await
    }

    async fn count_distinct_owners(&self, cancel: &CancellationToken) -> Result<i64> {
        self.memory.count_distinct_owners(cancel).await
    }
}
