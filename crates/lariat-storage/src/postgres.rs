use async_trait::async_trait;
use lariat_core::storage::abort_if_cancelled;
use lariat_core::{OwnerId, Result, ShortId, Storage, StorageError};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Ping deadline applied while constructing the store.
const PING_TIMEOUT: Duration = Duration::from_secs(5);

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// PostgreSQL realisation of the [`Storage`] contract.
///
/// One table `short_urls` with unique indexes on `original_url` and
/// `short_url`; soft delete is the `is_deleted` flag. Schema migrations are
/// embedded and applied idempotently at construction; a failed ping or a
/// failed migration is fatal to construction. Concurrency control is left to
/// the connection pool and the per-statement transaction isolation.
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    /// Connects to `dsn`, verifies the connection within five seconds and
    /// applies pending migrations.
    pub async fn connect(dsn: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .acquire_timeout(PING_TIMEOUT)
            .connect(dsn)
            .await
            .map_err(map_sqlx_error)?;

        tokio::time::timeout(PING_TIMEOUT, sqlx::query("SELECT 1").execute(&pool))
            .await
            .map_err(|_| StorageError::internal("database ping timed out"))?
            .map_err(map_sqlx_error)?;

        MIGRATOR
            .run(&pool)
            .await
            .map_err(|err| StorageError::internal(format!("failed to apply migrations: {err}")))?;

        Ok(Self { pool })
    }

    /// Creates a store from an existing pool. Assumes migrations have run.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Closes the underlying connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn short_url_for_original(&self, original: &str) -> Result<Option<ShortId>> {
        let row = sqlx::query("SELECT short_url FROM short_urls WHERE original_url = $1")
            .bind(original)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        row.map(|row| {
            row.try_get::<String, _>("short_url")
                .map(ShortId::new_unchecked)
                .map_err(map_sqlx_error)
        })
        .transpose()
    }
}

fn map_sqlx_error(err: sqlx::Error) -> StorageError {
    StorageError::Internal(err.to_string())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(sqlx::error::DatabaseError::is_unique_violation)
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn save(
        &self,
        cancel: &CancellationToken,
        original: &str,
        owner: &OwnerId,
    ) -> Result<ShortId> {
        abort_if_cancelled(cancel)?;

        let existing =
            sqlx::query("SELECT short_url FROM short_urls WHERE original_url = $1 AND user_id = $2")
                .bind(original)
                .bind(owner.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
        if let Some(row) = existing {
            let id: String = row.try_get("short_url").map_err(map_sqlx_error)?;
            return Err(StorageError::AlreadyExists(ShortId::new_unchecked(id)));
        }

        let id = ShortId::generate();
        let inserted =
            sqlx::query("INSERT INTO short_urls (original_url, short_url, user_id) VALUES ($1, $2, $3)")
                .bind(original)
                .bind(id.as_str())
                .bind(owner.as_str())
                .execute(&self.pool)
                .await;

        match inserted {
            Ok(_) => Ok(id),
            // A concurrent writer beat us to the unique index; surface the
            // row that won.
            Err(err) if is_unique_violation(&err) => match self.short_url_for_original(original).await? {
                Some(existing) => Err(StorageError::AlreadyExists(existing)),
                None => Err(map_sqlx_error(err)),
            },
            Err(err) => Err(map_sqlx_error(err)),
        }
    }

    async fn get(&self, cancel: &CancellationToken, id: &ShortId) -> Result<String> {
        abort_if_cancelled(cancel)?;

        let row = sqlx::query("SELECT original_url, is_deleted FROM short_urls WHERE short_url = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        let Some(row) = row else {
            return Err(StorageError::NotFound);
        };

        let is_deleted: bool = row.try_get("is_deleted").map_err(map_sqlx_error)?;
        if is_deleted {
            return Err(StorageError::Deleted);
        }
        row.try_get("original_url").map_err(map_sqlx_error)
    }

    async fn ping(&self, cancel: &CancellationToken) -> Result<()> {
        abort_if_cancelled(cancel)?;

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(map_sqlx_error)
    }

    async fn save_batch(
        &self,
        cancel: &CancellationToken,
        originals: &[String],
        owner: &OwnerId,
    ) -> Result<Vec<ShortId>> {
        abort_if_cancelled(cancel)?;

        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let mut ids = Vec::with_capacity(originals.len());
        let mut conflict = None;
        for original in originals {
            let fresh = ShortId::generate();
            let row = sqlx::query(
                "INSERT INTO short_urls (original_url, short_url, user_id) VALUES ($1, $2, $3) \
                 ON CONFLICT (original_url) DO NOTHING RETURNING short_url",
            )
            .bind(original)
            .bind(fresh.as_str())
            .bind(owner.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

            let id = match row {
                Some(row) => {
                    let stored: String = row.try_get("short_url").map_err(map_sqlx_error)?;
                    ShortId::new_unchecked(stored)
                }
                None => {
                    // The original is already stored; re-read its id.
                    let row = sqlx::query("SELECT short_url FROM short_urls WHERE original_url = $1")
                        .bind(original)
                        .fetch_one(&mut *tx)
                        .await
                        .map_err(map_sqlx_error)?;
                    let stored: String = row.try_get("short_url").map_err(map_sqlx_error)?;
                    let stored = ShortId::new_unchecked(stored);
                    conflict.get_or_insert(stored.clone());
                    stored
                }
            };
            ids.push(id);
        }

        // The batch commits regardless of conflicts.
        tx.commit().await.map_err(map_sqlx_error)?;

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

        let row =
            sqlx::query("SELECT short_url FROM short_urls WHERE original_url = $1 AND user_id = $2")
                .bind(original)
                .bind(owner.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
        row.map(|row| {
            row.try_get::<String, _>("short_url")
                .map(ShortId::new_unchecked)
                .map_err(map_sqlx_error)
        })
        .transpose()
    }

    async fn list_owner(
        &self,
        cancel: &CancellationToken,
        owner: &OwnerId,
    ) -> Result<HashMap<ShortId, String>> {
        abort_if_cancelled(cancel)?;

        let rows = sqlx::query(
            "SELECT short_url, original_url FROM short_urls \
             WHERE user_id = $1 AND is_deleted = FALSE",
        )
        .bind(owner.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let mut result = HashMap::with_capacity(rows.len());
        for row in rows {
            let short: String = row.try_get("short_url").map_err(map_sqlx_error)?;
            let original: String = row.try_get("original_url").map_err(map_sqlx_error)?;
            result.insert(ShortId::new_unchecked(short), original);
        }
        Ok(result)
    }

    async fn mark_deleted(
        &self,
        cancel: &CancellationToken,
        ids: &[ShortId],
        owner: &OwnerId,
    ) -> Result<()> {
        abort_if_cancelled(cancel)?;

        let ids: Vec<String> = ids.iter().map(|id| id.as_str().to_string()).collect();
        sqlx::query("UPDATE short_urls SET is_deleted = TRUE WHERE short_url = ANY($1) AND user_id = $2")
            .bind(&ids)
            .bind(owner.as_str())
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(map_sqlx_error)
    }

    async fn count_live_urls(&self, cancel: &CancellationToken) -> Result<i64> {
        abort_if_cancelled(cancel)?;

        sqlx::query_scalar("SELECT COUNT(*) FROM short_urls WHERE is_deleted = FALSE")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }

    async fn count_distinct_owners(&self, cancel: &CancellationToken) -> Result<i64> {
        abort_if_cancelled(cancel)?;

        sqlx::query_scalar("SELECT COUNT(DISTINCT user_id) FROM short_urls WHERE is_deleted = FALSE")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }
}
