//! SQLite blob store

use super::{BlobError, BlobKey, BlobResult, BlobStore, BlobWriter};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Blobs stored as rows of a single SQLite table.
///
/// Construction performs no I/O and needs no runtime. The pool is built by
/// [`BlobStore::start`], or on first use if the store was never started.
#[derive(Debug, Clone)]
pub struct SqliteBlobStore {
    pool: Arc<OnceCell<SqlitePool>>,
    options: SqliteConnectOptions,
    max_connections: u32,
    path: PathBuf,
}

impl SqliteBlobStore {
    /// Create a store backed by the database file at `path`.
    pub fn new(path: impl AsRef<Path>, max_connections: u32) -> Self {
        let path = path.as_ref().to_path_buf();

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        Self {
            pool: Arc::new(OnceCell::new()),
            options,
            max_connections: max_connections.max(1),
            path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn pool(&self) -> &SqlitePool {
        self.pool
            .get_or_init(|| async {
                SqlitePoolOptions::new()
                    .max_connections(self.max_connections)
                    .acquire_timeout(Duration::from_secs(30))
                    .connect_lazy_with(self.options.clone())
            })
            .await
    }

    /// Close all pooled connections
    pub async fn close(&self) {
        if let Some(pool) = self.pool.get() {
            pool.close().await;
        }
    }
}

#[async_trait]
impl BlobStore for SqliteBlobStore {
    async fn start(&self) -> BlobResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS blobs (
                key  TEXT PRIMARY KEY NOT NULL,
                data BLOB NOT NULL
            )
            "#,
        )
        .execute(self.pool().await)
        .await?;

        info!(path = %self.path.display(), "Initialized SQLite blob store");
        Ok(())
    }

    async fn create(
        &self,
        key: &BlobKey,
        size_hint: Option<u64>,
    ) -> BlobResult<Box<dyn BlobWriter>> {
        let capacity = size_hint.unwrap_or(0).min(1 << 20) as usize;
        Ok(Box::new(SqliteBlobWriter {
            key: key.clone(),
            pool: self.pool().await.clone(),
            buffer: Some(Vec::with_capacity(capacity)),
        }))
    }

    async fn get(&self, key: &BlobKey) -> BlobResult<Vec<u8>> {
        let row = sqlx::query("SELECT data FROM blobs WHERE key = ?")
            .bind(key.as_str())
            .fetch_optional(self.pool().await)
            .await?
            .ok_or_else(|| BlobError::NotFound(key.to_string()))?;

        let data: Vec<u8> = row.try_get("data")?;
        debug!(key = %key, size = data.len(), "Read blob");
        Ok(data)
    }

    async fn delete(&self, key: &BlobKey) -> BlobResult<()> {
        let result = sqlx::query("DELETE FROM blobs WHERE key = ?")
            .bind(key.as_str())
            .execute(self.pool().await)
            .await?;

        if result.rows_affected() > 0 {
            debug!(key = %key, "Deleted blob");
        }
        Ok(())
    }

    async fn list(&self) -> BlobResult<Vec<BlobKey>> {
        let rows = sqlx::query("SELECT key FROM blobs ORDER BY key")
            .fetch_all(self.pool().await)
            .await?;

        rows.iter()
            .map(|row| {
                let key: String = row.try_get("key")?;
                BlobKey::new(key)
            })
            .collect()
    }
}

struct SqliteBlobWriter {
    key: BlobKey,
    pool: SqlitePool,
    buffer: Option<Vec<u8>>,
}

#[async_trait]
impl BlobWriter for SqliteBlobWriter {
    async fn write(&mut self, chunk: &[u8]) -> BlobResult<()> {
        self.buffer
            .as_mut()
            .ok_or(BlobError::WriterClosed)?
            .extend_from_slice(chunk);
        Ok(())
    }

    async fn commit(&mut self) -> BlobResult<()> {
        let data = self.buffer.take().ok_or(BlobError::WriterClosed)?;
        let size = data.len();

        sqlx::query(
            r#"
            INSERT INTO blobs (key, data) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET data = excluded.data
            "#,
        )
        .bind(self.key.as_str())
        .bind(data)
        .execute(&self.pool)
        .await?;

        debug!(key = %self.key, size, "Stored blob");
        Ok(())
    }

    async fn abort(&mut self) -> BlobResult<()> {
        self.buffer.take().ok_or(BlobError::WriterClosed)?;
        Ok(())
    }
}
