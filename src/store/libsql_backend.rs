//! libSQL backend: durable `BlobStore` implementation.
//!
//! All records share one `blobs` table keyed by the namespaced key.
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::info;

use crate::error::StoreError;
use crate::store::migrations;
use crate::store::traits::{BlobStore, StoreUsage};

/// libSQL blob store.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBlobStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBlobStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Unavailable(format!("Failed to create database directory: {e}"))
                })?;
            }
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to open libSQL database: {e}")))?;

        let store = Self::from_database(db).await?;
        info!(path = %path.display(), "Blob store opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                StoreError::Unavailable(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, StoreError> {
        let conn = db
            .connect()
            .map_err(|e| StoreError::Unavailable(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }
}

fn unavailable(op: &str, e: libsql::Error) -> StoreError {
    StoreError::Unavailable(format!("{op} failed: {e}"))
}

#[async_trait]
impl BlobStore for LibSqlBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        let size = bytes.len() as i64;
        self.conn
            .execute(
                "INSERT INTO blobs (key, data, size, updated_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(key) DO UPDATE SET
                    data = excluded.data,
                    size = excluded.size,
                    updated_at = excluded.updated_at",
                params![key, bytes, size, Utc::now().to_rfc3339()],
            )
            .await
            .map_err(|e| unavailable("put", e))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut rows = self
            .conn
            .query("SELECT data FROM blobs WHERE key = ?1", params![key])
            .await
            .map_err(|e| unavailable("get", e))?;

        match rows.next().await.map_err(|e| unavailable("get", e))? {
            Some(row) => Ok(Some(
                row.get::<Vec<u8>>(0).map_err(|e| unavailable("get", e))?,
            )),
            None => Ok(None),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut rows = self
            .conn
            .query(
                "SELECT key FROM blobs WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key",
                params![prefix],
            )
            .await
            .map_err(|e| unavailable("list", e))?;

        let mut keys = Vec::new();
        while let Some(row) = rows.next().await.map_err(|e| unavailable("list", e))? {
            keys.push(row.get::<String>(0).map_err(|e| unavailable("list", e))?);
        }
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.conn
            .execute("DELETE FROM blobs WHERE key = ?1", params![key])
            .await
            .map_err(|e| unavailable("delete", e))?;
        Ok(())
    }

    async fn usage(&self, prefix: &str) -> Result<StoreUsage, StoreError> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*), COALESCE(SUM(size), 0) FROM blobs
                 WHERE substr(key, 1, length(?1)) = ?1",
                params![prefix],
            )
            .await
            .map_err(|e| unavailable("usage", e))?;

        match rows.next().await.map_err(|e| unavailable("usage", e))? {
            Some(row) => {
                let objects: i64 = row.get(0).map_err(|e| unavailable("usage", e))?;
                let bytes: i64 = row.get(1).map_err(|e| unavailable("usage", e))?;
                Ok(StoreUsage {
                    objects: objects.max(0) as u64,
                    bytes: bytes.max(0) as u64,
                })
            }
            None => Ok(StoreUsage::default()),
        }
    }
}
