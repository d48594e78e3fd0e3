//! libSQL storage for the processed set.
//!
//! The [`Storage`] struct wraps a local libSQL database recording which media
//! items already produced a post. It is the single source of truth for
//! idempotence: once an id is recorded it is never selected again.
//!
//! **Access rules:**
//! - `photoblog run` / `state mark`: read-write via [`Storage::open`]
//! - `photoblog state list`: read-only via [`Storage::open_readonly`]

mod migrations;

use std::path::Path;

use chrono::{DateTime, Utc};
use libsql::{Connection, Database, params};
use photoblog_shared::{PhotoblogError, ProcessedRecord, Result};

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

fn storage_err(e: impl std::fmt::Display) -> PhotoblogError {
    PhotoblogError::Storage(e.to_string())
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PhotoblogError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` for inspection only.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PhotoblogError::Storage(format!(
                "state database not found: {}",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        PhotoblogError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(PhotoblogError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Processed set
    // -----------------------------------------------------------------------

    /// Whether `item_id` has already produced a post.
    pub async fn is_processed(&self, item_id: &str) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT 1 FROM processed_items WHERE item_id = ?1",
                params![item_id],
            )
            .await
            .map_err(storage_err)?;

        Ok(rows.next().await.map_err(storage_err)?.is_some())
    }

    /// Record `item_id` as processed by the post `post_slug`.
    ///
    /// Returns `false` when the id was already recorded; the first record is kept.
    pub async fn mark_processed(&self, item_id: &str, post_slug: &str) -> Result<bool> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        let inserted = self
            .conn
            .execute(
                "INSERT INTO processed_items (item_id, post_slug, processed_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(item_id) DO NOTHING",
                params![item_id, post_slug, now.as_str()],
            )
            .await
            .map_err(storage_err)?;

        if inserted == 0 {
            tracing::debug!(item_id, "item already recorded");
        }
        Ok(inserted > 0)
    }

    /// The record for one item, if any.
    pub async fn get_processed(&self, item_id: &str) -> Result<Option<ProcessedRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT item_id, post_slug, processed_at FROM processed_items WHERE item_id = ?1",
                params![item_id],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(Some(row_to_record(&row)?)),
            None => Ok(None),
        }
    }

    /// Records, newest first.
    pub async fn list_processed(&self, limit: usize) -> Result<Vec<ProcessedRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT item_id, post_slug, processed_at FROM processed_items
                 ORDER BY processed_at DESC, item_id
                 LIMIT ?1",
                params![limit as i64],
            )
            .await
            .map_err(storage_err)?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            records.push(row_to_record(&row)?);
        }
        Ok(records)
    }

    /// Number of recorded items.
    pub async fn count_processed(&self) -> Result<u64> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM processed_items", params![])
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(row.get::<i64>(0).map_err(storage_err)? as u64),
            None => Ok(0),
        }
    }
}

/// Convert a database row to a [`ProcessedRecord`].
fn row_to_record(row: &libsql::Row) -> Result<ProcessedRecord> {
    Ok(ProcessedRecord {
        item_id: row.get::<String>(0).map_err(storage_err)?,
        post_slug: row.get::<String>(1).map_err(storage_err)?,
        processed_at: {
            let s: String = row.get(2).map_err(storage_err)?;
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| PhotoblogError::Storage(format!("invalid date: {e}")))?
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_db() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("pb_test_{}.db", Uuid::now_v7()))
    }

    async fn test_storage() -> Storage {
        Storage::open(&temp_db()).await.expect("open test db")
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        assert_eq!(storage.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = temp_db();
        let s1 = Storage::open(&tmp).await.expect("first open");
        s1.mark_processed("a", "slug-a").await.unwrap();
        drop(s1);

        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 1);
        assert!(s2.is_processed("a").await.unwrap());
    }

    #[tokio::test]
    async fn mark_then_query() {
        let storage = test_storage().await;
        assert!(!storage.is_processed("img-1").await.unwrap());

        assert!(storage.mark_processed("img-1", "my-title-img1").await.unwrap());
        assert!(storage.is_processed("img-1").await.unwrap());
        assert!(!storage.is_processed("img-2").await.unwrap());

        let record = storage.get_processed("img-1").await.unwrap().unwrap();
        assert_eq!(record.post_slug, "my-title-img1");
    }

    #[tokio::test]
    async fn remarking_keeps_first_record() {
        let storage = test_storage().await;
        assert!(storage.mark_processed("img-1", "first").await.unwrap());
        assert!(!storage.mark_processed("img-1", "second").await.unwrap());

        let record = storage.get_processed("img-1").await.unwrap().unwrap();
        assert_eq!(record.post_slug, "first");
        assert_eq!(storage.count_processed().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn list_respects_limit() {
        let storage = test_storage().await;
        for i in 0..5 {
            storage
                .mark_processed(&format!("img-{i}"), "post")
                .await
                .unwrap();
        }

        assert_eq!(storage.count_processed().await.unwrap(), 5);
        assert_eq!(storage.list_processed(3).await.unwrap().len(), 3);
        assert_eq!(storage.list_processed(50).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = temp_db();
        let rw = Storage::open(&tmp).await.unwrap();
        rw.mark_processed("a", "slug").await.unwrap();
        drop(rw);

        let ro = Storage::open_readonly(&tmp).await.unwrap();
        assert!(ro.is_processed("a").await.unwrap());
        let result = ro.mark_processed("b", "slug").await;
        assert!(result.unwrap_err().to_string().contains("read-only"));
    }

    #[tokio::test]
    async fn readonly_requires_existing_file() {
        let err = Storage::open_readonly(&temp_db()).await.err().unwrap();
        assert_eq!(err.kind(), "StorageError");
    }
}
