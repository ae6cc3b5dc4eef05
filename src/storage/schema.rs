use async_trait::async_trait;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::tier::Tier;
use super::types::{Record, StoreError, SCHEMA_VERSION};

// ============================================================================
// Durable Tier
// ============================================================================

/// Durable tier: one SQLite file per namespace holding JSON-encoded records.
pub struct SqliteTier {
    pool: SqlitePool,
    path: PathBuf,
}

impl SqliteTier {
    /// Open an existing durable file, or `Ok(None)` when there is none yet.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Corrupt` for a zero-length file, a file that is not
    /// a SQLite database, or one written by a newer schema version.
    pub async fn open_existing(path: &Path) -> Result<Option<Self>, StoreError> {
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.len() == 0 => {
                return Err(StoreError::corrupt(path, "zero-length file"));
            }
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::Io(e)),
        }
        Self::connect(path, false).await.map(Some)
    }

    /// Open the durable file for writing, creating it (and its directory)
    /// when missing.
    ///
    /// A file that would be reported as corrupt (zero-length, not a database,
    /// newer schema) is deleted and replaced by an empty one.
    pub async fn create(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if let Ok(meta) = tokio::fs::metadata(path).await {
            if meta.len() == 0 {
                remove_database_files(path).await?;
            }
        }
        match Self::connect(path, true).await {
            Err(e) if e.is_corrupt() => {
                tracing::warn!(path = %path.display(), error = %e, "Replacing corrupt durable tier");
                remove_database_files(path).await?;
                Self::connect(path, true).await
            }
            result => result,
        }
    }

    async fn connect(path: &Path, create: bool) -> Result<Self, StoreError> {
        // busy_timeout=5000: wait for a lock held by another process instead of
        // failing immediately with SQLITE_BUSY.
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(create)
            .busy_timeout(Duration::from_secs(5));
        // Writes happen from one task at a time per namespace
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(|e| classify(e, path))?;

        let tier = Self {
            pool,
            path: path.to_path_buf(),
        };
        if let Err(e) = tier.migrate().await {
            tier.close().await;
            return Err(e);
        }
        Ok(tier)
    }

    /// Create the records table and stamp the schema version.
    ///
    /// Runs in one transaction; re-running on an existing file is a no-op.
    async fn migrate(&self) -> Result<(), StoreError> {
        let (version,): (i64,) = sqlx::query_as("PRAGMA user_version")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| classify(e, &self.path))?;

        if version > i64::from(SCHEMA_VERSION) {
            return Err(StoreError::corrupt(
                &self.path,
                format!(
                    "schema version {} is newer than supported version {}",
                    version, SCHEMA_VERSION
                ),
            ));
        }

        let mut tx = self.pool.begin().await.map_err(|e| classify(e, &self.path))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                key TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                value TEXT NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(|e| classify(e, &self.path))?;

        // PRAGMA values cannot be bound as parameters
        sqlx::query(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))
            .execute(&mut *tx)
            .await
            .map_err(|e| classify(e, &self.path))?;

        tx.commit().await.map_err(|e| classify(e, &self.path))?;
        Ok(())
    }

    /// Close the connection pool, flushing pending writes.
    pub async fn close(self) {
        self.pool.close().await;
    }

    fn decode(&self, key: &str, value: &str) -> Result<Record, StoreError> {
        serde_json::from_str(value).map_err(|e| {
            StoreError::corrupt(
                &self.path,
                format!("undecodable record '{}': {}", key, e),
            )
        })
    }
}

/// Delete a database file and its journal siblings; missing files are fine.
async fn remove_database_files(path: &Path) -> Result<(), StoreError> {
    for suffix in ["", "-wal", "-shm", "-journal"] {
        let mut name = path.as_os_str().to_owned();
        name.push(suffix);
        match tokio::fs::remove_file(PathBuf::from(name)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::Io(e)),
        }
    }
    Ok(())
}

/// Map SQLite errors that mean "this file is not usable" to `Corrupt`.
fn classify(err: sqlx::Error, path: &Path) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        let message = db_err.message().to_lowercase();
        // SQLITE_NOTADB (26) and SQLITE_CORRUPT (11)
        if message.contains("file is not a database")
            || message.contains("malformed")
            || message.contains("file is encrypted")
        {
            return StoreError::corrupt(path, db_err.message());
        }
    }
    StoreError::Database(err)
}

#[async_trait]
impl Tier for SqliteTier {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    async fn entries(&self) -> Result<Vec<(String, Record)>, StoreError> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT key, value FROM records ORDER BY key")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| classify(e, &self.path))?;

        rows.into_iter()
            .map(|(key, value)| {
                let record = self.decode(&key, &value)?;
                Ok((key, record))
            })
            .collect()
    }

    /// Overwrite the whole file's contents in a single transaction, so a
    /// crash mid-save leaves the previous contents intact.
    async fn replace_all(&mut self, entries: &[(String, Record)]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| classify(e, &self.path))?;

        sqlx::query("DELETE FROM records")
            .execute(&mut *tx)
            .await
            .map_err(|e| classify(e, &self.path))?;

        for (key, record) in entries {
            let value = serde_json::to_string(record)?;
            sqlx::query("INSERT INTO records (key, kind, value) VALUES (?, ?, ?)")
                .bind(key)
                .bind(record.kind())
                .bind(&value)
                .execute(&mut *tx)
                .await
                .map_err(|e| classify(e, &self.path))?;
        }

        tx.commit().await.map_err(|e| classify(e, &self.path))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tier::{copy_tier, MemoryTier};
    use crate::storage::types::FeedRevalidationState;

    fn record(etag: &str) -> Record {
        Record::Feed(FeedRevalidationState {
            etag: Some(etag.to_string()),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_open_existing_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let result = SqliteTier::open_existing(&dir.path().join("records.db"))
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_zero_length_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.db");
        std::fs::write(&path, b"").unwrap();

        let err = SqliteTier::open_existing(&path).await.err().unwrap();
        assert!(err.is_corrupt(), "expected Corrupt, got {:?}", err);
    }

    #[tokio::test]
    async fn test_garbage_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.db");
        std::fs::write(&path, vec![0xAB; 4096]).unwrap();

        let err = SqliteTier::open_existing(&path).await.err().unwrap();
        assert!(err.is_corrupt(), "expected Corrupt, got {:?}", err);
    }

    #[tokio::test]
    async fn test_create_replaces_zero_length_leftover() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.db");
        std::fs::write(&path, b"").unwrap();

        let tier = SqliteTier::create(&path).await.unwrap();
        assert!(tier.entries().await.unwrap().is_empty());
        tier.close().await;
    }

    #[tokio::test]
    async fn test_create_replaces_garbage_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.db");
        std::fs::write(&path, vec![b'x'; 4096]).unwrap();
        std::fs::write(dir.path().join("records.db-wal"), b"stale").unwrap();

        let mut tier = SqliteTier::create(&path).await.unwrap();
        assert!(tier.entries().await.unwrap().is_empty());
        tier.replace_all(&[("k".to_string(), record("v1"))]).await.unwrap();
        tier.close().await;

        let tier = SqliteTier::open_existing(&path).await.unwrap().unwrap();
        assert_eq!(tier.entries().await.unwrap().len(), 1);
        tier.close().await;
    }

    #[tokio::test]
    async fn test_create_replaces_newer_schema_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.db");

        let tier = SqliteTier::create(&path).await.unwrap();
        sqlx::query(&format!("PRAGMA user_version = {}", SCHEMA_VERSION + 1))
            .execute(&tier.pool)
            .await
            .unwrap();
        tier.close().await;

        let tier = SqliteTier::create(&path).await.unwrap();
        assert!(tier.entries().await.unwrap().is_empty());
        tier.close().await;
        assert!(SqliteTier::open_existing(&path).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_write_then_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ns").join("records.db");

        let mut tier = SqliteTier::create(&path).await.unwrap();
        tier.replace_all(&[("k".to_string(), record("v1"))]).await.unwrap();
        tier.replace_all(&[("k".to_string(), record("v2"))]).await.unwrap();
        tier.close().await;

        let tier = SqliteTier::open_existing(&path).await.unwrap().unwrap();
        assert_eq!(
            tier.entries().await.unwrap(),
            vec![("k".to_string(), record("v2"))]
        );
        tier.close().await;
    }

    #[tokio::test]
    async fn test_replace_all_is_overwrite_not_merge() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.db");

        let mut tier = SqliteTier::create(&path).await.unwrap();
        tier.replace_all(&[("old".to_string(), record("old"))]).await.unwrap();

        let mut memory = MemoryTier::new();
        memory.insert("new".into(), record("new"));
        copy_tier(&memory, &mut tier).await.unwrap();

        let entries = tier.entries().await.unwrap();
        assert_eq!(entries, vec![("new".to_string(), record("new"))]);
        tier.close().await;
    }

    #[tokio::test]
    async fn test_undecodable_value_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.db");

        let tier = SqliteTier::create(&path).await.unwrap();
        sqlx::query("INSERT INTO records (key, kind, value) VALUES ('bad', 'item', '{nope')")
            .execute(&tier.pool)
            .await
            .unwrap();

        let err = tier.entries().await.err().unwrap();
        assert!(err.is_corrupt());
        tier.close().await;
    }

    #[tokio::test]
    async fn test_newer_schema_version_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.db");

        let tier = SqliteTier::create(&path).await.unwrap();
        sqlx::query(&format!("PRAGMA user_version = {}", SCHEMA_VERSION + 1))
            .execute(&tier.pool)
            .await
            .unwrap();
        tier.close().await;

        let err = SqliteTier::open_existing(&path).await.err().unwrap();
        assert!(err.is_corrupt());
    }
}
