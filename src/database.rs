//! SQLite database for persistent storage.
//!
//! Holds one row per storage key: each category's pattern set and the
//! compiled artifact cache.

use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::error::{Result, WardenError};
use crate::storage::Storage;

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection.
    ///
    /// Creates the database file and initializes schema if needed.
    pub async fn new(path: &str) -> Result<Self> {
        let db_path = Path::new(path);

        // Create parent directories if needed
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    WardenError::Database(format!("Failed to create database directory: {}", e))
                })?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| WardenError::Database(format!("Failed to connect to database: {}", e)))?;

        let db = Self { pool };
        db.initialize_schema().await?;

        Ok(db)
    }

    /// Create an in-memory database for testing.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .create_if_missing(true);

        // A second connection would see a different in-memory database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| WardenError::Database(format!("Failed to create in-memory db: {}", e)))?;

        let db = Self { pool };
        db.initialize_schema().await?;

        Ok(db)
    }

    /// Initialize database schema.
    async fn initialize_schema(&self) -> Result<()> {
        sqlx::query(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| WardenError::Database(format!("Failed to initialize schema: {}", e)))?;
        Ok(())
    }

    /// Get the underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close all connections.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl Storage for Database {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let row = sqlx::query("SELECT value FROM kv_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| WardenError::Database(format!("Failed to load {}: {}", key, e)))?;

        Ok(row.map(|row| row.get::<Vec<u8>, _>("value")))
    }

    async fn save(&self, key: &str, bytes: &[u8]) -> Result<()> {
        sqlx::query(
            "INSERT INTO kv_store (key, value, updated_at)
             VALUES (?, ?, CURRENT_TIMESTAMP)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = CURRENT_TIMESTAMP",
        )
        .bind(key)
        .bind(bytes)
        .execute(&self.pool)
        .await
        .map_err(|e| WardenError::Database(format!("Failed to save {}: {}", key, e)))?;

        Ok(())
    }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv_store (
    key TEXT PRIMARY KEY NOT NULL,
    value BLOB NOT NULL,
    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#;

#[cfg(test)]
mod tests {
    use crate::database::Database;
    use crate::storage::{Storage, COMPILED_KEY};

    #[tokio::test]
    async fn in_memory_database_works() {
        let db = Database::in_memory().await.expect("should create db");
        assert!(db.load("spam_words").await.expect("should query").is_none());
    }

    #[tokio::test]
    async fn save_and_load_round_trip() {
        let db = Database::in_memory().await.expect("should create db");

        db.save("bad_words", br#"["foo","fo+"]"#)
            .await
            .expect("should save");

        let loaded = db
            .load("bad_words")
            .await
            .expect("should load")
            .expect("should exist");
        assert_eq!(loaded, br#"["foo","fo+"]"#.to_vec());
    }

    #[tokio::test]
    async fn save_overwrites_existing_value() {
        let db = Database::in_memory().await.expect("should create db");

        db.save(COMPILED_KEY, b"first").await.expect("should save");
        db.save(COMPILED_KEY, b"second").await.expect("should save");

        let loaded = db.load(COMPILED_KEY).await.expect("should load");
        assert_eq!(loaded, Some(b"second".to_vec()));
    }

    #[tokio::test]
    async fn file_database_persists_across_connections() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = dir.path().join("nested").join("regex.db");
        let path = path.to_str().expect("utf-8 path");

        {
            let db = Database::new(path).await.expect("should open");
            db.save("watch_words", b"[]").await.expect("should save");
            db.close().await;
        }

        let db = Database::new(path).await.expect("should reopen");
        assert_eq!(
            db.load("watch_words").await.expect("should load"),
            Some(b"[]".to_vec())
        );
    }
}
