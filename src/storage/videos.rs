//! `SQLite` store for per-day video submissions.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use thiserror::Error;
use tracing::{debug, info};

/// Errors that can occur while reading or writing submissions.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Failed to prepare database directory: {0}")]
    Io(#[from] std::io::Error),
}

/// One stored video, keyed by `(user_id, day)`.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Submission {
    /// Telegram user id of the submitter.
    pub user_id: i64,

    /// Challenge day, starting at 1.
    pub day: i64,

    /// Encoded reference to the uploaded video.
    pub file_id: String,

    /// RFC 3339 timestamp of when the video was stored.
    pub submitted_at: String,
}

/// Store of challenge submissions.
#[derive(Debug, Clone)]
pub struct VideoStore {
    pool: Pool<Sqlite>,
}

impl VideoStore {
    /// Opens (creating if missing) the database at `path` and ensures the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the database
    /// cannot be opened or migrated.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        info!("Opened submission database at {}", path.display());
        Self::with_pool(pool).await
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub async fn open_in_memory() -> Result<Self, StorageError> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?;

        // Every in-memory connection is its own database, so keep exactly one.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await?;

        Self::with_pool(pool).await
    }

    async fn with_pool(pool: Pool<Sqlite>) -> Result<Self, StorageError> {
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    /// Creates the `videos` table if it does not exist.
    ///
    /// Tables created before `submitted_at` existed get the column added.
    ///
    /// # Errors
    ///
    /// Returns an error if a schema statement fails.
    pub async fn init(&self) -> Result<(), StorageError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS videos (
                user_id INTEGER NOT NULL,
                day INTEGER NOT NULL,
                file_id TEXT NOT NULL,
                submitted_at TEXT NOT NULL DEFAULT '',
                UNIQUE(user_id, day)
            )",
        )
        .execute(&self.pool)
        .await?;

        let columns: Vec<String> = sqlx::query_scalar("SELECT name FROM pragma_table_info('videos')")
            .fetch_all(&self.pool)
            .await?;
        if !columns.iter().any(|c| c == "submitted_at") {
            info!("Adding submitted_at column to existing videos table");
            sqlx::query("ALTER TABLE videos ADD COLUMN submitted_at TEXT NOT NULL DEFAULT ''")
                .execute(&self.pool)
                .await?;
        }

        Ok(())
    }

    /// Stores a video as the user's next day and returns that day.
    ///
    /// The day is one plus the user's current maximum, or 1 for a new user.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn append(&self, user_id: i64, file_id: &str) -> Result<i64, StorageError> {
        let day: i64 = sqlx::query_scalar(
            "INSERT INTO videos (user_id, day, file_id, submitted_at)
             SELECT ?1, COALESCE(MAX(day), 0) + 1, ?2, ?3 FROM videos WHERE user_id = ?1
             RETURNING day",
        )
        .bind(user_id)
        .bind(file_id)
        .bind(Utc::now().to_rfc3339())
        .fetch_one(&self.pool)
        .await?;

        debug!("Stored video for user {} as day {}", user_id, day);
        Ok(day)
    }

    /// Returns the user's submissions in ascending day order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_for_user(&self, user_id: i64) -> Result<Vec<Submission>, StorageError> {
        let rows = sqlx::query_as::<_, Submission>(
            "SELECT user_id, day, file_id, submitted_at FROM videos WHERE user_id = ?1 ORDER BY day",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Returns how many submissions the user has.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn count_for_user(&self, user_id: i64) -> Result<i64, StorageError> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM videos WHERE user_id = ?1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Deletes all of the user's submissions, returning how many were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn clear_user(&self, user_id: i64) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM videos WHERE user_id = ?1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        info!("Cleared {} submissions for user {}", result.rows_affected(), user_id);
        Ok(result.rows_affected())
    }

    /// Closes the underlying pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_days_increase_by_one_per_user() {
        let store = VideoStore::open_in_memory().await.unwrap();

        assert_eq!(store.append(1, "a").await.unwrap(), 1);
        assert_eq!(store.append(1, "b").await.unwrap(), 2);
        assert_eq!(store.append(2, "c").await.unwrap(), 1);
        assert_eq!(store.append(1, "d").await.unwrap(), 3);

        assert_eq!(store.count_for_user(1).await.unwrap(), 3);
        assert_eq!(store.count_for_user(2).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_list_is_day_ordered() {
        let store = VideoStore::open_in_memory().await.unwrap();
        for file in ["first", "second", "third"] {
            store.append(7, file).await.unwrap();
        }

        let rows = store.list_for_user(7).await.unwrap();
        let days: Vec<i64> = rows.iter().map(|r| r.day).collect();
        let files: Vec<&str> = rows.iter().map(|r| r.file_id.as_str()).collect();
        assert_eq!(days, vec![1, 2, 3]);
        assert_eq!(files, vec!["first", "second", "third"]);
        assert!(rows.iter().all(|r| r.user_id == 7 && !r.submitted_at.is_empty()));
    }

    #[tokio::test]
    async fn test_list_unknown_user_is_empty() {
        let store = VideoStore::open_in_memory().await.unwrap();
        assert!(store.list_for_user(99).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clear_restarts_numbering() {
        let store = VideoStore::open_in_memory().await.unwrap();
        store.append(5, "a").await.unwrap();
        store.append(5, "b").await.unwrap();
        store.append(6, "keep").await.unwrap();

        assert_eq!(store.clear_user(5).await.unwrap(), 2);
        assert_eq!(store.count_for_user(6).await.unwrap(), 1);
        assert_eq!(store.append(5, "c").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unique_key_is_enforced() {
        let store = VideoStore::open_in_memory().await.unwrap();
        store.append(3, "a").await.unwrap();

        let duplicate = sqlx::query("INSERT INTO videos (user_id, day, file_id) VALUES (3, 1, 'x')")
            .execute(&store.pool)
            .await;
        assert!(duplicate.is_err());
    }

    #[tokio::test]
    async fn test_legacy_table_gains_submitted_at() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.db");

        let opts = SqliteConnectOptions::new().filename(&path).create_if_missing(true);
        let legacy = SqlitePoolOptions::new().connect_with(opts).await.unwrap();
        sqlx::query("CREATE TABLE videos (user_id INTEGER, day INTEGER, file_id TEXT)")
            .execute(&legacy)
            .await
            .unwrap();
        sqlx::query("INSERT INTO videos VALUES (1, 1, 'old')")
            .execute(&legacy)
            .await
            .unwrap();
        legacy.close().await;

        let store = VideoStore::open(&path).await.unwrap();
        assert_eq!(store.append(1, "new").await.unwrap(), 2);

        let rows = store.list_for_user(1).await.unwrap();
        assert_eq!(rows[0].file_id, "old");
        assert!(rows[0].submitted_at.is_empty());
        assert!(!rows[1].submitted_at.is_empty());

        // Reopening an already migrated table is a no-op.
        store.close().await;
        VideoStore::open(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_open_file_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("users.db");

        let store = VideoStore::open(&path).await.unwrap();
        store.append(1, "a").await.unwrap();
        store.close().await;

        let reopened = VideoStore::open(&path).await.unwrap();
        assert_eq!(reopened.append(1, "b").await.unwrap(), 2);
    }
}
