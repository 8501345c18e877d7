//! SQLite connection pool and schema management.

use std::path::Path;
use std::time::Duration;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use tracing::{debug, info};

use super::StorageError;

/// Handle to the cloner database. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

const SCHEMA: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS channel_pairs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        donor_channel TEXT NOT NULL,
        target_channel TEXT NOT NULL,
        enabled INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS statistics (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        pair_id INTEGER NOT NULL UNIQUE,
        posts_cloned INTEGER NOT NULL DEFAULT 0,
        last_cloned_at TEXT,
        FOREIGN KEY (pair_id) REFERENCES channel_pairs(id)
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS link_rules (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        pattern TEXT NOT NULL,
        replacement TEXT NOT NULL DEFAULT '',
        enabled INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS button_rules (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        mode TEXT NOT NULL,
        text1 TEXT,
        url1 TEXT,
        text2 TEXT,
        url2 TEXT,
        text3 TEXT,
        url3 TEXT
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS processed_messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        channel_id TEXT NOT NULL,
        message_id INTEGER NOT NULL,
        processed_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
        UNIQUE(channel_id, message_id)
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS user_settings (
        user_id INTEGER PRIMARY KEY,
        lang TEXT NOT NULL DEFAULT 'ru'
    )
    ",
];

/// Columns appended after the first release. Each entry is
/// `(table, column, declaration)`.
const ADDED_COLUMNS: &[(&str, &str, &str)] = &[(
    "channel_pairs",
    "realtime_enabled",
    "INTEGER NOT NULL DEFAULT 1",
)];

impl Database {
    /// Opens (creating if missing) the database file and applies the schema.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        info!("Opening database: {}", path.display());

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Returns the underlying pool for running queries.
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrate(&self) -> Result<(), StorageError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        for (table, column, declaration) in ADDED_COLUMNS {
            self.ensure_column(table, column, declaration).await?;
        }

        info!("Database schema ready");
        Ok(())
    }

    /// Adds `column` to `table` unless it already exists.
    async fn ensure_column(
        &self,
        table: &str,
        column: &str,
        declaration: &str,
    ) -> Result<(), StorageError> {
        let columns: Vec<String> =
            sqlx::query_scalar(&format!("SELECT name FROM pragma_table_info('{table}')"))
                .fetch_all(&self.pool)
                .await?;

        if columns.iter().any(|c| c == column) {
            return Ok(());
        }

        debug!("Adding column {}.{}", table, column);
        sqlx::query(&format!(
            "ALTER TABLE {table} ADD COLUMN {column} {declaration}"
        ))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Deletes pairs, statistics and the dedup ledger; rules too when
    /// `include_rules` is set.
    pub async fn clear_data(&self, include_rules: bool) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM statistics").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM channel_pairs").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM processed_messages")
            .execute(&mut *tx)
            .await?;
        if include_rules {
            sqlx::query("DELETE FROM link_rules").execute(&mut *tx).await?;
            sqlx::query("DELETE FROM button_rules").execute(&mut *tx).await?;
        }
        tx.commit().await?;

        info!("Cleared stored data (include_rules: {})", include_rules);
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::temp_db;
    use super::*;

    #[tokio::test]
    async fn test_open_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cloner.db");

        let first = Database::open(&path).await.unwrap();
        first.add_pair("@donor", "@target").await.unwrap();
        drop(first);

        let second = Database::open(&path).await.unwrap();
        assert_eq!(second.list_pairs().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_migration_adds_realtime_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.db");

        // Old layout without realtime_enabled.
        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await.unwrap();
        sqlx::query(
            "CREATE TABLE channel_pairs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                donor_channel TEXT NOT NULL,
                target_channel TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query("INSERT INTO channel_pairs (donor_channel, target_channel) VALUES ('@a', '@b')")
            .execute(&pool)
            .await
            .unwrap();
        pool.close().await;

        let db = Database::open(&path).await.unwrap();
        let pairs = db.list_pairs().await.unwrap();
        assert_eq!(pairs.len(), 1);
        assert!(pairs[0].realtime_enabled);
    }

    #[tokio::test]
    async fn test_clear_data_keeps_rules_unless_asked() {
        let (db, _dir) = temp_db().await;
        let pair = db.add_pair("@donor", "@target").await.unwrap();
        db.mark_processed("@donor", 1).await.unwrap();
        db.add_link_rule("foo", "bar").await.unwrap();

        db.clear_data(false).await.unwrap();
        assert!(db.get_pair(pair).await.unwrap().is_none());
        assert!(!db.is_processed("@donor", 1).await.unwrap());
        assert_eq!(db.link_rules().await.unwrap().len(), 1);

        db.clear_data(true).await.unwrap();
        assert!(db.link_rules().await.unwrap().is_empty());
    }
}
