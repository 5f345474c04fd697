//! SQLite indexed repository storage (feature-gated).

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deepagents_core::{
    IndexedRepo, RepoKey,
    traits::{RepoStore, StorageError},
};
use serde_json::{Map, Value};
use sqlx::{
    Row, SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow},
};

const SCHEMA: [&str; 4] = [
    r"
    CREATE TABLE IF NOT EXISTS indexed_repos (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id TEXT NOT NULL,
        repo_owner TEXT NOT NULL,
        repo_name TEXT NOT NULL,
        indexed_at INTEGER NOT NULL,
        last_updated INTEGER NOT NULL,
        is_active INTEGER NOT NULL DEFAULT 1,
        metadata TEXT NOT NULL DEFAULT '{}',
        revision INTEGER NOT NULL DEFAULT 0,
        UNIQUE(user_id, repo_owner, repo_name)
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_indexed_repos_user_id ON indexed_repos(user_id)",
    "CREATE INDEX IF NOT EXISTS idx_indexed_repos_owner_name ON indexed_repos(repo_owner, repo_name)",
    "CREATE INDEX IF NOT EXISTS idx_indexed_repos_active ON indexed_repos(is_active) WHERE is_active = 1",
];

const COLUMNS: &str =
    "id, user_id, repo_owner, repo_name, indexed_at, last_updated, is_active, metadata";

/// SQLite storage implementation.
///
/// Timestamps are stored as microseconds since the Unix epoch.
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

fn db_err(e: sqlx::Error) -> StorageError {
    StorageError::Internal(e.to_string())
}

impl SqliteStorage {
    /// Connect to (and create if missing) a SQLite database.
    ///
    /// # Errors
    /// Returns error if the URL is invalid, the connection fails or the
    /// schema cannot be applied.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| StorageError::Internal(format!("invalid sqlite options: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(db_err)?;

        let storage = Self { pool };
        storage.migrate().await?;
        tracing::info!("indexed repo storage ready at {database_url}");
        Ok(storage)
    }

    #[cfg(test)]
    async fn in_memory() -> Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(db_err)?;
        let storage = Self { pool };
        storage.migrate().await?;
        Ok(storage)
    }

    async fn migrate(&self) -> Result<(), StorageError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        }
        Ok(())
    }
}

fn from_micros(micros: i64) -> Result<DateTime<Utc>, StorageError> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| StorageError::Internal(format!("timestamp out of range: {micros}")))
}

fn repo_from_row(row: &SqliteRow) -> Result<IndexedRepo, StorageError> {
    let metadata: String = row.try_get("metadata").map_err(db_err)?;
    let metadata: Map<String, Value> = serde_json::from_str(&metadata)
        .map_err(|e| StorageError::Internal(format!("invalid metadata: {e}")))?;

    Ok(IndexedRepo {
        id: row.try_get("id").map_err(db_err)?,
        user_id: row.try_get("user_id").map_err(db_err)?,
        repo_owner: row.try_get("repo_owner").map_err(db_err)?,
        repo_name: row.try_get("repo_name").map_err(db_err)?,
        indexed_at: from_micros(row.try_get("indexed_at").map_err(db_err)?)?,
        last_updated: from_micros(row.try_get("last_updated").map_err(db_err)?)?,
        is_active: row.try_get("is_active").map_err(db_err)?,
        metadata,
    })
}

#[async_trait]
impl RepoStore for SqliteStorage {
    async fn list(&self, user_id: &str) -> Result<Vec<IndexedRepo>, StorageError> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM indexed_repos \
             WHERE user_id = ?1 AND is_active = 1 \
             ORDER BY last_updated DESC, revision DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(repo_from_row).collect()
    }

    async fn upsert(
        &self,
        key: &RepoKey,
        metadata: Option<Map<String, Value>>,
    ) -> Result<IndexedRepo, StorageError> {
        let metadata = serde_json::to_string(&metadata.unwrap_or_default())
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        let now = Utc::now().timestamp_micros();

        let row = sqlx::query(&format!(
            "INSERT INTO indexed_repos \
                 (user_id, repo_owner, repo_name, indexed_at, last_updated, is_active, metadata, revision) \
             VALUES (?1, ?2, ?3, ?4, ?4, 1, ?5, \
                 (SELECT COALESCE(MAX(revision), 0) + 1 FROM indexed_repos)) \
             ON CONFLICT(user_id, repo_owner, repo_name) DO UPDATE SET \
                 last_updated = excluded.last_updated, \
                 is_active = 1, \
                 metadata = excluded.metadata, \
                 revision = excluded.revision \
             RETURNING {COLUMNS}"
        ))
        .bind(&key.user_id)
        .bind(&key.repo_owner)
        .bind(&key.repo_name)
        .bind(now)
        .bind(metadata)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        repo_from_row(&row)
    }

    async fn remove(&self, key: &RepoKey) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE indexed_repos SET is_active = 0 \
             WHERE user_id = ?1 AND repo_owner = ?2 AND repo_name = ?3",
        )
        .bind(&key.user_id)
        .bind(&key.repo_owner)
        .bind(&key.repo_name)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_upsert_twice_keeps_one_row() {
        let store = SqliteStorage::in_memory().await.unwrap();
        let key = RepoKey::new("alice", "acme", "repoX");

        let first = store.upsert(&key, None).await.unwrap();
        let second = store.upsert(&key, None).await.unwrap();

        assert_eq!(first.id, second.id);
        assert!(second.last_updated >= first.last_updated);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM indexed_repos")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_soft_delete_and_reactivate() {
        let store = SqliteStorage::in_memory().await.unwrap();
        let key = RepoKey::new("alice", "acme", "repoX");

        let mut meta = Map::new();
        meta.insert("stars".into(), json!(42));
        store.upsert(&key, Some(meta)).await.unwrap();
        store.remove(&key).await.unwrap();
        assert!(store.list("alice").await.unwrap().is_empty());

        let is_active: bool = sqlx::query_scalar("SELECT is_active FROM indexed_repos")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert!(!is_active);

        let repo = store.upsert(&key, None).await.unwrap();
        assert!(repo.is_active);
        assert!(repo.metadata.is_empty());
    }

    #[tokio::test]
    async fn test_remove_unknown_is_noop() {
        let store = SqliteStorage::in_memory().await.unwrap();
        store
            .upsert(&RepoKey::new("alice", "acme", "A"), None)
            .await
            .unwrap();
        store
            .remove(&RepoKey::new("bob", "acme", "A"))
            .await
            .unwrap();
        assert_eq!(store.list("alice").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_orders_by_recency_and_scopes_by_user() {
        let store = SqliteStorage::in_memory().await.unwrap();
        for name in ["A", "B"] {
            store
                .upsert(&RepoKey::new("alice", "acme", name), None)
                .await
                .unwrap();
        }

        let repos = store.list("alice").await.unwrap();
        let names: Vec<&str> = repos.iter().map(|r| r.repo_name.as_str()).collect();
        assert_eq!(names, vec!["B", "A"]);
        assert!(store.list("bob").await.unwrap().is_empty());
    }
}
