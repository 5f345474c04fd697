//! In-memory indexed repository storage.

use std::{collections::HashMap, sync::RwLock};

use async_trait::async_trait;
use chrono::Utc;
use deepagents_core::{
    IndexedRepo, RepoKey,
    traits::{RepoStore, StorageError},
};
use serde_json::{Map, Value};

struct Entry {
    repo: IndexedRepo,
    revision: u64,
}

#[derive(Default)]
struct Inner {
    repos: HashMap<RepoKey, Entry>,
    next_id: i64,
    revision: u64,
}

/// In-memory storage implementation.
///
/// Useful for development and single-process deployments.
/// Data is lost on restart.
#[derive(Default)]
pub struct MemoryStorage {
    inner: RwLock<Inner>,
}

impl MemoryStorage {
    /// Create a new in-memory storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RepoStore for MemoryStorage {
    async fn list(&self, user_id: &str) -> Result<Vec<IndexedRepo>, StorageError> {
        let inner = self
            .inner
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?;

        let mut active: Vec<&Entry> = inner
            .repos
            .values()
            .filter(|e| e.repo.user_id == user_id && e.repo.is_active)
            .collect();

        // Most recently updated first; later writes win ties.
        active.sort_by(|a, b| {
            b.repo
                .last_updated
                .cmp(&a.repo.last_updated)
                .then(b.revision.cmp(&a.revision))
        });

        Ok(active.into_iter().map(|e| e.repo.clone()).collect())
    }

    async fn upsert(
        &self,
        key: &RepoKey,
        metadata: Option<Map<String, Value>>,
    ) -> Result<IndexedRepo, StorageError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?;

        inner.revision += 1;
        let revision = inner.revision;
        let now = Utc::now();
        let metadata = metadata.unwrap_or_default();

        if let Some(entry) = inner.repos.get_mut(key) {
            entry.repo.last_updated = now;
            entry.repo.is_active = true;
            entry.repo.metadata = metadata;
            entry.revision = revision;
            return Ok(entry.repo.clone());
        }

        inner.next_id += 1;
        let repo = IndexedRepo {
            id: inner.next_id,
            user_id: key.user_id.clone(),
            repo_owner: key.repo_owner.clone(),
            repo_name: key.repo_name.clone(),
            indexed_at: now,
            last_updated: now,
            is_active: true,
            metadata,
        };
        inner.repos.insert(
            key.clone(),
            Entry {
                repo: repo.clone(),
                revision,
            },
        );
        Ok(repo)
    }

    async fn remove(&self, key: &RepoKey) -> Result<(), StorageError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?;

        if let Some(entry) = inner.repos.get_mut(key) {
            entry.repo.is_active = false;
        }
        Ok(())
    }
}
