//! Indexed repository registry with change notifications.

use std::sync::Arc;

use deepagents_core::{IndexedRepo, RepoKey, RepoStore, StorageError};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::broadcast;

/// A user's repository list changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReposChanged {
    pub user_id: String,
}

/// Repository store plus a refresh channel for whoever shows the list.
#[derive(Clone)]
pub struct RepoRegistry {
    store: Arc<dyn RepoStore>,
    changes: broadcast::Sender<ReposChanged>,
}

impl RepoRegistry {
    #[must_use]
    pub fn new(store: Arc<dyn RepoStore>) -> Self {
        let (changes, _) = broadcast::channel(64);
        Self { store, changes }
    }

    /// Receive a notification after every successful add or remove.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ReposChanged> {
        self.changes.subscribe()
    }

    /// # Errors
    /// Returns the storage error.
    pub async fn list(&self, user_id: &str) -> Result<Vec<IndexedRepo>, StorageError> {
        self.store.list(user_id).await
    }

    /// # Errors
    /// Returns the storage error; no notification is sent.
    pub async fn add(
        &self,
        key: &RepoKey,
        metadata: Option<Map<String, Value>>,
    ) -> Result<IndexedRepo, StorageError> {
        let repo = self.store.upsert(key, metadata).await?;
        tracing::info!(user_id = %key.user_id, repo = %repo.full_name(), "indexed repo added");
        self.notify(&key.user_id);
        Ok(repo)
    }

    /// # Errors
    /// Returns the storage error; no notification is sent.
    pub async fn remove(&self, key: &RepoKey) -> Result<(), StorageError> {
        self.store.remove(key).await?;
        tracing::info!(
            user_id = %key.user_id,
            repo = %format!("{}/{}", key.repo_owner, key.repo_name),
            "indexed repo removed"
        );
        self.notify(&key.user_id);
        Ok(())
    }

    fn notify(&self, user_id: &str) {
        let _ = self.changes.send(ReposChanged {
            user_id: user_id.to_string(),
        });
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[tokio::test]
    async fn test_mutations_notify_subscribers() {
        let registry = RepoRegistry::new(Arc::new(MemoryStorage::new()));
        let mut rx = registry.subscribe();
        let key = RepoKey::new("alice", "acme", "widgets");

        registry.add(&key, None).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().user_id, "alice");

        registry.remove(&key).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().user_id, "alice");

        assert!(registry.list("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_does_not_notify() {
        let registry = RepoRegistry::new(Arc::new(MemoryStorage::new()));
        let mut rx = registry.subscribe();

        registry.list("alice").await.unwrap();
        assert!(rx.try_recv().is_err());
    }
}
