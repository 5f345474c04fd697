//! Core traits for the agent runtime and repository storage.

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{
    IndexedRepo, RepoKey,
    run_config::{RunConfig, RunInput},
    thread::{Checkpoint, StateDelta, ThreadId, ThreadSnapshot, ThreadValues},
};

/// Incremental event emitted by a run.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Run metadata, sent first.
    Metadata { run_id: String },
    /// Full thread values after a step.
    Values(ThreadValues),
    /// Partial updates keyed by the graph node that produced them.
    Updates(BTreeMap<String, StateDelta>),
    /// The run failed on the runtime side.
    Error { message: String },
    /// The run finished.
    End,
}

/// A submitted run.
pub struct SubmittedRun {
    /// Thread the run belongs to. Newly created if none was given.
    pub thread_id: ThreadId,
    pub events: BoxStream<'static, Result<StreamEvent, RuntimeError>>,
}

impl std::fmt::Debug for SubmittedRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmittedRun")
            .field("thread_id", &self.thread_id)
            .finish_non_exhaustive()
    }
}

/// Agent runtime error.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The runtime refused the request (4xx).
    #[error("Request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("Runtime returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Stream error: {0}")]
    Stream(String),
    #[error("Invalid response: {0}")]
    Decode(String),
}

impl RuntimeError {
    /// Whether the runtime confirmed it did not accept the request.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

/// Client interface of the remote agent runtime.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// Whether an access credential is held.
    fn is_authenticated(&self) -> bool;

    /// Fetch the authoritative state of a thread.
    async fn get_state(&self, thread_id: &ThreadId) -> Result<ThreadSnapshot, RuntimeError>;

    /// Write a partial update into a thread's state.
    async fn update_state(
        &self,
        thread_id: &ThreadId,
        delta: &StateDelta,
    ) -> Result<Option<Checkpoint>, RuntimeError>;

    /// Submit a run. Creates the thread when `thread_id` is `None`.
    async fn submit(
        &self,
        thread_id: Option<&ThreadId>,
        input: &RunInput,
        config: &RunConfig,
    ) -> Result<SubmittedRun, RuntimeError>;

    /// Cancel a run.
    async fn cancel(&self, thread_id: &ThreadId, run_id: &str) -> Result<(), RuntimeError>;
}

/// Storage error.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage error: {0}")]
    Internal(String),
}

/// Trait for indexed repository storage backends.
#[async_trait]
pub trait RepoStore: Send + Sync {
    /// Active repositories of a user, most recently updated first.
    async fn list(&self, user_id: &str) -> Result<Vec<IndexedRepo>, StorageError>;

    /// Insert a repository or reactivate and refresh an existing one.
    async fn upsert(
        &self,
        key: &RepoKey,
        metadata: Option<Map<String, Value>>,
    ) -> Result<IndexedRepo, StorageError>;

    /// Soft-delete a repository. Unknown keys are not an error.
    async fn remove(&self, key: &RepoKey) -> Result<(), StorageError>;
}
