//! Events published by a thread session.

use serde::{Deserialize, Serialize};

use crate::thread::{FileMap, Message, ThreadId, TodoItem};

/// Phase of a thread session.
///
/// `Idle -> AwaitingCheckpoint -> Submitting -> Streaming -> Idle`, with
/// `Stopped` reachable from every busy phase and every phase falling back
/// to `Idle` on failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    #[default]
    Idle,
    AwaitingCheckpoint,
    Submitting,
    Streaming,
    Stopped,
}

impl SessionPhase {
    /// Whether a run is in flight.
    #[must_use]
    pub const fn is_busy(self) -> bool {
        matches!(
            self,
            Self::AwaitingCheckpoint | Self::Submitting | Self::Streaming
        )
    }
}

/// Observable change to a session's local view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    ThreadChanged { thread_id: Option<ThreadId> },
    Messages { messages: Vec<Message> },
    Todos { todos: Vec<TodoItem> },
    Files { files: FileMap },
    Phase { phase: SessionPhase },
    /// A run failed. `message_id` names the optimistic message that was
    /// rolled back (`rolled_back`) or marked failed.
    RunFailed {
        error: String,
        message_id: Option<String>,
        rolled_back: bool,
    },
}
