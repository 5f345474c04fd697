//! Core abstractions for deep agent thread sessions.
//!
//! This crate provides the fundamental building blocks:
//! - Thread state types and their merge rules
//! - `RunConfig` - checkpoint anchoring for submissions
//! - `EventStore` - Broadcast + history for session observers
//! - Runtime and storage traits

pub mod event_store;
pub mod repo;
pub mod run_config;
pub mod session_event;
pub mod thread;
pub mod traits;

pub use event_store::EventStore;
pub use repo::{IndexedRepo, RepoKey};
pub use run_config::{RunConfig, RunInput};
pub use session_event::{SessionEvent, SessionPhase};
pub use thread::{
    Checkpoint, FileMap, Message, Role, StateDelta, ThreadId, ThreadSnapshot, ThreadValues,
    TodoItem, TodoStatus,
};
pub use traits::{AgentRuntime, RepoStore, RuntimeError, StorageError, StreamEvent, SubmittedRun};
