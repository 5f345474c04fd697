//! Thread sessions and indexed repository storage.
//!
//! Provides:
//! - `ThreadSession` - optimistic sends reconciled against the runtime
//! - `RepoRegistry` - repository records with change notifications
//! - Storage implementations (memory, SQLite)

pub mod registry;
pub mod session;
pub mod storage;

pub use registry::{RepoRegistry, ReposChanged};
pub use session::{SessionError, SessionView, ThreadSession};
