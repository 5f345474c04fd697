//! Run configuration sent alongside a submission.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::thread::{Checkpoint, FileMap, Message};

/// Default graph recursion limit for a run.
pub const DEFAULT_RECURSION_LIMIT: u32 = 100;

/// Configurable bag of a run.
///
/// Checkpoint fields anchor the run to a known version of the thread.
/// Anything else the deployment needs travels in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Configurable {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_ns: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(flatten, default)]
    pub extra: HashMap<String, Value>,
}

/// Configuration for a single run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub recursion_limit: u32,
    #[serde(default)]
    pub configurable: Configurable,
}

impl RunConfig {
    /// Run config with no checkpoint anchoring.
    #[must_use]
    pub fn new(user_id: Option<String>) -> Self {
        Self {
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            configurable: Configurable {
                user_id,
                ..Configurable::default()
            },
        }
    }

    /// Anchor the run to `checkpoint`.
    #[must_use]
    pub fn anchored(mut self, checkpoint: &Checkpoint) -> Self {
        self.configurable.checkpoint_id = Some(checkpoint.checkpoint_id.clone());
        self.configurable.checkpoint_ns = Some(checkpoint.checkpoint_ns.clone());
        self
    }

    #[must_use]
    pub const fn is_anchored(&self) -> bool {
        self.configurable.checkpoint_id.is_some()
    }
}

/// Input of a run: the new messages and, optionally, the client's files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunInput {
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<FileMap>,
}

impl RunInput {
    /// Input for one message. Empty file snapshots are not attached.
    #[must_use]
    pub fn new(message: Message, files: Option<FileMap>) -> Self {
        Self {
            messages: vec![message],
            files: files.filter(|f| !f.is_empty()),
        }
    }
}
