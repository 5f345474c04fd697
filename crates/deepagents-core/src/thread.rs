//! Thread state: messages, todos, files and the rules for merging updates.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Opaque identifier of a server-owned thread.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(String);

impl ThreadId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Server-assigned version marker for a thread's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub checkpoint_id: String,
    #[serde(default)]
    pub checkpoint_ns: String,
}

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Human,
    Ai,
    Tool,
    System,
    #[serde(other)]
    Other,
}

/// Message body: plain text or a list of content blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<Value>),
}

/// A single conversation message.
///
/// Fields the runtime attaches beyond `id`, `type` and `content` (tool
/// calls, sub-agent metadata) are preserved in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub role: Role,
    pub content: MessageContent,
    #[serde(flatten, default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl Message {
    /// Create a human message with a fresh client-side id.
    #[must_use]
    pub fn human(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::Human,
            content: MessageContent::Text(content.into()),
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
}

/// Entry of the agent's task list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    pub content: String,
    pub status: TodoStatus,
}

/// Mapping from file path to full file content.
pub type FileMap = BTreeMap<String, String>;

/// Overlay `update` onto `files`, path by path. Last write wins.
pub fn merge_files(files: &mut FileMap, update: &FileMap) {
    for (path, content) in update {
        files.insert(path.clone(), content.clone());
    }
}

/// Authoritative values of a thread.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreadValues {
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub todos: Vec<TodoItem>,
    #[serde(default)]
    pub files: FileMap,
}

impl ThreadValues {
    /// Apply a full snapshot: messages and todos are replaced, files overlaid.
    pub fn apply_snapshot(&mut self, snapshot: &Self) {
        self.messages.clone_from(&snapshot.messages);
        self.todos.clone_from(&snapshot.todos);
        merge_files(&mut self.files, &snapshot.files);
    }

    /// Apply a partial update produced by one graph node.
    ///
    /// Messages are upserted by id, todos replaced, files overlaid.
    pub fn apply_delta(&mut self, delta: &StateDelta) {
        if let Some(messages) = &delta.messages {
            for msg in messages {
                upsert_message(&mut self.messages, msg);
            }
        }
        if let Some(todos) = &delta.todos {
            self.todos.clone_from(todos);
        }
        if let Some(files) = &delta.files {
            merge_files(&mut self.files, files);
        }
    }
}

fn upsert_message(messages: &mut Vec<Message>, msg: &Message) {
    if !msg.id.is_empty() {
        if let Some(existing) = messages.iter_mut().find(|m| m.id == msg.id) {
            *existing = msg.clone();
            return;
        }
    }
    messages.push(msg.clone());
}

/// Partial thread state carried by an incremental update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<Message>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub todos: Option<Vec<TodoItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<FileMap>,
}

impl StateDelta {
    /// Delta that only touches files.
    #[must_use]
    pub fn files(files: FileMap) -> Self {
        Self {
            files: Some(files),
            ..Self::default()
        }
    }
}

/// State of a thread as returned by the runtime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreadSnapshot {
    #[serde(default)]
    pub values: ThreadValues,
    #[serde(default)]
    pub checkpoint: Option<Checkpoint>,
    #[serde(default)]
    pub next: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(entries: &[(&str, &str)]) -> FileMap {
        entries
            .iter()
            .map(|(p, c)| ((*p).to_string(), (*c).to_string()))
            .collect()
    }

    #[test]
    fn test_merge_files_last_write_wins() {
        let mut state = files(&[("a.md", "one"), ("b.md", "two")]);
        merge_files(&mut state, &files(&[("a.md", "three")]));
        assert_eq!(state, files(&[("a.md", "three"), ("b.md", "two")]));
    }

    #[test]
    fn test_merge_files_commutes_for_distinct_paths() {
        let x = files(&[("x.py", "print(1)")]);
        let y = files(&[("y.py", "print(2)")]);

        let mut left = FileMap::new();
        merge_files(&mut left, &x);
        merge_files(&mut left, &y);

        let mut right = FileMap::new();
        merge_files(&mut right, &y);
        merge_files(&mut right, &x);

        assert_eq!(left, right);
    }

    #[test]
    fn test_apply_delta_is_idempotent() {
        let delta = StateDelta {
            messages: Some(vec![Message::human("hi")]),
            todos: Some(vec![TodoItem {
                content: "plan".into(),
                status: TodoStatus::InProgress,
            }]),
            files: Some(files(&[("notes.md", "draft")])),
        };

        let mut once = ThreadValues::default();
        once.apply_delta(&delta);
        let mut twice = once.clone();
        twice.apply_delta(&delta);

        assert_eq!(once, twice);
        assert_eq!(twice.messages.len(), 1);
    }

    #[test]
    fn test_apply_snapshot_supersedes_optimistic_messages() {
        let mut local = ThreadValues::default();
        local.messages.push(Message::human("pending"));
        local.files.insert("local.md".into(), "mine".into());

        let remote = ThreadValues {
            messages: vec![],
            todos: vec![],
            files: files(&[("remote.md", "theirs")]),
        };
        local.apply_snapshot(&remote);

        assert!(local.messages.is_empty());
        assert_eq!(local.files.len(), 2);
    }

    #[test]
    fn test_message_wire_format() {
        let json = serde_json::json!({
            "id": "m1",
            "type": "ai",
            "content": [{"type": "text", "text": "Hello"}, {"type": "text", "text": " there"}],
            "tool_calls": []
        });
        let msg: Message = serde_json::from_value(json).unwrap();
        assert_eq!(msg.role, Role::Ai);
        assert!(matches!(&msg.content, MessageContent::Blocks(blocks) if blocks.len() == 2));
        assert!(msg.extra.contains_key("tool_calls"));

        let human = serde_json::to_value(Message::human("hey")).unwrap();
        assert_eq!(human["type"], "human");
        assert_eq!(human["content"], "hey");
    }

    #[test]
    fn test_human_messages_get_unique_ids() {
        assert_ne!(Message::human("a").id, Message::human("a").id);
    }
}
