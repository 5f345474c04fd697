//! Wire protocol between the browser and the server.

use deepagents_core::{
    FileMap, IndexedRepo, Message, SessionEvent, SessionPhase, ThreadId, TodoItem,
};
use deepagents_runtime::{IndexProgress, QueryResult, ServiceStatus, parsing::QuerySource};
use serde::{Deserialize, Serialize};

/// Message from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Send a user message, optionally attaching files.
    SendMessage {
        content: String,
        #[serde(default)]
        files: Option<FileMap>,
    },
    /// Cancel the in-flight run.
    Stop,
    /// Switch to an existing thread.
    LoadThread { thread_id: ThreadId },
    /// Start over without a thread.
    NewThread,
    /// Save one file into the thread state.
    SaveFile { path: String, content: String },
    /// Ask the parsing service to index a GitHub repository.
    IndexRepo {
        github_url: String,
        #[serde(default)]
        access_token: Option<String>,
    },
    /// Ask whether any repository has been indexed.
    ParsingStatus,
    /// Ask a question about the indexed repositories.
    Query {
        question: String,
        #[serde(default)]
        enhanced: bool,
    },
    /// Ping for keepalive.
    Ping,
}

/// Message from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    ThreadChanged {
        thread_id: Option<ThreadId>,
    },
    Messages {
        messages: Vec<Message>,
    },
    Todos {
        todos: Vec<TodoItem>,
    },
    Files {
        files: FileMap,
    },
    Phase {
        phase: SessionPhase,
    },
    RunFailed {
        error: String,
        message_id: Option<String>,
        rolled_back: bool,
    },
    /// Fresh repository list for the connected user.
    ReposChanged {
        repos: Vec<IndexedRepo>,
    },
    /// Progress frame relayed from the parsing service while indexing.
    IndexProgress {
        event: IndexProgress,
    },
    ParsingStatus {
        has_indexed_repositories: bool,
    },
    QueryResult {
        answer: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sources: Option<Vec<QuerySource>>,
    },
    /// Error message.
    Error {
        message: String,
    },
    /// Pong response.
    Pong,
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

impl From<SessionEvent> for ServerMessage {
    fn from(event: SessionEvent) -> Self {
        match event {
            SessionEvent::ThreadChanged { thread_id } => Self::ThreadChanged { thread_id },
            SessionEvent::Messages { messages } => Self::Messages { messages },
            SessionEvent::Todos { todos } => Self::Todos { todos },
            SessionEvent::Files { files } => Self::Files { files },
            SessionEvent::Phase { phase } => Self::Phase { phase },
            SessionEvent::RunFailed {
                error,
                message_id,
                rolled_back,
            } => Self::RunFailed {
                error,
                message_id,
                rolled_back,
            },
        }
    }
}

impl From<ServiceStatus> for ServerMessage {
    fn from(status: ServiceStatus) -> Self {
        Self::ParsingStatus {
            has_indexed_repositories: status.has_indexed_repositories,
        }
    }
}

impl From<QueryResult> for ServerMessage {
    fn from(result: QueryResult) -> Self {
        Self::QueryResult {
            answer: result.answer,
            sources: result.sources,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_message_parsing() {
        let msg: ClientMessage =
            serde_json::from_value(json!({"type": "send_message", "content": "hi"})).unwrap();
        match msg {
            ClientMessage::SendMessage { content, files } => {
                assert_eq!(content, "hi");
                assert!(files.is_none());
            }
            other => panic!("Wrong message type: {other:?}"),
        }

        let msg: ClientMessage = serde_json::from_value(json!({
            "type": "index_repo",
            "github_url": "https://github.com/acme/widgets"
        }))
        .unwrap();
        assert!(matches!(
            msg,
            ClientMessage::IndexRepo { access_token: None, .. }
        ));

        let msg: ClientMessage =
            serde_json::from_value(json!({"type": "query", "question": "why?"})).unwrap();
        assert!(matches!(msg, ClientMessage::Query { enhanced: false, .. }));

        assert!(serde_json::from_value::<ClientMessage>(json!({"type": "resize"})).is_err());
    }

    #[test]
    fn test_session_event_keeps_wire_shape() {
        let event = SessionEvent::RunFailed {
            error: "boom".into(),
            message_id: Some("m1".into()),
            rolled_back: true,
        };
        let from_session = serde_json::to_value(&event).unwrap();
        let from_server = serde_json::to_value(ServerMessage::from(event)).unwrap();
        assert_eq!(from_session, from_server);
    }

    #[test]
    fn test_query_result_message() {
        let msg = ServerMessage::from(QueryResult {
            answer: "42".into(),
            sources: None,
        });
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "query_result", "answer": "42"})
        );
        assert_eq!(
            serde_json::to_value(ServerMessage::Pong).unwrap(),
            json!({"type": "pong"})
        );
    }

    #[test]
    fn test_index_progress_keeps_service_frame() {
        let event: IndexProgress = serde_json::from_value(json!({
            "type": "progress",
            "message": "Embedding 12 files",
            "timestamp": "2026-01-01T00:00:00Z",
            "progress": 40.0
        }))
        .unwrap();
        let msg = ServerMessage::IndexProgress { event };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({
                "type": "index_progress",
                "event": {
                    "type": "progress",
                    "message": "Embedding 12 files",
                    "timestamp": "2026-01-01T00:00:00Z",
                    "progress": 40.0
                }
            })
        );

        let msg = ServerMessage::from(ServiceStatus {
            has_indexed_repositories: true,
        });
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "parsing_status", "has_indexed_repositories": true})
        );
    }
}
