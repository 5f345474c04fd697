//! Wire types and server-sent event decoding for the agent runtime API.

use std::collections::BTreeMap;

use deepagents_core::{
    Checkpoint, RunConfig, RunInput, RuntimeError, StateDelta, StreamEvent, ThreadId,
    ThreadSnapshot, ThreadValues,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Stream modes requested for every run.
pub const STREAM_MODES: [&str; 2] = ["values", "updates"];

#[derive(Debug, Serialize)]
pub struct CreateThreadRequest {
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct ThreadResponse {
    pub thread_id: ThreadId,
}

/// Body of `POST /threads/{id}/runs/stream`.
#[derive(Debug, Serialize)]
pub struct RunStreamRequest<'a> {
    pub assistant_id: &'a str,
    pub input: &'a RunInput,
    pub config: &'a RunConfig,
    pub stream_mode: &'a [&'a str],
}

#[derive(Debug, Serialize)]
pub struct UpdateStateRequest<'a> {
    pub values: &'a StateDelta,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStateResponse {
    #[serde(default)]
    pub checkpoint: Option<Checkpoint>,
}

/// `GET /threads/{id}/state`. `values` is `null` for a fresh thread.
#[derive(Debug, Deserialize)]
pub struct StateResponse {
    #[serde(default)]
    pub values: Option<ThreadValues>,
    #[serde(default)]
    pub checkpoint: Option<Checkpoint>,
    #[serde(default)]
    pub next: Vec<String>,
}

impl From<StateResponse> for ThreadSnapshot {
    fn from(res: StateResponse) -> Self {
        Self {
            values: res.values.unwrap_or_default(),
            checkpoint: res.checkpoint,
            next: res.next,
        }
    }
}

#[derive(Debug, Deserialize)]
struct MetadataPayload {
    run_id: String,
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Decode one server-sent event into a stream event.
///
/// Returns `Ok(None)` for events that carry nothing for the session
/// (heartbeats, unknown modes).
///
/// # Errors
/// Returns error if a known event carries a malformed payload.
pub fn decode_event(event: &str, data: &str) -> Result<Option<StreamEvent>, RuntimeError> {
    let decoded = match event {
        "metadata" => {
            let payload: MetadataPayload = parse(data)?;
            StreamEvent::Metadata {
                run_id: payload.run_id,
            }
        }
        "values" => StreamEvent::Values(parse(data)?),
        "updates" => StreamEvent::Updates(decode_updates(data)?),
        "error" => {
            let payload: ErrorPayload = parse(data)?;
            let message = match (payload.error, payload.message) {
                (Some(kind), Some(msg)) => format!("{kind}: {msg}"),
                (Some(s), None) | (None, Some(s)) => s,
                (None, None) => "unknown error".to_string(),
            };
            StreamEvent::Error { message }
        }
        "end" => StreamEvent::End,
        _ => return Ok(None),
    };
    Ok(Some(decoded))
}

/// Node updates: `{node: delta | null}`. Entries that are not objects,
/// such as interrupts, are skipped.
fn decode_updates(data: &str) -> Result<BTreeMap<String, StateDelta>, RuntimeError> {
    let raw: Map<String, Value> = parse(data)?;
    let mut updates = BTreeMap::new();
    for (node, value) in raw {
        if !value.is_object() {
            continue;
        }
        let delta = serde_json::from_value(value)
            .map_err(|e| RuntimeError::Decode(format!("update from node '{node}': {e}")))?;
        updates.insert(node, delta);
    }
    Ok(updates)
}

fn parse<T: serde::de::DeserializeOwned>(data: &str) -> Result<T, RuntimeError> {
    serde_json::from_str(data).map_err(|e| RuntimeError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use deepagents_core::TodoStatus;

    #[test]
    fn test_decode_metadata() {
        let event = decode_event("metadata", r#"{"run_id":"run-1","attempt":1}"#).unwrap();
        assert_eq!(
            event,
            Some(StreamEvent::Metadata {
                run_id: "run-1".into()
            })
        );
    }

    #[test]
    fn test_decode_updates_skips_null_nodes() {
        let data = r#"{
            "planner": {"todos": [{"content": "research", "status": "in_progress"}]},
            "tools": null,
            "__interrupt__": []
        }"#;
        let Some(StreamEvent::Updates(updates)) = decode_event("updates", data).unwrap() else {
            panic!("Wrong event type");
        };
        assert_eq!(updates.len(), 1);
        let todos = updates["planner"].todos.as_ref().unwrap();
        assert_eq!(todos[0].status, TodoStatus::InProgress);
    }

    #[test]
    fn test_decode_values_ignores_unknown_keys() {
        let data = r#"{"messages": [], "files": {"a.md": "x"}, "remaining_steps": 3}"#;
        let Some(StreamEvent::Values(values)) = decode_event("values", data).unwrap() else {
            panic!("Wrong event type");
        };
        assert_eq!(values.files["a.md"], "x");
    }

    #[test]
    fn test_decode_error_and_unknown() {
        let event = decode_event("error", r#"{"error":"GraphRecursionError","message":"limit"}"#)
            .unwrap();
        assert_eq!(
            event,
            Some(StreamEvent::Error {
                message: "GraphRecursionError: limit".into()
            })
        );
        assert_eq!(decode_event("heartbeat", "").unwrap(), None);
    }

    #[test]
    fn test_decode_malformed_values() {
        assert!(matches!(
            decode_event("values", "not json"),
            Err(RuntimeError::Decode(_))
        ));
    }
}
