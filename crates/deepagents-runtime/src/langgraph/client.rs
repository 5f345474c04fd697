//! HTTP + server-sent events client for the agent runtime.

use async_trait::async_trait;
use deepagents_core::{
    AgentRuntime, Checkpoint, RunConfig, RunInput, RuntimeError, StateDelta, StreamEvent,
    SubmittedRun, ThreadId, ThreadSnapshot,
};
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::{RequestBuilder, Response};
use serde_json::Map;

use super::protocol::{
    CreateThreadRequest, RunStreamRequest, STREAM_MODES, StateResponse, ThreadResponse,
    UpdateStateRequest, UpdateStateResponse, decode_event,
};
use crate::Deployment;

/// Agent runtime client.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Clone)]
pub struct LangGraphClient {
    http: reqwest::Client,
    base_url: String,
    assistant_id: String,
    access_token: Option<String>,
    user_id: Option<String>,
}

impl std::fmt::Debug for LangGraphClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LangGraphClient")
            .field("base_url", &self.base_url)
            .field("assistant_id", &self.assistant_id)
            .field("authenticated", &self.access_token.is_some())
            .field("user_id", &self.user_id)
            .finish()
    }
}

impl LangGraphClient {
    /// Create an unauthenticated client for a deployment.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(deployment: &Deployment) -> Result<Self, RuntimeError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| RuntimeError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url: deployment.deployment_url.clone(),
            assistant_id: deployment.agent_id.clone(),
            access_token: None,
            user_id: None,
        })
    }

    /// Attach an access token. Empty tokens are ignored.
    #[must_use]
    pub fn with_access_token(mut self, token: Option<String>) -> Self {
        self.access_token = token.filter(|t| !t.is_empty());
        self
    }

    /// Attach the user id forwarded in the `x-user-id` header.
    #[must_use]
    pub fn with_user_id(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id.filter(|u| !u.is_empty());
        self
    }

    fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        let mut req = self
            .http
            .request(method, format!("{}{path}", self.base_url))
            .header("x-auth-scheme", "langsmith");
        if let Some(user_id) = &self.user_id {
            req = req.header("x-user-id", user_id);
        }
        if let Some(token) = &self.access_token {
            req = req.bearer_auth(token);
        }
        req
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, RuntimeError> {
        let response = req.send().await.map_err(transport)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        let status = status.as_u16();
        if (400..500).contains(&status) {
            Err(RuntimeError::Rejected { status, message })
        } else {
            Err(RuntimeError::Status { status, message })
        }
    }

    async fn create_thread(&self) -> Result<ThreadId, RuntimeError> {
        let req = self
            .request(reqwest::Method::POST, "/threads")
            .json(&CreateThreadRequest {
                metadata: Map::new(),
            });
        let thread: ThreadResponse = self
            .send(req)
            .await?
            .json()
            .await
            .map_err(decode)?;
        tracing::debug!(thread_id = %thread.thread_id, "created thread");
        Ok(thread.thread_id)
    }
}

fn transport(e: reqwest::Error) -> RuntimeError {
    RuntimeError::Transport(e.to_string())
}

fn decode(e: reqwest::Error) -> RuntimeError {
    RuntimeError::Decode(e.to_string())
}

#[async_trait]
impl AgentRuntime for LangGraphClient {
    fn is_authenticated(&self) -> bool {
        self.access_token.is_some()
    }

    async fn get_state(&self, thread_id: &ThreadId) -> Result<ThreadSnapshot, RuntimeError> {
        let req = self.request(reqwest::Method::GET, &format!("/threads/{thread_id}/state"));
        let state: StateResponse = self.send(req).await?.json().await.map_err(decode)?;
        Ok(state.into())
    }

    async fn update_state(
        &self,
        thread_id: &ThreadId,
        delta: &StateDelta,
    ) -> Result<Option<Checkpoint>, RuntimeError> {
        let req = self
            .request(reqwest::Method::POST, &format!("/threads/{thread_id}/state"))
            .json(&UpdateStateRequest { values: delta });
        let res: UpdateStateResponse = self.send(req).await?.json().await.map_err(decode)?;
        Ok(res.checkpoint)
    }

    async fn submit(
        &self,
        thread_id: Option<&ThreadId>,
        input: &RunInput,
        config: &RunConfig,
    ) -> Result<SubmittedRun, RuntimeError> {
        let thread_id = match thread_id {
            Some(id) => id.clone(),
            None => self.create_thread().await?,
        };

        let req = self
            .request(
                reqwest::Method::POST,
                &format!("/threads/{thread_id}/runs/stream"),
            )
            .header("accept", "text/event-stream")
            .json(&RunStreamRequest {
                assistant_id: &self.assistant_id,
                input,
                config,
                stream_mode: &STREAM_MODES,
            });
        let response = self.send(req).await?;

        let events = response
            .bytes_stream()
            .eventsource()
            .filter_map(|res| async move {
                match res {
                    Ok(event) => decode_event(&event.event, &event.data).transpose(),
                    Err(e) => Some(Err(RuntimeError::Stream(e.to_string()))),
                }
            })
            .boxed();

        Ok(SubmittedRun { thread_id, events })
    }

    async fn cancel(&self, thread_id: &ThreadId, run_id: &str) -> Result<(), RuntimeError> {
        let req = self.request(
            reqwest::Method::POST,
            &format!("/threads/{thread_id}/runs/{run_id}/cancel"),
        );
        self.send(req).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deepagents_core::{FileMap, Message};
    use serde_json::json;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_partial_json, header, method, path},
    };

    /// Collect a run's events until the stream ends or reports `End`.
    async fn collect_events(run: SubmittedRun) -> Result<Vec<StreamEvent>, RuntimeError> {
        let mut events = run.events;
        let mut out = Vec::new();
        while let Some(event) = events.next().await {
            let event = event?;
            let done = matches!(event, StreamEvent::End);
            out.push(event);
            if done {
                break;
            }
        }
        Ok(out)
    }

    fn client(server: &MockServer) -> LangGraphClient {
        let deployment = Deployment::new(&server.uri(), Some("deepagent")).unwrap();
        LangGraphClient::new(&deployment)
            .unwrap()
            .with_access_token(Some("token-123".into()))
            .with_user_id(Some("alice".into()))
    }

    #[tokio::test]
    async fn test_get_state_sends_auth_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/threads/t-1/state"))
            .and(header("authorization", "Bearer token-123"))
            .and(header("x-user-id", "alice"))
            .and(header("x-auth-scheme", "langsmith"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "values": {"messages": [], "files": {"plan.md": "# Plan"}},
                "next": [],
                "checkpoint": {"thread_id": "t-1", "checkpoint_ns": "", "checkpoint_id": "cp-9"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let snapshot = client(&server)
            .get_state(&ThreadId::new("t-1"))
            .await
            .unwrap();
        assert_eq!(snapshot.checkpoint.unwrap().checkpoint_id, "cp-9");
        assert_eq!(snapshot.values.files["plan.md"], "# Plan");
    }

    #[tokio::test]
    async fn test_get_state_of_fresh_thread() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/threads/t-new/state"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "values": null,
                "next": [],
                "checkpoint": null
            })))
            .mount(&server)
            .await;

        let snapshot = client(&server)
            .get_state(&ThreadId::new("t-new"))
            .await
            .unwrap();
        assert!(snapshot.checkpoint.is_none());
        assert!(snapshot.values.messages.is_empty());
    }

    #[tokio::test]
    async fn test_client_error_is_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/threads/missing/state"))
            .respond_with(ResponseTemplate::new(404).set_body_string("thread not found"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/threads/broken/state"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = client(&server);
        let err = client.get_state(&ThreadId::new("missing")).await.unwrap_err();
        assert!(err.is_rejection());
        let err = client.get_state(&ThreadId::new("broken")).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Status { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_submit_creates_thread_and_streams() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/threads"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"thread_id": "t-42"})))
            .expect(1)
            .mount(&server)
            .await;

        let sse = concat!(
            "event: metadata\n",
            "data: {\"run_id\": \"run-7\"}\n\n",
            "event: updates\n",
            "data: {\"agent\": {\"files\": {\"report.md\": \"draft\"}}}\n\n",
            "event: values\n",
            "data: {\"messages\": [], \"todos\": [], \"files\": {\"report.md\": \"final\"}}\n\n",
            "event: end\n",
            "data: null\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/threads/t-42/runs/stream"))
            .and(body_partial_json(json!({
                "assistant_id": "deepagent",
                "config": {"recursion_limit": 100, "configurable": {"user_id": "alice"}},
                "stream_mode": ["values", "updates"]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
            .expect(1)
            .mount(&server)
            .await;

        let mut files = FileMap::new();
        files.insert("notes.md".into(), "context".into());
        let input = RunInput::new(Message::human("write a report"), Some(files));
        let config = RunConfig::new(Some("alice".into()));

        let run = client(&server).submit(None, &input, &config).await.unwrap();
        assert_eq!(run.thread_id, ThreadId::new("t-42"));

        let events = collect_events(run).await.unwrap();
        assert_eq!(events.len(), 4);
        assert_eq!(
            events[0],
            StreamEvent::Metadata {
                run_id: "run-7".into()
            }
        );
        assert!(matches!(events[3], StreamEvent::End));
    }

    #[tokio::test]
    async fn test_update_state_returns_checkpoint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/threads/t-1/state"))
            .and(body_partial_json(json!({"values": {"files": {"a.md": "new"}}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "checkpoint": {"checkpoint_id": "cp-10", "checkpoint_ns": ""}
            })))
            .mount(&server)
            .await;

        let mut files = FileMap::new();
        files.insert("a.md".into(), "new".into());
        let checkpoint = client(&server)
            .update_state(&ThreadId::new("t-1"), &StateDelta::files(files))
            .await
            .unwrap();
        assert_eq!(checkpoint.unwrap().checkpoint_id, "cp-10");
    }

    #[tokio::test]
    async fn test_cancel() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/threads/t-1/runs/run-7/cancel"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .cancel(&ThreadId::new("t-1"), "run-7")
            .await
            .unwrap();
    }

    #[test]
    fn test_unauthenticated_without_token() {
        let deployment = Deployment::new("http://localhost:2024", Some("deepagent")).unwrap();
        let client = LangGraphClient::new(&deployment)
            .unwrap()
            .with_access_token(Some(String::new()));
        assert!(!client.is_authenticated());
    }
}
