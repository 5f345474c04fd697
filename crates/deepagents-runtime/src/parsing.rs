//! Client for the repository parsing service.
//!
//! The parsing service indexes GitHub repositories and answers
//! retrieval-augmented questions about them.

use futures::{StreamExt, stream::BoxStream};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Default parsing service address.
pub const DEFAULT_PARSING_URL: &str = "http://localhost:3001";

#[derive(Debug, Error)]
pub enum ParsingError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Parsing service returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("Invalid response: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    #[serde(default)]
    pub has_indexed_repositories: bool,
}

/// Indexing progress frame pushed by the service's WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexProgress {
    /// `progress`, `complete`, `error`, or any other stage name.
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
}

impl IndexProgress {
    /// Locally raised failure frame.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: "error".to_string(),
            message: message.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            progress: None,
        }
    }

    /// Whether indexing is over, successfully or not.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(self.kind.as_str(), "complete" | "error")
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IndexRepoRequest<'a> {
    github_url: &'a str,
    access_token: &'a str,
}

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    question: &'a str,
    enhanced: bool,
}

/// Source passage backing an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySource {
    pub file: String,
    pub content: String,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<QuerySource>>,
}

/// Parsing service client.
#[derive(Debug, Clone)]
pub struct ParsingClient {
    http: reqwest::Client,
    base_url: String,
}

impl ParsingClient {
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(base_url: &str) -> Result<Self, ParsingError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| ParsingError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ParsingError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(ParsingError::Status {
            status: status.as_u16(),
            message,
        })
    }

    /// Whether any repository has been indexed.
    ///
    /// # Errors
    /// Returns error on transport failure or a non-success status.
    pub async fn status(&self) -> Result<ServiceStatus, ParsingError> {
        let response = self
            .http
            .get(format!("{}/api/status", self.base_url))
            .send()
            .await
            .map_err(|e| ParsingError::Transport(e.to_string()))?;
        Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| ParsingError::Decode(e.to_string()))
    }

    /// Start indexing a GitHub repository. Indexing continues in the
    /// service after this returns.
    ///
    /// # Errors
    /// Returns error if the service does not accept the request.
    pub async fn index_repo(
        &self,
        github_url: &str,
        access_token: Option<&str>,
    ) -> Result<(), ParsingError> {
        let response = self
            .http
            .post(format!("{}/api/index-repo", self.base_url))
            .json(&IndexRepoRequest {
                github_url,
                access_token: access_token.unwrap_or_default(),
            })
            .send()
            .await
            .map_err(|e| ParsingError::Transport(e.to_string()))?;
        Self::check(response).await?;
        tracing::info!(%github_url, "repository indexing started");
        Ok(())
    }

    fn progress_url(&self) -> String {
        if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.base_url.clone()
        }
    }

    /// Open the service's progress socket.
    ///
    /// Connect before calling [`Self::index_repo`] so no frame is missed.
    /// The stream ends after a `complete` or `error` frame; a socket that
    /// closes or fails before then yields a final `error` frame.
    ///
    /// # Errors
    /// Returns error if the socket cannot be opened.
    pub async fn index_progress(&self) -> Result<BoxStream<'static, IndexProgress>, ParsingError> {
        let (socket, _) = connect_async(self.progress_url())
            .await
            .map_err(|e| ParsingError::Transport(e.to_string()))?;

        let frames = futures::stream::unfold(Some(socket), |socket| async move {
            let mut socket = socket?;
            loop {
                let text = match socket.next().await {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => {
                        let closed = IndexProgress::error("Progress connection closed");
                        return Some((closed, None));
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        let failed = IndexProgress::error(format!("Progress connection failed: {e}"));
                        return Some((failed, None));
                    }
                };
                match serde_json::from_str::<IndexProgress>(text.as_str()) {
                    Ok(frame) if frame.is_finished() => return Some((frame, None)),
                    Ok(frame) => return Some((frame, Some(socket))),
                    Err(e) => tracing::warn!("Invalid progress message: {e}"),
                }
            }
        });
        Ok(frames.boxed())
    }

    /// Ask a question about the indexed repositories.
    ///
    /// # Errors
    /// Returns error on transport failure, a non-success status or an
    /// undecodable answer.
    pub async fn query(&self, question: &str, enhanced: bool) -> Result<QueryResult, ParsingError> {
        let response = self
            .http
            .post(format!("{}/api/query", self.base_url))
            .json(&QueryRequest { question, enhanced })
            .send()
            .await
            .map_err(|e| ParsingError::Transport(e.to_string()))?;
        Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| ParsingError::Decode(e.to_string()))
    }
}
