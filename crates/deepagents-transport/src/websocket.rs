//! WebSocket transport: one thread session per browser connection.

use axum::{
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use deepagents_core::{AgentRuntime, RepoKey, SessionEvent, ThreadId, repo::parse_github_repo};
use deepagents_runtime::{IndexProgress, ParsingClient};
use deepagents_session::{RepoRegistry, SessionError, ThreadSession};
use futures::{SinkExt, StreamExt, stream::BoxStream};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::{broadcast::error::RecvError, mpsc};

use crate::{
    AppState,
    protocol::{ClientMessage, ServerMessage},
};

type Outbox = mpsc::UnboundedSender<ServerMessage>;

/// Query parameters of the upgrade request.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    pub user_id: Option<String>,
    pub access_token: Option<String>,
    pub thread_id: Option<ThreadId>,
}

/// Per-connection handler state.
pub struct Connection<R> {
    session: ThreadSession<R>,
    registry: RepoRegistry,
    parsing: ParsingClient,
    user_id: Option<String>,
    access_token: Option<String>,
}

impl<R> Clone for Connection<R> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
            registry: self.registry.clone(),
            parsing: self.parsing.clone(),
            user_id: self.user_id.clone(),
            access_token: self.access_token.clone(),
        }
    }
}

impl<R> Connection<R>
where
    R: AgentRuntime + 'static,
{
    #[must_use]
    pub fn new(
        runtime: Arc<R>,
        registry: RepoRegistry,
        parsing: ParsingClient,
        user_id: Option<String>,
        access_token: Option<String>,
    ) -> Self {
        let user_id = user_id.filter(|u| !u.is_empty());
        Self {
            session: ThreadSession::new(runtime, user_id.clone(), None),
            registry,
            parsing,
            user_id,
            access_token: access_token.filter(|t| !t.is_empty()),
        }
    }

    #[must_use]
    pub const fn session(&self) -> &ThreadSession<R> {
        &self.session
    }

    /// Handle one client message. Long-running requests are spawned so a
    /// `stop` can always get through.
    pub async fn dispatch(&self, msg: ClientMessage, tx: &Outbox) {
        match msg {
            ClientMessage::Ping => {
                let _ = tx.send(ServerMessage::Pong);
            }
            ClientMessage::SendMessage { content, files } => {
                let session = self.session.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    match session.send_message(content, files).await {
                        Ok(message) => tracing::debug!(message_id = %message.id, "run accepted"),
                        Err(SessionError::Busy) => {
                            let _ = tx.send(ServerMessage::error(SessionError::Busy.to_string()));
                        }
                        // Reported through the session's run_failed event.
                        Err(e) => tracing::debug!("send did not complete: {e}"),
                    }
                });
            }
            ClientMessage::Stop => self.session.stop().await,
            ClientMessage::LoadThread { thread_id } => {
                if let Err(e) = self.session.load_thread(thread_id).await {
                    let _ = tx.send(ServerMessage::error(e.to_string()));
                }
            }
            ClientMessage::NewThread => self.session.new_thread().await,
            ClientMessage::SaveFile { path, content } => {
                if let Err(e) = self.session.save_file(path, content).await {
                    let _ = tx.send(ServerMessage::error(format!("Failed to save file: {e}")));
                }
            }
            ClientMessage::IndexRepo {
                github_url,
                access_token,
            } => {
                let conn = self.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    if let Err(message) = conn.index_repo(&github_url, access_token, &tx).await {
                        let _ = tx.send(ServerMessage::error(message));
                    }
                });
            }
            ClientMessage::ParsingStatus => {
                let conn = self.clone();
                let tx = tx.clone();
                tokio::spawn(async move { conn.send_parsing_status(&tx).await });
            }
            ClientMessage::Query { question, enhanced } => {
                let parsing = self.parsing.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let reply = match parsing.query(&question, enhanced).await {
                        Ok(result) => result.into(),
                        Err(e) => {
                            tracing::error!("Query failed: {e}");
                            ServerMessage::error(format!("Query failed: {e}"))
                        }
                    };
                    let _ = tx.send(reply);
                });
            }
        }
    }

    /// Start indexing, record the repository for the user and relay the
    /// service's progress frames until indexing finishes. The registry
    /// notification refreshes every open repo list.
    async fn index_repo(
        &self,
        github_url: &str,
        access_token: Option<String>,
        tx: &Outbox,
    ) -> Result<(), String> {
        let Some(user_id) = self.user_id.clone() else {
            return Err("User ID is required".to_string());
        };
        let Some((owner, name)) = parse_github_repo(github_url) else {
            return Err(format!("Not a GitHub repository URL: {github_url}"));
        };

        let token = access_token
            .filter(|t| !t.is_empty())
            .or_else(|| self.access_token.clone());

        // Subscribe before starting so early frames are not lost.
        let progress = match self.parsing.index_progress().await {
            Ok(progress) => Some(progress),
            Err(e) => {
                tracing::warn!(%github_url, "Failed to open index progress: {e}");
                None
            }
        };

        self.parsing
            .index_repo(github_url, token.as_deref())
            .await
            .map_err(|e| {
                tracing::error!(%github_url, "Failed to index repository: {e}");
                format!("Failed to index repository: {e}")
            })?;

        self.registry
            .add(&RepoKey::new(user_id, owner, name), None)
            .await
            .map_err(|e| {
                tracing::error!("Failed to add indexed repo: {e}");
                "Failed to add indexed repo".to_string()
            })?;

        match progress {
            Some(mut progress) => {
                while let Some(event) = progress.next().await {
                    if tx.send(ServerMessage::IndexProgress { event }).is_err() {
                        return Ok(());
                    }
                }
            }
            None => {
                let event = IndexProgress::error("Progress connection failed");
                let _ = tx.send(ServerMessage::IndexProgress { event });
            }
        }
        self.send_parsing_status(tx).await;
        Ok(())
    }

    /// Report whether the parsing service holds any index. Failures are
    /// only logged.
    async fn send_parsing_status(&self, tx: &Outbox) {
        match self.parsing.status().await {
            Ok(status) => {
                let _ = tx.send(status.into());
            }
            Err(e) => tracing::warn!("Failed to check parsing status: {e}"),
        }
    }

    async fn send_repos(&self, tx: &Outbox) {
        let Some(user_id) = &self.user_id else {
            return;
        };
        let reply = match self.registry.list(user_id).await {
            Ok(repos) => ServerMessage::ReposChanged { repos },
            Err(e) => {
                tracing::error!(%user_id, "Failed to fetch indexed repos: {e}");
                ServerMessage::error("Failed to fetch indexed repos")
            }
        };
        let _ = tx.send(reply);
    }

    /// Push the repo list whenever the registry reports a change for
    /// this connection's user.
    async fn forward_repo_changes(self, tx: Outbox) {
        let Some(user_id) = self.user_id.clone() else {
            return;
        };
        let mut changes = self.registry.subscribe();
        self.send_repos(&tx).await;
        loop {
            match changes.recv().await {
                Ok(change) if change.user_id == user_id => self.send_repos(&tx).await,
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "repo change receiver lagged");
                    self.send_repos(&tx).await;
                }
                Err(RecvError::Closed) => break,
            }
            if tx.is_closed() {
                break;
            }
        }
    }
}

async fn forward_session_events(mut events: BoxStream<'static, SessionEvent>, tx: Outbox) {
    while let Some(event) = events.next().await {
        if tx.send(event.into()).is_err() {
            break;
        }
    }
}

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, params))
}

async fn handle_socket(socket: WebSocket, state: AppState, params: ConnectParams) {
    let runtime = state
        .runtime
        .clone()
        .with_access_token(params.access_token.clone())
        .with_user_id(params.user_id.clone());
    let conn = Connection::new(
        Arc::new(runtime),
        state.registry.clone(),
        state.parsing.clone(),
        params.user_id,
        params.access_token,
    );
    tracing::info!(user_id = ?conn.user_id, "client connected");

    let (mut sender, mut receiver) = socket.split();

    // Channel for sending messages to the client
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!("Failed to serialize message: {e}");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });
    let events_task = tokio::spawn(forward_session_events(conn.session.subscribe(), tx.clone()));
    let repos_task = tokio::spawn(conn.clone().forward_repo_changes(tx.clone()));
    conn.dispatch(ClientMessage::ParsingStatus, &tx).await;

    if let Some(thread_id) = params.thread_id {
        conn.dispatch(ClientMessage::LoadThread { thread_id }, &tx)
            .await;
    }

    while let Some(msg) = receiver.next().await {
        let msg = match msg {
            Ok(Message::Text(text)) => text.to_string(),
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s,
                Err(_) => continue,
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::error!("WebSocket error: {e}");
                break;
            }
        };

        let client_msg: ClientMessage = match serde_json::from_str(&msg) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("Invalid client message: {e}");
                let _ = tx.send(ServerMessage::error(format!("Invalid message: {e}")));
                continue;
            }
        };
        conn.dispatch(client_msg, &tx).await;
    }

    conn.session.stop().await;
    tracing::info!(user_id = ?conn.user_id, "client disconnected");
    events_task.abort();
    repos_task.abort();
    send_task.abort();
}

/// Create WebSocket router.
#[must_use]
pub fn create_ws_router(state: AppState) -> axum::Router {
    axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .with_state(state)
}
