//! Deep agents web server.
//!
//! Run with: cargo run -p deepagents-server -- --agent-id <id>
//!
//! Then open http://localhost:3000 in your browser.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{response::Html, routing::get};
use clap::Parser;
use deepagents_core::RepoStore;
use deepagents_runtime::{
    Deployment, LangGraphClient, ParsingClient, deployment::DEFAULT_DEPLOYMENT_URL,
    parsing::DEFAULT_PARSING_URL,
};
use deepagents_session::{
    RepoRegistry,
    storage::{MemoryStorage, SqliteStorage},
};
use deepagents_transport::{AppState, create_router};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "deepagents-server")]
#[command(about = "Chat with a deep agent and manage indexed repositories", long_about = None)]
struct Config {
    /// Address to listen on.
    #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1:3000")]
    bind: SocketAddr,

    /// Base URL of the agent runtime.
    #[arg(long, env = "DEPLOYMENT_URL", default_value = DEFAULT_DEPLOYMENT_URL)]
    deployment_url: String,

    /// Agent (assistant) to run.
    #[arg(long, env = "AGENT_ID")]
    agent_id: Option<String>,

    /// Indexed repo database, or `memory` for a throwaway store.
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://deepagents.db")]
    database_url: String,

    /// Base URL of the repository parsing service.
    #[arg(long, env = "PARSING_UI_URL", default_value = DEFAULT_PARSING_URL)]
    parsing_url: String,
}

async fn open_store(database_url: &str) -> anyhow::Result<Arc<dyn RepoStore>> {
    if database_url == "memory" {
        tracing::warn!("indexed repos are kept in memory and lost on exit");
        return Ok(Arc::new(MemoryStorage::new()));
    }
    let storage = SqliteStorage::connect(database_url)
        .await
        .with_context(|| format!("Failed to open database {database_url}"))?;
    Ok(Arc::new(storage))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = Config::parse();

    let deployment = Deployment::new(&config.deployment_url, config.agent_id.as_deref())?;
    tracing::info!(
        deployment_url = %deployment.deployment_url,
        agent_id = %deployment.agent_id,
        "agent runtime configured"
    );

    let state = AppState {
        runtime: LangGraphClient::new(&deployment)?,
        registry: RepoRegistry::new(open_store(&config.database_url).await?),
        parsing: ParsingClient::new(&config.parsing_url)?,
    };

    let app = create_router(state).route("/", get(index_handler));

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;
    tracing::info!("Server listening on http://{}", config.bind);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>Deep Agents</title>
    <style>
        body {
            margin: 0;
            padding: 20px;
            background: #1e1e1e;
            color: #d4d4d4;
            font-family: system-ui, sans-serif;
        }
        h1 { color: #fff; margin-bottom: 10px; }
        .status { color: #888; font-size: 14px; margin-bottom: 10px; }
        .connected { color: #4a4; }
        .disconnected { color: #a44; }
        #layout { display: flex; gap: 20px; height: calc(100vh - 140px); }
        #chat { flex: 2; display: flex; flex-direction: column; }
        #messages { flex: 1; overflow-y: auto; border: 1px solid #333; padding: 10px; }
        #side { flex: 1; overflow-y: auto; border: 1px solid #333; padding: 10px; }
        .msg { margin: 6px 0; white-space: pre-wrap; }
        .human { color: #9cdcfe; }
        .failed { color: #a44; }
        form { display: flex; gap: 6px; margin-top: 8px; }
        input { flex: 1; background: #252526; color: #d4d4d4; border: 1px solid #444; padding: 6px; }
        button { background: #0e639c; color: #fff; border: none; padding: 6px 12px; }
    </style>
</head>
<body>
    <h1>Deep Agents</h1>
    <div class="status" id="status">Connecting...</div>
    <div id="layout">
        <div id="chat">
            <div id="messages"></div>
            <form id="send">
                <input id="content" placeholder="Message the agent" autocomplete="off" />
                <button type="submit">Send</button>
                <button type="button" id="stop">Stop</button>
                <button type="button" id="new">New thread</button>
            </form>
        </div>
        <div id="side">
            <h3>Todos</h3><ul id="todos"></ul>
            <h3>Files</h3><ul id="files"></ul>
            <h3>Repositories</h3>
            <div class="status" id="parsing">Checking index...</div>
            <ul id="repos"></ul>
            <form id="index">
                <input id="repo-url" placeholder="https://github.com/owner/name" />
                <button type="submit">Index</button>
            </form>
            <ul id="progress"></ul>
        </div>
    </div>

    <script>
        const params = new URLSearchParams(window.location.search);
        const status = document.getElementById('status');
        let ws;
        let failed = new Set();

        function list(id, items, render) {
            const el = document.getElementById(id);
            el.innerHTML = '';
            for (const item of items) {
                const li = document.createElement('li');
                li.textContent = render(item);
                el.appendChild(li);
            }
        }

        function text(content) {
            return typeof content === 'string' ? content : JSON.stringify(content);
        }

        function connect() {
            const protocol = window.location.protocol === 'https:' ? 'wss:' : 'ws:';
            ws = new WebSocket(`${protocol}//${window.location.host}/ws?${params}`);

            ws.onopen = () => {
                status.textContent = 'Connected';
                status.className = 'status connected';
            };

            ws.onclose = () => {
                status.textContent = 'Disconnected - reconnecting...';
                status.className = 'status disconnected';
                setTimeout(connect, 2000);
            };

            ws.onmessage = (event) => {
                const msg = JSON.parse(event.data);
                switch (msg.type) {
                    case 'messages': {
                        const el = document.getElementById('messages');
                        el.innerHTML = '';
                        for (const m of msg.messages) {
                            const div = document.createElement('div');
                            div.className = `msg ${m.type}` + (failed.has(m.id) ? ' failed' : '');
                            div.textContent = `${m.type}: ${text(m.content)}`;
                            el.appendChild(div);
                        }
                        el.scrollTop = el.scrollHeight;
                        break;
                    }
                    case 'todos': list('todos', msg.todos, (t) => `[${t.status}] ${t.content}`); break;
                    case 'files': list('files', Object.keys(msg.files), (p) => p); break;
                    case 'repos_changed': list('repos', msg.repos, (r) => `${r.repo_owner}/${r.repo_name}`); break;
                    case 'index_progress': {
                        const li = document.createElement('li');
                        li.textContent = `[${msg.event.type}] ${msg.event.message}`;
                        document.getElementById('progress').appendChild(li);
                        break;
                    }
                    case 'parsing_status':
                        document.getElementById('parsing').textContent =
                            msg.has_indexed_repositories ? 'Repositories indexed' : 'No repositories indexed';
                        break;
                    case 'phase': status.textContent = `Connected - ${msg.phase}`; break;
                    case 'thread_changed':
                        if (msg.thread_id) params.set('thread_id', msg.thread_id); else params.delete('thread_id');
                        history.replaceState(null, '', `?${params}`);
                        break;
                    case 'run_failed':
                        if (msg.message_id && !msg.rolled_back) failed.add(msg.message_id);
                        status.textContent = `Run failed: ${msg.error}`;
                        break;
                    case 'error': status.textContent = `Error: ${msg.message}`; break;
                }
            };
        }

        function send(msg) {
            if (ws && ws.readyState === WebSocket.OPEN) ws.send(JSON.stringify(msg));
        }

        document.getElementById('send').onsubmit = (e) => {
            e.preventDefault();
            const input = document.getElementById('content');
            if (!input.value.trim()) return;
            send({ type: 'send_message', content: input.value });
            input.value = '';
        };
        document.getElementById('stop').onclick = () => send({ type: 'stop' });
        document.getElementById('new').onclick = () => { failed = new Set(); send({ type: 'new_thread' }); };
        document.getElementById('index').onsubmit = (e) => {
            e.preventDefault();
            const input = document.getElementById('repo-url');
            document.getElementById('progress').innerHTML = '';
            send({ type: 'index_repo', github_url: input.value });
            input.value = '';
        };

        connect();
    </script>
</body>
</html>
"#;
