//! Browser-facing transport.
//!
//! Provides:
//! - Wire protocol (JSON frames tagged by `type`)
//! - WebSocket transport driving one thread session per connection
//! - REST routes for indexed repositories

pub mod protocol;

#[cfg(feature = "server")]
pub mod repos;

#[cfg(feature = "server")]
pub mod websocket;

pub use protocol::{ClientMessage, ServerMessage};

#[cfg(feature = "server")]
pub use server::{AppState, create_router};

#[cfg(feature = "server")]
mod server {
    use deepagents_runtime::{LangGraphClient, ParsingClient};
    use deepagents_session::RepoRegistry;
    use tower_http::{cors::CorsLayer, trace::TraceLayer};

    use crate::{repos::create_repos_router, websocket::create_ws_router};

    /// Shared server state.
    #[derive(Clone)]
    pub struct AppState {
        /// Unauthenticated runtime client; each connection attaches its
        /// own credential to a clone.
        pub runtime: LangGraphClient,
        pub registry: RepoRegistry,
        pub parsing: ParsingClient,
    }

    /// `/ws` and `/api/repos` with CORS and request tracing.
    #[must_use]
    pub fn create_router(state: AppState) -> axum::Router {
        axum::Router::new()
            .merge(create_repos_router(state.registry.clone()))
            .merge(create_ws_router(state))
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
    }
}
