//! REST routes for a user's indexed repositories.
//!
//! Every route requires the `x-user-id` header.

use axum::{
    Json, Router,
    extract::{Query, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
};
use deepagents_core::RepoKey;
use deepagents_session::RepoRegistry;
use serde::Deserialize;
use serde_json::{Map, Value, json};

const USER_ID_HEADER: &str = "x-user-id";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("User ID is required")]
    MissingUser,
    #[error("{0}")]
    BadRequest(&'static str),
    #[error("Failed to {0}")]
    Internal(&'static str),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::MissingUser => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

fn user_id(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
        .ok_or(ApiError::MissingUser)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[derive(Debug, Deserialize)]
struct AddRepoRequest {
    #[serde(default)]
    repo_owner: Option<String>,
    #[serde(default)]
    repo_name: Option<String>,
    #[serde(default)]
    metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct RemoveRepoParams {
    owner: Option<String>,
    name: Option<String>,
}

async fn list_repos(
    State(registry): State<RepoRegistry>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user_id(&headers)?;
    let repos = registry.list(&user_id).await.map_err(|e| {
        tracing::error!(%user_id, "Failed to fetch indexed repos: {e}");
        ApiError::Internal("fetch indexed repos")
    })?;
    Ok(Json(json!({ "repos": repos })))
}

async fn add_repo(
    State(registry): State<RepoRegistry>,
    headers: HeaderMap,
    body: Result<Json<AddRepoRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user_id(&headers)?;
    let Json(req) = body.map_err(|e| {
        tracing::error!("Failed to add indexed repo: {e}");
        ApiError::Internal("add indexed repo")
    })?;
    let (Some(owner), Some(name)) = (non_empty(req.repo_owner), non_empty(req.repo_name)) else {
        return Err(ApiError::BadRequest("repo_owner and repo_name are required"));
    };

    let repo = registry
        .add(&RepoKey::new(user_id, owner, name), req.metadata)
        .await
        .map_err(|e| {
            tracing::error!("Failed to add indexed repo: {e}");
            ApiError::Internal("add indexed repo")
        })?;
    Ok(Json(json!({ "repo": repo })))
}

async fn remove_repo(
    State(registry): State<RepoRegistry>,
    headers: HeaderMap,
    Query(params): Query<RemoveRepoParams>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user_id(&headers)?;
    let (Some(owner), Some(name)) = (non_empty(params.owner), non_empty(params.name)) else {
        return Err(ApiError::BadRequest("owner and name parameters are required"));
    };

    registry
        .remove(&RepoKey::new(user_id, owner, name))
        .await
        .map_err(|e| {
            tracing::error!("Failed to remove indexed repo: {e}");
            ApiError::Internal("remove indexed repo")
        })?;
    Ok(Json(json!({ "success": true })))
}

/// Create the `/api/repos` router.
#[must_use]
pub fn create_repos_router(registry: RepoRegistry) -> Router {
    Router::new()
        .route(
            "/api/repos",
            get(list_repos).post(add_repo).delete(remove_repo),
        )
        .with_state(registry)
}
