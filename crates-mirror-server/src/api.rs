//! Management API: remotes, repositories, distributions, and task
//! dispatch.
//!
//! The host platform owns full CRUD in a production deployment; this
//! surface covers what operating the mirror requires: creating the three
//! object kinds, triggering synchronization and cache promotion as
//! background tasks (202 + task id), and reading task state. Validation
//! failures surface synchronously, before anything is dispatched.

use crate::error::{AppError, AppResult};
use crate::model::RemotePolicy;
use crate::scheduler::TaskRecord;
use crate::state::AppState;
use crate::{promote, sync};
use axum::{
    extract::{Path as AxumPath, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Deserialize)]
pub struct CreateRemoteRequest {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub policy: RemotePolicy,
    #[serde(default)]
    pub crates: Vec<String>,
}

#[derive(Serialize)]
pub struct RemoteResponse {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    pub policy: RemotePolicy,
}

pub async fn create_remote(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateRemoteRequest>,
) -> AppResult<(StatusCode, Json<RemoteResponse>)> {
    crate::upstream::UpstreamClient::validate_remote_url(&request.url)?;
    let remote = state.store.create_remote(
        &state.config.domain,
        &request.name,
        &request.url,
        request.policy,
        request.crates,
    )?;
    info!(remote = %remote.name, url = %remote.url, "Remote created");
    Ok((
        StatusCode::CREATED,
        Json(RemoteResponse {
            id: remote.id,
            name: remote.name,
            url: remote.url,
            policy: remote.policy,
        }),
    ))
}

#[derive(Deserialize)]
pub struct CreateRepositoryRequest {
    pub name: String,
    #[serde(default)]
    pub remote: Option<String>,
}

#[derive(Serialize)]
pub struct RepositoryResponse {
    pub id: Uuid,
    pub name: String,
    pub latest_version: u64,
}

pub async fn create_repository(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateRepositoryRequest>,
) -> AppResult<(StatusCode, Json<RepositoryResponse>)> {
    let remote = request
        .remote
        .map(|name| state.store.find_remote(&state.config.domain, &name))
        .transpose()?;
    let repository =
        state
            .store
            .create_repository(&state.config.domain, &request.name, remote.map(|r| r.id))?;
    info!(repository = %repository.name, "Repository created");
    Ok((
        StatusCode::CREATED,
        Json(RepositoryResponse {
            id: repository.id,
            latest_version: repository.latest_version().number,
            name: repository.name,
        }),
    ))
}

pub async fn get_repository(
    AxumPath(name): AxumPath<String>,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<RepositoryResponse>> {
    let repository = state.store.find_repository(&state.config.domain, &name)?;
    Ok(Json(RepositoryResponse {
        id: repository.id,
        latest_version: repository.latest_version().number,
        name: repository.name,
    }))
}

#[derive(Deserialize)]
pub struct CreateDistributionRequest {
    pub name: String,
    pub base_path: String,
    #[serde(default)]
    pub repository: Option<String>,
    /// Pin the distribution to a fixed repository version instead of the
    /// repository's latest. Requires `repository`.
    #[serde(default)]
    pub version: Option<u64>,
    #[serde(default)]
    pub remote: Option<String>,
    #[serde(default = "default_allow_uploads")]
    pub allow_uploads: bool,
}

fn default_allow_uploads() -> bool {
    true
}

#[derive(Serialize)]
pub struct DistributionResponse {
    pub id: Uuid,
    pub name: String,
    pub base_path: String,
}

pub async fn create_distribution(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateDistributionRequest>,
) -> AppResult<(StatusCode, Json<DistributionResponse>)> {
    let domain = &state.config.domain;
    let repository = request
        .repository
        .as_deref()
        .map(|name| state.store.find_repository(domain, name))
        .transpose()?;
    let remote = request
        .remote
        .as_deref()
        .map(|name| state.store.find_remote(domain, name))
        .transpose()?;

    let (repository_binding, version_binding) = match (repository, request.version) {
        (Some(repository), Some(number)) => {
            // The pinned version must exist.
            state.store.repository_version(repository.id, number)?;
            (None, Some((repository.id, number)))
        }
        (Some(repository), None) => (Some(repository.id), None),
        (None, Some(_)) => {
            return Err(AppError::BadRequest(
                "A fixed version requires a repository".to_string(),
            ))
        }
        (None, None) => (None, None),
    };

    let distribution = state.store.create_distribution(
        domain,
        &request.name,
        &request.base_path,
        repository_binding,
        version_binding,
        remote.map(|r| r.id),
        request.allow_uploads,
    )?;
    info!(distribution = %distribution.name, base_path = %distribution.base_path, "Distribution created");
    Ok((
        StatusCode::CREATED,
        Json(DistributionResponse {
            id: distribution.id,
            name: distribution.name,
            base_path: distribution.base_path,
        }),
    ))
}

#[derive(Deserialize)]
pub struct SyncRequest {
    #[serde(default)]
    pub remote: Option<String>,
    #[serde(default)]
    pub mirror: bool,
}

#[derive(Serialize)]
pub struct TaskDispatchedResponse {
    pub task: Uuid,
}

/// Trigger an asynchronous synchronization of a repository.
pub async fn sync_repository(
    AxumPath(name): AxumPath<String>,
    State(state): State<Arc<AppState>>,
    Json(request): Json<SyncRequest>,
) -> AppResult<(StatusCode, Json<TaskDispatchedResponse>)> {
    let repository = state.store.find_repository(&state.config.domain, &name)?;
    let remote_id = resolve_remote(&state, request.remote.as_deref(), repository.remote)?;

    let task = state.scheduler.dispatch(
        "sync",
        vec![repository.id],
        vec![remote_id],
        sync::synchronize(state.clone(), repository.id, remote_id, request.mirror),
    );
    Ok((StatusCode::ACCEPTED, Json(TaskDispatchedResponse { task })))
}

#[derive(Deserialize, Default)]
pub struct AddCachedRequest {
    #[serde(default)]
    pub remote: Option<String>,
}

/// Trigger an asynchronous promotion of cached content into a new
/// repository version.
pub async fn add_cached_content(
    AxumPath(name): AxumPath<String>,
    State(state): State<Arc<AppState>>,
    Json(request): Json<AddCachedRequest>,
) -> AppResult<(StatusCode, Json<TaskDispatchedResponse>)> {
    let repository = state.store.find_repository(&state.config.domain, &name)?;
    let remote_id = resolve_remote(&state, request.remote.as_deref(), repository.remote)?;

    let task = state.scheduler.dispatch(
        "add-cached-content",
        vec![repository.id],
        vec![remote_id],
        promote::add_cached_content(state.clone(), repository.id, remote_id),
    );
    Ok((StatusCode::ACCEPTED, Json(TaskDispatchedResponse { task })))
}

/// Resolve the remote for a background operation: the request's remote
/// wins, then the repository's own. Missing both is a validation failure
/// surfaced before any dispatch.
fn resolve_remote(
    state: &AppState,
    requested: Option<&str>,
    repository_remote: Option<Uuid>,
) -> AppResult<Uuid> {
    if let Some(name) = requested {
        return Ok(state.store.find_remote(&state.config.domain, name)?.id);
    }
    repository_remote.ok_or_else(|| {
        AppError::BadRequest(
            "A remote must be specified on the request or the repository".to_string(),
        )
    })
}

pub async fn get_task(
    AxumPath(id): AxumPath<Uuid>,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<TaskRecord>> {
    state
        .scheduler
        .get(id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Task {id} not found")))
}
