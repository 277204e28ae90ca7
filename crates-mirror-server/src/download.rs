//! Download resolution: crate name + version to a redirect at the
//! content-serving tier.
//!
//! No archive bytes are proxied here. A known (name, version) resolves to
//! the artifact's stored relative path and answers with a redirect to
//! `content-origin + content-path-prefix + base-path + relative-path`;
//! the origin honors forwarded-protocol/forwarded-host request metadata
//! for deployments behind a reverse proxy.

use crate::error::{AppError, AppResult};
use crate::index::pull_through_index;
use crate::model::{CrateVersion, HasContentSet, Remote};
use crate::resolve::{ContentSet, RequestContext};
use crate::state::AppState;
use crate::validation;
use axum::{
    extract::{Path as AxumPath, State},
    http::HeaderMap,
    response::{IntoResponse, Redirect, Response},
};
use std::sync::Arc;
use tracing::{debug, info};

/// Fetch and store the archive for a cached index entry, so the content
/// tier can serve the redirect target.
async fn pull_through_archive(
    state: &AppState,
    remote: &Remote,
    record: &CrateVersion,
) -> AppResult<()> {
    if state.artifacts.contains(&record.cksum).await {
        return Ok(());
    }
    let index_config = state.upstream.fetch_index_config(&remote.url).await?;
    let bytes = state
        .upstream
        .fetch_crate(&index_config.dl, &record.name, &record.vers, &record.cksum)
        .await?;
    state.artifacts.put(&record.cksum, &bytes).await?;
    info!(crate_name = %record.name, version = %record.vers, "Cached archive from remote");
    Ok(())
}

/// Download endpoint:
/// `GET /cargo/{base_path}/api/v1/crates/{name}/{version}/download`.
pub async fn download_crate(
    AxumPath((base_path, crate_name, version)): AxumPath<(String, String, String)>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> AppResult<Response> {
    validation::validate_crate_name(&crate_name)
        .map_err(|e| AppError::BadRequest(format!("Invalid crate name '{crate_name}': {e}")))?;
    validation::validate_version(&version)
        .map_err(|e| AppError::BadRequest(format!("Invalid version '{version}': {e}")))?;

    debug!(crate_name = %crate_name, version = %version, base_path = %base_path, "Download request");
    let ctx = RequestContext::resolve(&state, &base_path)?;

    let record = match ctx.content_set(&state)? {
        ContentSet::Snapshot(snapshot) => {
            state
                .store
                .version_in_set(snapshot.content_set(), &crate_name, &version)
        }
        ContentSet::NoContent => None,
    };

    let record = match record {
        Some(record) => record,
        None => {
            // Not in the served snapshot: pull through when a remote is
            // bound, populating the content record first.
            let remote = ctx.remote(&state)?.ok_or_else(|| {
                AppError::NotFound(format!(
                    "Crate '{crate_name}' version '{version}' not found"
                ))
            })?;
            pull_through_index(&state, &remote, &crate_name.to_lowercase()).await?;
            state
                .store
                .find_content(&state.config.domain, &crate_name, &version)
                .ok_or_else(|| {
                    AppError::NotFound(format!(
                        "Crate '{crate_name}' version '{version}' not found"
                    ))
                })?
        }
    };

    // Content synced from an on-demand/streamed remote has no archive yet;
    // fetch it on first request so the content tier can serve the target.
    if !state.artifacts.contains(&record.cksum).await {
        if let Some(remote) = ctx.remote(&state)? {
            pull_through_archive(&state, &remote, &record).await?;
        }
    }

    let url = ctx.redirect_url(&state, &headers, &record.relative_path);
    info!(crate_name = %crate_name, version = %version, url = %url, "Redirecting to content tier");
    Ok(Redirect::temporary(&url).into_response())
}
