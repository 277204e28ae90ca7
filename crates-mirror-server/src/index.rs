//! Sparse index protocol handler.
//!
//! Serves the per-crate index resources of the sparse protocol: the crate
//! name is the final path segment case-folded to lowercase, and the
//! directory-bucketing prefixes (`1/`, `2/`, `3/a/`, `ab/cd/`) are
//! routing sugar only — no validation that the prefix matches the name.
//! Output is one compact JSON object per version, newline-joined, in
//! ascending raw version-string order, served as `text/plain`.

use crate::error::{AppError, AppResult};
use crate::model::{CrateVersion, HasContentSet, IndexEntry, Remote};
use crate::resolve::{ContentSet, RequestContext};
use crate::state::AppState;
use axum::{
    extract::{Path as AxumPath, State},
    http::header,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

/// Serialize index entries to the newline-delimited response body.
fn render_entries(mut entries: Vec<IndexEntry>) -> AppResult<String> {
    entries.sort_by(|a, b| a.vers.cmp(&b.vers));
    let lines: Vec<String> = entries
        .iter()
        .map(IndexEntry::to_line)
        .collect::<Result<_, _>>()?;
    Ok(lines.join("\n"))
}

fn render_versions(versions: Vec<CrateVersion>) -> AppResult<String> {
    render_entries(versions.iter().map(CrateVersion::index_entry).collect())
}

fn text_response(body: String) -> Response {
    ([(header::CONTENT_TYPE, "text/plain")], body).into_response()
}

/// Index root `config.json` for a distribution.
async fn index_config(state: &AppState, ctx: &RequestContext) -> AppResult<Response> {
    Ok(Json(json!({
        "dl": ctx.download_base_url(state),
        "api": ctx.api_base_url(state),
        "auth-required": false,
    }))
    .into_response())
}

/// Fetch a crate's index file from the distribution's remote, fold each
/// line into the metadata store as content associated with that remote,
/// and return the entries. The records become part of a durable snapshot
/// only once a cache promotion runs.
pub(crate) async fn pull_through_index(
    state: &AppState,
    remote: &Remote,
    crate_name: &str,
) -> AppResult<Vec<IndexEntry>> {
    let body = state
        .upstream
        .fetch_index_file(&remote.url, crate_name)
        .await?;

    let mut entries = Vec::new();
    for line in body.lines().filter(|l| !l.trim().is_empty()) {
        let entry: IndexEntry = serde_json::from_str(line).map_err(|e| {
            AppError::InternalError(format!("Invalid index line from upstream: {e}"))
        })?;
        state
            .store
            .upsert_content(&state.config.domain, entry.clone(), Some(remote.id))?;
        entries.push(entry);
    }
    info!(crate_name = %crate_name, remote = %remote.name, count = entries.len(),
        "Cached index entries from remote");
    Ok(entries)
}

/// Sparse index endpoint: `GET /cargo/{base_path}/{*path}`.
///
/// `config.json` is handled here as well since it shares the index root.
pub async fn sparse_index(
    AxumPath((base_path, path)): AxumPath<(String, String)>,
    State(state): State<Arc<AppState>>,
) -> AppResult<Response> {
    let ctx = RequestContext::resolve(&state, &base_path)?;

    if path == "config.json" {
        return index_config(&state, &ctx).await;
    }

    let crate_name = path
        .split('/')
        .next_back()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::BadRequest(format!("Invalid index path: '{path}'")))?
        .to_lowercase();

    debug!(crate_name = %crate_name, path = %path, base_path = %base_path, "Index request");

    match ctx.content_set(&state)? {
        ContentSet::Snapshot(snapshot) => {
            let versions = state
                .store
                .versions_in_set(snapshot.content_set(), &crate_name);
            if !versions.is_empty() {
                return Ok(text_response(render_versions(versions)?));
            }
            // Not in the snapshot: fall back to the remote when one is
            // bound for pull-through caching.
            if let Some(remote) = ctx.remote(&state)? {
                let entries = pull_through_index(&state, &remote, &crate_name).await?;
                return Ok(text_response(render_entries(entries)?));
            }
            Err(AppError::NotFound(format!(
                "Crate '{crate_name}' not found"
            )))
        }
        ContentSet::NoContent => {
            let remote = ctx.remote(&state)?.ok_or_else(|| {
                AppError::NotFound("No content available".to_string())
            })?;
            let entries = pull_through_index(&state, &remote, &crate_name).await?;
            Ok(text_response(render_entries(entries)?))
        }
    }
}
