//! Distribution resolution and request-scoped context.
//!
//! A [`RequestContext`] is constructed once per call from the request's
//! base path and threaded through the handler, so distribution lookup
//! happens exactly once and no shared handler state is mutated.

use crate::error::{AppError, AppResult};
use crate::model::{Distribution, HasBasePath, HasRemote, Remote, RepositoryVersion};
use crate::state::AppState;
use axum::http::{header, HeaderMap};

/// Result of resolving the content set a distribution serves.
pub enum ContentSet {
    /// The snapshot currently being served.
    Snapshot(RepositoryVersion),
    /// A remote is bound but no repository is: pull-through-only mode
    /// with nothing cached into a snapshot yet. Distinct from failure.
    NoContent,
}

/// Request-scoped context for a distribution base path.
pub struct RequestContext {
    pub distribution: Distribution,
}

impl RequestContext {
    /// Locate the distribution serving `base_path` in the configured
    /// tenant domain. Absence is not-found.
    pub fn resolve(state: &AppState, base_path: &str) -> AppResult<Self> {
        let distribution = state.store.find_distribution(&state.config.domain, base_path)?;
        Ok(Self { distribution })
    }

    /// The repository version this distribution is serving: a bound
    /// repository serves its latest version, a bound fixed version serves
    /// exactly that version.
    pub fn repository_version(&self, state: &AppState) -> AppResult<RepositoryVersion> {
        if let Some(repository_id) = self.distribution.repository {
            let repository = state.store.get_repository(repository_id)?;
            return Ok(repository.latest_version().clone());
        }
        if let Some((repository_id, number)) = self.distribution.repository_version {
            return state.store.repository_version(repository_id, number);
        }
        Err(AppError::NotFound(
            "No repository associated with this index".to_string(),
        ))
    }

    /// Resolve the content set served by this distribution.
    pub fn content_set(&self, state: &AppState) -> AppResult<ContentSet> {
        if self.distribution.remote_id().is_some() && self.distribution.repository.is_none() {
            return Ok(ContentSet::NoContent);
        }
        Ok(ContentSet::Snapshot(self.repository_version(state)?))
    }

    /// The remote bound to this distribution, if any.
    pub fn remote(&self, state: &AppState) -> AppResult<Option<Remote>> {
        match self.distribution.remote_id() {
            Some(id) => Ok(Some(state.store.get_remote(id)?)),
            None => Ok(None),
        }
    }

    /// Download base URL advertised in the index `config.json`. Marker
    /// free, so clients append `/{crate}/{version}/download`.
    pub fn download_base_url(&self, state: &AppState) -> String {
        format!(
            "{}/cargo/{}/api/v1/crates",
            state.api_origin,
            self.distribution.base_path()
        )
    }

    /// API base URL advertised in the index `config.json`.
    pub fn api_base_url(&self, state: &AppState) -> String {
        format!(
            "{}/cargo/{}",
            state.api_origin,
            self.distribution.base_path()
        )
    }

    /// Externally visible URL of an artifact within this distribution.
    pub fn redirect_url(&self, state: &AppState, headers: &HeaderMap, relative_path: &str) -> String {
        format!(
            "{}{}{}/{}",
            content_origin(state, headers),
            state.config.content.path_prefix,
            self.distribution.base_path(),
            relative_path
        )
    }
}

/// Scheme and host of the content tier as seen by the client.
///
/// Forwarded-protocol/forwarded-host metadata wins when present, then the
/// request's own `Host`, then the configured origin. Trusting forwarded
/// headers is an explicit decision for deployments behind a reverse
/// proxy.
pub fn content_origin(state: &AppState, headers: &HeaderMap) -> String {
    let forwarded_proto = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok());
    let host = headers
        .get("x-forwarded-host")
        .and_then(|v| v.to_str().ok())
        .or_else(|| headers.get(header::HOST).and_then(|v| v.to_str().ok()));

    match host {
        Some(host) => format!("{}://{}", forwarded_proto.unwrap_or("http"), host),
        None => state
            .config
            .content
            .origin
            .trim_end_matches('/')
            .to_string(),
    }
}
