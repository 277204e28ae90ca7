//! Shared application state.

use crate::config::Config;
use crate::error::AppResult;
use crate::scheduler::Scheduler;
use crate::storage::ArtifactStore;
use crate::store::RegistryStore;
use crate::upstream::UpstreamClient;
use std::sync::Arc;

/// Application state shared across all request handlers via `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Registry metadata store.
    pub store: Arc<RegistryStore>,
    /// Content-addressed archive storage.
    pub artifacts: Arc<ArtifactStore>,
    /// HTTP client for upstream registries.
    pub upstream: Arc<UpstreamClient>,
    /// Background task scheduler.
    pub scheduler: Arc<Scheduler>,
    /// Application configuration.
    pub config: Arc<Config>,
    /// Origin (scheme://host:port) advertised in index config responses.
    pub api_origin: String,
}

impl AppState {
    pub fn new(config: Config) -> AppResult<Self> {
        let api_origin = format!("http://{}:{}", config.server.host, config.server.port);
        Ok(Self {
            store: Arc::new(RegistryStore::new()),
            artifacts: Arc::new(ArtifactStore::new(&config.storage.data_dir)),
            upstream: Arc::new(UpstreamClient::new(config.upstream_timeout())?),
            scheduler: Arc::new(Scheduler::new()),
            config: Arc::new(config),
            api_origin,
        })
    }
}
