//! Cache promotion: folding pull-through-cached content into a snapshot.
//!
//! Distributions that serve purely via fetch-on-request caching populate
//! content records without ever running a sync; none of those records
//! belong to a durable snapshot until this job runs. Like the
//! synchronizer it executes under an exclusive lock on the repository
//! and a shared lock on the remote.

use crate::state::AppState;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Create one new repository version containing the previous content plus
/// everything cached from `remote` since the latest version was created.
pub async fn add_cached_content(
    state: Arc<AppState>,
    repository_id: Uuid,
    remote_id: Uuid,
) -> anyhow::Result<()> {
    let repository = state.store.get_repository(repository_id)?;
    let remote = state.store.get_remote(remote_id)?;

    let latest = repository.latest_version();
    let fresh = state
        .store
        .content_for_remote_since(remote_id, latest.seq_watermark);
    info!(
        repository = %repository.name,
        remote = %remote.name,
        fresh = fresh.len(),
        "Promoting cached content"
    );

    let next: BTreeSet<Uuid> = latest.content.union(&fresh).copied().collect();
    match state.store.create_repository_version(repository_id, next)? {
        Some(version) => info!(
            repository = %repository.name,
            version = version.number,
            content = version.content.len(),
            "Cached content promoted into new repository version"
        ),
        None => info!(repository = %repository.name, "No cached content to promote"),
    }
    Ok(())
}
