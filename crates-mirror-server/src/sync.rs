//! Repository synchronization from an upstream sparse registry.
//!
//! Runs as a background job under an exclusive lock on the target
//! repository and a shared lock on the remote. The whole content set of
//! the new snapshot is computed first; a single store call then appends
//! the version, so a failed fetch leaves the previous version untouched
//! and still servable. Network errors are not retried here.

use crate::model::{IndexEntry, RemotePolicy};
use crate::state::AppState;
use anyhow::Context;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Synchronize `repository` from `remote`.
///
/// Upserts are keyed by (name, version) with the checksum governing
/// change detection; archives not yet present locally are fetched,
/// verified, and stored content-addressably. The new repository version
/// is `previous ∪ synced`, or exactly the synced set when `mirror` is
/// true. An unchanged upstream produces no new version.
pub async fn synchronize(
    state: Arc<AppState>,
    repository_id: Uuid,
    remote_id: Uuid,
    mirror: bool,
) -> anyhow::Result<()> {
    let remote = state.store.get_remote(remote_id)?;
    let repository = state.store.get_repository(repository_id)?;
    info!(repository = %repository.name, remote = %remote.name, mirror = mirror, "Starting sync");

    let index_config = state
        .upstream
        .fetch_index_config(&remote.url)
        .await
        .context("fetching upstream config.json")?;

    let names = if remote.crates.is_empty() {
        state
            .upstream
            .fetch_listing(&remote.url)
            .await
            .context("enumerating upstream crates")?
    } else {
        remote.crates.clone()
    };
    info!(count = names.len(), "Synchronizing crates");

    let mut synced: BTreeSet<Uuid> = BTreeSet::new();
    for name in &names {
        let body = state
            .upstream
            .fetch_index_file(&remote.url, name)
            .await
            .with_context(|| format!("fetching index for '{name}'"))?;

        for line in body.lines().filter(|l| !l.trim().is_empty()) {
            let entry: IndexEntry = serde_json::from_str(line)
                .with_context(|| format!("parsing index line for '{name}'"))?;

            // An immediate-policy remote mirrors archives eagerly;
            // on-demand/streamed remotes defer the archive fetch to the
            // first download request.
            if remote.policy == RemotePolicy::Immediate
                && !state.artifacts.contains(&entry.cksum).await
            {
                let bytes = state
                    .upstream
                    .fetch_crate(&index_config.dl, &entry.name, &entry.vers, &entry.cksum)
                    .await
                    .with_context(|| {
                        format!("fetching archive {}-{}", entry.name, entry.vers)
                    })?;
                state
                    .artifacts
                    .put(&entry.cksum, &bytes)
                    .await
                    .with_context(|| {
                        format!("storing archive {}-{}", entry.name, entry.vers)
                    })?;
            }

            let outcome =
                state
                    .store
                    .upsert_content(&repository.domain, entry, Some(remote_id))?;
            if outcome.changed() {
                debug!(crate_name = %name, "Index entry upserted");
            }
            synced.insert(outcome.id());
        }
    }

    let previous = repository.latest_version().content.clone();
    let next = if mirror {
        // Replacement semantics: content gone upstream is dropped.
        synced
    } else {
        previous.union(&synced).copied().collect()
    };

    match state.store.create_repository_version(repository_id, next)? {
        Some(version) => info!(
            repository = %repository.name,
            version = version.number,
            content = version.content.len(),
            "Sync created new repository version"
        ),
        None => info!(repository = %repository.name, "Sync produced no content changes"),
    }
    Ok(())
}
