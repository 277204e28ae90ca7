//! Tenant-scoped registry metadata store.
//!
//! Canonical record of crate versions, repositories and their immutable
//! snapshot sequence, distributions, and remotes. The relational engine
//! behind a production deployment is an external collaborator; this store
//! keeps the same semantics in process behind a single `RwLock`:
//!
//! - (domain, name, vers) is unique; direct creation of a duplicate is
//!   rejected while synchronization upserts by checksum comparison.
//! - Repository versions are append-only and their content sets are
//!   immutable once created; creating a version whose content equals the
//!   latest is a no-op.
//! - The only legal in-place mutation of a crate version is flipping
//!   `yanked` (checksum-driven sync upserts excepted).

use crate::error::{AppError, AppResult};
use crate::model::{
    CrateVersion, Distribution, IndexEntry, Remote, RemotePolicy, Repository, RepositoryVersion,
};
use crate::validation;
use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

/// Outcome of a checksum-keyed upsert during synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created(Uuid),
    /// Checksum unchanged; nothing was written.
    Unchanged(Uuid),
    /// Checksum differed; metadata was updated in place.
    Updated(Uuid),
}

impl UpsertOutcome {
    pub fn id(&self) -> Uuid {
        match *self {
            UpsertOutcome::Created(id)
            | UpsertOutcome::Unchanged(id)
            | UpsertOutcome::Updated(id) => id,
        }
    }

    pub fn changed(&self) -> bool {
        !matches!(self, UpsertOutcome::Unchanged(_))
    }
}

#[derive(Default)]
struct StoreInner {
    content: HashMap<Uuid, CrateVersion>,
    /// (domain, name, vers) -> content id.
    content_index: HashMap<(String, String, String), Uuid>,
    remotes: HashMap<Uuid, Remote>,
    repositories: HashMap<Uuid, Repository>,
    distributions: HashMap<Uuid, Distribution>,
    /// (domain, base_path) -> distribution id.
    distribution_paths: HashMap<(String, String), Uuid>,
}

/// In-process registry metadata store.
pub struct RegistryStore {
    inner: RwLock<StoreInner>,
    seq: AtomicU64,
}

impl Default for RegistryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
            seq: AtomicU64::new(1),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }

    /// Sequence that the next created record will receive. Snapshots
    /// record this as their watermark; a record postdates a snapshot when
    /// its seq is at or past the snapshot's watermark.
    pub fn current_seq(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }

    // --- remotes ---

    pub fn create_remote(
        &self,
        domain: &str,
        name: &str,
        url: &str,
        policy: RemotePolicy,
        crates: Vec<String>,
    ) -> AppResult<Remote> {
        let mut inner = self.write();
        if inner
            .remotes
            .values()
            .any(|r| r.domain == domain && r.name == name)
        {
            return Err(AppError::BadRequest(format!(
                "Remote '{name}' already exists"
            )));
        }
        let remote = Remote {
            id: Uuid::new_v4(),
            domain: domain.to_string(),
            name: name.to_string(),
            url: url.to_string(),
            policy,
            crates,
        };
        inner.remotes.insert(remote.id, remote.clone());
        Ok(remote)
    }

    pub fn get_remote(&self, id: Uuid) -> AppResult<Remote> {
        self.read()
            .remotes
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Remote {id} not found")))
    }

    pub fn find_remote(&self, domain: &str, name: &str) -> AppResult<Remote> {
        self.read()
            .remotes
            .values()
            .find(|r| r.domain == domain && r.name == name)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Remote '{name}' not found")))
    }

    // --- repositories ---

    /// Create a repository with an empty version 0.
    pub fn create_repository(
        &self,
        domain: &str,
        name: &str,
        remote: Option<Uuid>,
    ) -> AppResult<Repository> {
        let mut inner = self.write();
        if inner
            .repositories
            .values()
            .any(|r| r.domain == domain && r.name == name)
        {
            return Err(AppError::BadRequest(format!(
                "Repository '{name}' already exists"
            )));
        }
        if let Some(remote_id) = remote {
            if !inner.remotes.contains_key(&remote_id) {
                return Err(AppError::NotFound(format!("Remote {remote_id} not found")));
            }
        }
        let repository = Repository {
            id: Uuid::new_v4(),
            domain: domain.to_string(),
            name: name.to_string(),
            remote,
            versions: vec![RepositoryVersion {
                number: 0,
                content: BTreeSet::new(),
                seq_watermark: self.seq.load(Ordering::SeqCst),
                created: Utc::now(),
            }],
        };
        inner.repositories.insert(repository.id, repository.clone());
        Ok(repository)
    }

    pub fn get_repository(&self, id: Uuid) -> AppResult<Repository> {
        self.read()
            .repositories
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Repository {id} not found")))
    }

    pub fn find_repository(&self, domain: &str, name: &str) -> AppResult<Repository> {
        self.read()
            .repositories
            .values()
            .find(|r| r.domain == domain && r.name == name)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Repository '{name}' not found")))
    }

    /// Append a new immutable snapshot whose content is `content`.
    ///
    /// Returns the new version, or `None` when the set equals the latest
    /// version's content (re-running an unchanged sync is a no-op). The
    /// content set is fully computed by the caller before this single
    /// call, so a snapshot either appears complete or not at all.
    pub fn create_repository_version(
        &self,
        repository_id: Uuid,
        content: BTreeSet<Uuid>,
    ) -> AppResult<Option<RepositoryVersion>> {
        let mut inner = self.write();
        let watermark = self.seq.load(Ordering::SeqCst);
        let repository = inner
            .repositories
            .get_mut(&repository_id)
            .ok_or_else(|| AppError::NotFound(format!("Repository {repository_id} not found")))?;

        let latest = repository.latest_version();
        if latest.content == content {
            return Ok(None);
        }
        let version = RepositoryVersion {
            number: latest.number + 1,
            content,
            seq_watermark: watermark,
            created: Utc::now(),
        };
        repository.versions.push(version.clone());
        Ok(Some(version))
    }

    /// Append a single content unit to a repository as a new additive
    /// snapshot. The read-modify-append happens under one write lock, so
    /// a concurrent writer can never observe or produce a partial set.
    pub fn append_content_to_repository(
        &self,
        repository_id: Uuid,
        content_id: Uuid,
    ) -> AppResult<Option<RepositoryVersion>> {
        let mut inner = self.write();
        let watermark = self.seq.load(Ordering::SeqCst);
        let repository = inner
            .repositories
            .get_mut(&repository_id)
            .ok_or_else(|| AppError::NotFound(format!("Repository {repository_id} not found")))?;

        let latest = repository.latest_version();
        if latest.content.contains(&content_id) {
            return Ok(None);
        }
        let mut content = latest.content.clone();
        content.insert(content_id);
        let version = RepositoryVersion {
            number: latest.number + 1,
            content,
            seq_watermark: watermark,
            created: Utc::now(),
        };
        repository.versions.push(version.clone());
        Ok(Some(version))
    }

    pub fn repository_version(
        &self,
        repository_id: Uuid,
        number: u64,
    ) -> AppResult<RepositoryVersion> {
        let inner = self.read();
        let repository = inner
            .repositories
            .get(&repository_id)
            .ok_or_else(|| AppError::NotFound(format!("Repository {repository_id} not found")))?;
        repository
            .versions
            .iter()
            .find(|v| v.number == number)
            .cloned()
            .ok_or_else(|| {
                AppError::NotFound(format!("Repository version {number} not found"))
            })
    }

    // --- distributions ---

    #[allow(clippy::too_many_arguments)]
    pub fn create_distribution(
        &self,
        domain: &str,
        name: &str,
        base_path: &str,
        repository: Option<Uuid>,
        repository_version: Option<(Uuid, u64)>,
        remote: Option<Uuid>,
        allow_uploads: bool,
    ) -> AppResult<Distribution> {
        let mut inner = self.write();
        let path_key = (domain.to_string(), base_path.to_string());
        if inner.distribution_paths.contains_key(&path_key) {
            return Err(AppError::BadRequest(format!(
                "Distribution base path '{base_path}' already in use"
            )));
        }
        if let Some(repo_id) = repository {
            if !inner.repositories.contains_key(&repo_id) {
                return Err(AppError::NotFound(format!("Repository {repo_id} not found")));
            }
        }
        if let Some(remote_id) = remote {
            if !inner.remotes.contains_key(&remote_id) {
                return Err(AppError::NotFound(format!("Remote {remote_id} not found")));
            }
        }
        let distribution = Distribution {
            id: Uuid::new_v4(),
            domain: domain.to_string(),
            name: name.to_string(),
            base_path: base_path.to_string(),
            repository,
            repository_version,
            remote,
            allow_uploads,
        };
        inner.distribution_paths.insert(path_key, distribution.id);
        inner
            .distributions
            .insert(distribution.id, distribution.clone());
        Ok(distribution)
    }

    pub fn find_distribution(&self, domain: &str, base_path: &str) -> AppResult<Distribution> {
        let inner = self.read();
        let id = inner
            .distribution_paths
            .get(&(domain.to_string(), base_path.to_string()))
            .ok_or_else(|| {
                AppError::NotFound(format!("No distribution found for base path '{base_path}'"))
            })?;
        inner
            .distributions
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Distribution {id} not found")))
    }

    // --- content ---

    /// Names and versions reach this store from the network (publish
    /// payloads, upstream index lines); both are validated before any
    /// record or artifact path is derived from them.
    fn validate_entry(entry: &IndexEntry) -> AppResult<()> {
        validation::validate_crate_name(&entry.name)
            .map_err(|e| AppError::BadRequest(format!("Invalid crate name '{}': {e}", entry.name)))?;
        validation::validate_version(&entry.vers)
            .map_err(|e| AppError::BadRequest(format!("Invalid version '{}': {e}", entry.vers)))?;
        Ok(())
    }

    /// Directly create a crate version record.
    ///
    /// A duplicate (domain, name, vers) is rejected; synchronization goes
    /// through [`RegistryStore::upsert_content`] instead.
    pub fn create_content(
        &self,
        domain: &str,
        entry: IndexEntry,
        remote: Option<Uuid>,
    ) -> AppResult<CrateVersion> {
        Self::validate_entry(&entry)?;
        let key = (
            domain.to_string(),
            entry.name.clone(),
            entry.vers.clone(),
        );
        let seq = self.next_seq();
        let mut inner = self.write();
        if inner.content_index.contains_key(&key) {
            return Err(AppError::BadRequest(format!(
                "Package version {} {} already exists",
                entry.name, entry.vers
            )));
        }
        let record = CrateVersion::from_entry(domain, entry, remote, seq);
        inner.content_index.insert(key, record.id);
        inner.content.insert(record.id, record.clone());
        Ok(record)
    }

    /// Upsert a crate version keyed by (domain, name, vers).
    ///
    /// Checksum governs change detection: an unchanged checksum writes
    /// nothing; a differing checksum updates metadata in place. The
    /// record's creation `seq` and id are preserved across updates.
    pub fn upsert_content(
        &self,
        domain: &str,
        entry: IndexEntry,
        remote: Option<Uuid>,
    ) -> AppResult<UpsertOutcome> {
        Self::validate_entry(&entry)?;
        let key = (
            domain.to_string(),
            entry.name.clone(),
            entry.vers.clone(),
        );
        let seq = self.next_seq();
        let mut inner = self.write();
        if let Some(&existing_id) = inner.content_index.get(&key) {
            let existing = inner
                .content
                .get_mut(&existing_id)
                .ok_or_else(|| AppError::InternalError("content index out of sync".to_string()))?;
            if existing.cksum == entry.cksum {
                return Ok(UpsertOutcome::Unchanged(existing_id));
            }
            existing.cksum = entry.cksum;
            existing.yanked = entry.yanked;
            existing.features = entry.features;
            existing.features2 = entry.features2;
            existing.links = entry.links;
            existing.rust_version = entry.rust_version;
            existing.v = entry.v;
            existing.deps = entry.deps;
            return Ok(UpsertOutcome::Updated(existing_id));
        }
        let record = CrateVersion::from_entry(domain, entry, remote, seq);
        let id = record.id;
        inner.content_index.insert(key, id);
        inner.content.insert(id, record);
        Ok(UpsertOutcome::Created(id))
    }

    pub fn get_content(&self, id: Uuid) -> AppResult<CrateVersion> {
        self.read()
            .content
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Content {id} not found")))
    }

    pub fn find_content(&self, domain: &str, name: &str, vers: &str) -> Option<CrateVersion> {
        let inner = self.read();
        inner
            .content_index
            .get(&(domain.to_string(), name.to_string(), vers.to_string()))
            .and_then(|id| inner.content.get(id))
            .cloned()
    }

    /// All versions of `name` within the given content set, ordered by
    /// ascending raw version string.
    pub fn versions_in_set(&self, set: &BTreeSet<Uuid>, name: &str) -> Vec<CrateVersion> {
        let inner = self.read();
        let mut versions: Vec<CrateVersion> = set
            .iter()
            .filter_map(|id| inner.content.get(id))
            .filter(|c| c.name == name)
            .cloned()
            .collect();
        versions.sort_by(|a, b| a.vers.cmp(&b.vers));
        versions
    }

    /// A specific version of `name` within the given content set.
    pub fn version_in_set(
        &self,
        set: &BTreeSet<Uuid>,
        name: &str,
        vers: &str,
    ) -> Option<CrateVersion> {
        let inner = self.read();
        set.iter()
            .filter_map(|id| inner.content.get(id))
            .find(|c| c.name == name && c.vers == vers)
            .cloned()
    }

    /// Content associated with `remote` whose creation sequence postdates
    /// the given snapshot watermark.
    pub fn content_for_remote_since(&self, remote: Uuid, watermark: u64) -> BTreeSet<Uuid> {
        self.read()
            .content
            .values()
            .filter(|c| c.remote == Some(remote) && c.seq >= watermark)
            .map(|c| c.id)
            .collect()
    }

    /// Flip the yanked flag of an existing version. No other field of the
    /// record changes.
    pub fn set_yanked(&self, domain: &str, name: &str, vers: &str, yanked: bool) -> AppResult<()> {
        let mut inner = self.write();
        let id = *inner
            .content_index
            .get(&(domain.to_string(), name.to_string(), vers.to_string()))
            .ok_or_else(|| {
                AppError::NotFound(format!("Package version {name} {vers} not found"))
            })?;
        let record = inner
            .content
            .get_mut(&id)
            .ok_or_else(|| AppError::InternalError("content index out of sync".to_string()))?;
        record.yanked = yanked;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FeatureMap;

    fn entry(name: &str, vers: &str, cksum: &str) -> IndexEntry {
        IndexEntry {
            name: name.to_string(),
            vers: vers.to_string(),
            deps: vec![],
            cksum: cksum.to_string(),
            features: FeatureMap::new(),
            yanked: false,
            links: None,
            v: 1,
            features2: FeatureMap::new(),
            rust_version: None,
        }
    }

    #[test]
    fn duplicate_direct_creation_is_rejected() {
        let store = RegistryStore::new();
        store
            .create_content("default", entry("serde", "1.0.0", "aa"), None)
            .expect("first create succeeds");
        let err = store
            .create_content("default", entry("serde", "1.0.0", "bb"), None)
            .map(|_| ())
            .expect_err("duplicate create must fail");
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn same_name_version_in_other_domain_is_fine() {
        let store = RegistryStore::new();
        store
            .create_content("default", entry("serde", "1.0.0", "aa"), None)
            .expect("create in default domain");
        store
            .create_content("other", entry("serde", "1.0.0", "aa"), None)
            .expect("create in other domain");
    }

    #[test]
    fn upsert_is_keyed_by_checksum() {
        let store = RegistryStore::new();
        let created = store
            .upsert_content("default", entry("serde", "1.0.0", "aa"), None)
            .expect("upsert creates");
        assert!(matches!(created, UpsertOutcome::Created(_)));

        let unchanged = store
            .upsert_content("default", entry("serde", "1.0.0", "aa"), None)
            .expect("upsert with same checksum");
        assert_eq!(unchanged, UpsertOutcome::Unchanged(created.id()));

        let mut changed = entry("serde", "1.0.0", "bb");
        changed.yanked = true;
        let updated = store
            .upsert_content("default", changed, None)
            .expect("upsert with new checksum");
        assert_eq!(updated, UpsertOutcome::Updated(created.id()));

        let record = store.get_content(created.id()).expect("record exists");
        assert_eq!(record.cksum, "bb");
        assert!(record.yanked);
    }

    #[test]
    fn repository_versions_are_append_only_and_deduplicated() {
        let store = RegistryStore::new();
        let repo = store
            .create_repository("default", "mirror", None)
            .expect("create repository");
        assert_eq!(repo.latest_version().number, 0);

        let a = store
            .create_content("default", entry("a", "1.0.0", "aa"), None)
            .expect("content a");
        let set: BTreeSet<Uuid> = [a.id].into_iter().collect();

        let v1 = store
            .create_repository_version(repo.id, set.clone())
            .expect("create version")
            .expect("content changed, version created");
        assert_eq!(v1.number, 1);

        // Same content set again: no new version.
        let none = store
            .create_repository_version(repo.id, set)
            .expect("create version call succeeds");
        assert!(none.is_none());
        assert_eq!(
            store.get_repository(repo.id).expect("repo").latest_version().number,
            1
        );
    }

    #[test]
    fn yank_flips_only_the_flag() {
        let store = RegistryStore::new();
        let created = store
            .create_content("default", entry("serde", "1.0.0", "aa"), None)
            .expect("create");
        store
            .set_yanked("default", "serde", "1.0.0", true)
            .expect("yank");
        let record = store.get_content(created.id).expect("record");
        assert!(record.yanked);
        assert_eq!(record.cksum, "aa");
        assert_eq!(record.vers, "1.0.0");
    }

    #[test]
    fn versions_sort_by_raw_string_not_semver() {
        let store = RegistryStore::new();
        let ids: BTreeSet<Uuid> = ["9.0.0", "10.0.0"]
            .iter()
            .map(|v| {
                store
                    .create_content("default", entry("big", v, v), None)
                    .expect("create")
                    .id
            })
            .collect();
        let versions = store.versions_in_set(&ids, "big");
        // Lexicographic: "10.0.0" < "9.0.0". Documented upstream behavior.
        assert_eq!(versions[0].vers, "10.0.0");
        assert_eq!(versions[1].vers, "9.0.0");
    }

    #[test]
    fn remote_scoped_content_since_watermark() {
        let store = RegistryStore::new();
        let remote = store
            .create_remote("default", "up", "https://example.invalid/index/", Default::default(), vec![])
            .expect("remote");
        let watermark = store.current_seq();
        let cached = store
            .upsert_content("default", entry("late", "1.0.0", "aa"), Some(remote.id))
            .expect("cached content");
        let unrelated = store
            .upsert_content("default", entry("other", "1.0.0", "bb"), None)
            .expect("unrelated content");

        let since = store.content_for_remote_since(remote.id, watermark);
        assert!(since.contains(&cached.id()));
        assert!(!since.contains(&unrelated.id()));
    }
}
