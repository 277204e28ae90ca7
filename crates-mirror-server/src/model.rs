//! Package metadata model and sparse-index wire schema.
//!
//! [`IndexEntry`] / [`IndexDependency`] are the exact per-line JSON shape
//! of the sparse protocol: field declaration order here is serialization
//! order on the wire, so it must stay `name, vers, deps, cksum, features,
//! yanked, links, v`, with `features2` and `rust_version` trailing and
//! emitted only when set. [`CrateVersion`] is the stored record behind an
//! entry, carrying the bookkeeping the store and the promoter need.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Feature map: feature name to the list of features/dependencies it
/// enables. Insertion order is preserved through serialization.
pub type FeatureMap = IndexMap<String, Vec<String>>;

/// Dependency type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    #[default]
    Normal,
    Dev,
    Build,
}

/// A single dependency entry of a package version.
///
/// Declared order within the owning version is preserved for faithful
/// index re-serialization. `registry` is retained for schema fidelity;
/// no behavior is built on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDependency {
    pub name: String,
    pub req: String,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub optional: bool,
    #[serde(default = "default_true")]
    pub default_features: bool,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub kind: DependencyKind,
    #[serde(default)]
    pub registry: Option<String>,
    #[serde(default)]
    pub package: Option<String>,
}

/// One line of a sparse index file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub name: String,
    pub vers: String,
    #[serde(default)]
    pub deps: Vec<IndexDependency>,
    pub cksum: String,
    #[serde(default)]
    pub features: FeatureMap,
    #[serde(default)]
    pub yanked: bool,
    #[serde(default)]
    pub links: Option<String>,
    #[serde(default = "default_schema_version")]
    pub v: u32,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub features2: FeatureMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rust_version: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_schema_version() -> u32 {
    1
}

impl IndexEntry {
    /// Serialize to the compact single-line form used by the index.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// A stored crate version: the index entry plus store bookkeeping.
///
/// Unique by (domain, name, vers). Effectively append-only; the only
/// legal post-creation mutation is flipping `yanked`, with checksum-driven
/// upserts during synchronization as the one exception.
#[derive(Debug, Clone)]
pub struct CrateVersion {
    pub id: Uuid,
    /// Tenant scope.
    pub domain: String,
    pub name: String,
    pub vers: String,
    pub cksum: String,
    pub yanked: bool,
    pub features: FeatureMap,
    pub features2: FeatureMap,
    pub links: Option<String>,
    pub rust_version: Option<String>,
    pub v: u32,
    pub deps: Vec<IndexDependency>,
    /// Relative path of the sole artifact within the content tier.
    pub relative_path: String,
    /// Remote this record was synced or cached from, if any.
    pub remote: Option<Uuid>,
    /// Monotonic creation sequence, used for "postdates snapshot" queries.
    pub seq: u64,
}

impl CrateVersion {
    /// The conventional artifact path for a crate version.
    pub fn artifact_path(name: &str, vers: &str) -> String {
        format!("{name}/{name}-{vers}.crate")
    }

    /// Build a stored record from a parsed index entry.
    pub fn from_entry(domain: &str, entry: IndexEntry, remote: Option<Uuid>, seq: u64) -> Self {
        let relative_path = Self::artifact_path(&entry.name, &entry.vers);
        Self {
            id: Uuid::new_v4(),
            domain: domain.to_string(),
            name: entry.name,
            vers: entry.vers,
            cksum: entry.cksum,
            yanked: entry.yanked,
            features: entry.features,
            features2: entry.features2,
            links: entry.links,
            rust_version: entry.rust_version,
            v: entry.v,
            deps: entry.deps,
            relative_path,
            remote,
            seq,
        }
    }

    /// Project the stored record back into its wire form.
    pub fn index_entry(&self) -> IndexEntry {
        IndexEntry {
            name: self.name.clone(),
            vers: self.vers.clone(),
            deps: self.deps.clone(),
            cksum: self.cksum.clone(),
            features: self.features.clone(),
            yanked: self.yanked,
            links: self.links.clone(),
            v: self.v,
            features2: self.features2.clone(),
            rust_version: self.rust_version.clone(),
        }
    }
}

/// Upstream source descriptor.
#[derive(Debug, Clone)]
pub struct Remote {
    pub id: Uuid,
    pub domain: String,
    pub name: String,
    /// Sparse index root URL. A `sparse+` scheme prefix is accepted and
    /// stripped at fetch time.
    pub url: String,
    pub policy: RemotePolicy,
    /// Explicit sync set. Empty means the synchronizer fetches the
    /// remote's crate-name listing instead.
    pub crates: Vec<String>,
}

/// Sync/caching policy of a remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RemotePolicy {
    /// Eager full sync.
    #[default]
    Immediate,
    /// Fetch-on-request, archives downloaded when first asked for.
    OnDemand,
    /// Fetch-on-request, archives streamed and cached.
    Streamed,
}

/// An immutable content-set snapshot of a repository.
#[derive(Debug, Clone)]
pub struct RepositoryVersion {
    pub number: u64,
    pub content: BTreeSet<Uuid>,
    /// Store sequence at creation time; the cache promoter selects
    /// content whose `seq` postdates this.
    pub seq_watermark: u64,
    pub created: DateTime<Utc>,
}

/// An ordered sequence of immutable snapshots.
#[derive(Debug, Clone)]
pub struct Repository {
    pub id: Uuid,
    pub domain: String,
    pub name: String,
    pub remote: Option<Uuid>,
    pub versions: Vec<RepositoryVersion>,
}

impl Repository {
    /// The snapshot currently being served.
    pub fn latest_version(&self) -> &RepositoryVersion {
        // Repositories are created with version 0, so this always exists.
        self.versions
            .last()
            .expect("repository has at least version 0")
    }
}

/// Public-facing mapping from a base path to a repository/version and an
/// optional remote.
#[derive(Debug, Clone)]
pub struct Distribution {
    pub id: Uuid,
    pub domain: String,
    pub name: String,
    pub base_path: String,
    pub repository: Option<Uuid>,
    /// Pin to a fixed snapshot: (repository, version number).
    pub repository_version: Option<(Uuid, u64)>,
    pub remote: Option<Uuid>,
    pub allow_uploads: bool,
}

/// Capability: the type exposes an immutable content set.
pub trait HasContentSet {
    fn content_set(&self) -> &BTreeSet<Uuid>;
}

/// Capability: the type is addressable by a public base path.
pub trait HasBasePath {
    fn base_path(&self) -> &str;
}

/// Capability: the type may be bound to a remote.
pub trait HasRemote {
    fn remote_id(&self) -> Option<Uuid>;
}

impl HasContentSet for RepositoryVersion {
    fn content_set(&self) -> &BTreeSet<Uuid> {
        &self.content
    }
}

impl HasBasePath for Distribution {
    fn base_path(&self) -> &str {
        &self.base_path
    }
}

impl HasRemote for Distribution {
    fn remote_id(&self) -> Option<Uuid> {
        self.remote
    }
}

impl HasRemote for Repository {
    fn remote_id(&self) -> Option<Uuid> {
        self.remote
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_entry() -> IndexEntry {
        IndexEntry {
            name: "ripgrep".to_string(),
            vers: "15.1.0".to_string(),
            deps: vec![],
            cksum: "abc123".to_string(),
            features: FeatureMap::new(),
            yanked: false,
            links: None,
            v: 1,
            features2: FeatureMap::new(),
            rust_version: None,
        }
    }

    #[test]
    fn entry_line_matches_protocol_exactly() {
        let line = minimal_entry().to_line().expect("serializes");
        assert_eq!(
            line,
            r#"{"name":"ripgrep","vers":"15.1.0","deps":[],"cksum":"abc123","features":{},"yanked":false,"links":null,"v":1}"#
        );
    }

    #[test]
    fn optional_fields_appear_only_when_set() {
        let mut entry = minimal_entry();
        entry.rust_version = Some("1.70".to_string());
        entry
            .features2
            .insert("serde".to_string(), vec!["dep:serde".to_string()]);

        let line = entry.to_line().expect("serializes");
        assert!(line.contains(r#""features2":{"serde":["dep:serde"]}"#));
        assert!(line.ends_with(r#""rust_version":"1.70"}"#));
    }

    #[test]
    fn dependency_keys_and_order() {
        let dep = IndexDependency {
            name: "libc".to_string(),
            req: "^0.2".to_string(),
            features: vec![],
            optional: false,
            default_features: true,
            target: None,
            kind: DependencyKind::Normal,
            registry: None,
            package: None,
        };
        let json = serde_json::to_string(&dep).expect("serializes");
        assert_eq!(
            json,
            r#"{"name":"libc","req":"^0.2","features":[],"optional":false,"default_features":true,"target":null,"kind":"normal","registry":null,"package":null}"#
        );
    }

    #[test]
    fn parses_sparse_line_with_missing_optionals() {
        let line = r#"{"name":"a","vers":"1.0.0","deps":[{"name":"b","req":"^1"}],"cksum":"ff","features":{},"yanked":false}"#;
        let entry: IndexEntry = serde_json::from_str(line).expect("parses");
        assert_eq!(entry.v, 1);
        assert_eq!(entry.links, None);
        assert!(entry.deps[0].default_features);
        assert_eq!(entry.deps[0].kind, DependencyKind::Normal);
    }

    #[test]
    fn artifact_path_convention() {
        assert_eq!(
            CrateVersion::artifact_path("ripgrep", "15.1.0"),
            "ripgrep/ripgrep-15.1.0.crate"
        );
    }
}
