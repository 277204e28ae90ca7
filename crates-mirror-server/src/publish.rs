//! Crate publishing and yank operations.
//!
//! The publish endpoint accepts Cargo's binary upload frame: a 4-byte
//! little-endian metadata length, the JSON metadata, a 4-byte
//! little-endian archive length, then the `.crate` bytes. Publishing is
//! gated on the distribution's upload-allowed flag and requires a bound
//! repository; each accepted upload appends one additive snapshot.
//!
//! Yank and unyank flip the `yanked` flag of an existing version and
//! nothing else; the version stays present in index output.

use crate::error::{AppError, AppResult};
use crate::model::{DependencyKind, FeatureMap, IndexDependency, IndexEntry};
use crate::resolve::RequestContext;
use crate::sha256_hash;
use crate::state::AppState;
use crate::validation;
use axum::{
    extract::{Path as AxumPath, State},
    response::Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

/// Upper bound on a publish request body.
const MAX_PUBLISH_BODY_SIZE: usize = 64 * 1024 * 1024;

/// Upper bound on the JSON metadata section of a publish frame.
const MAX_METADATA_SIZE: usize = 1024 * 1024;

/// Dependency entry as sent by `cargo publish`. The publish API names the
/// real package `name` and carries a rename in `explicit_name_opt`; the
/// index format inverts this.
#[derive(Debug, Deserialize)]
pub struct PublishDependency {
    pub name: String,
    #[serde(alias = "req")]
    pub version_req: String,
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
    pub explicit_name_opt: Option<String>,
}

fn default_true() -> bool {
    true
}

impl PublishDependency {
    /// Translate to the index representation, inverting the rename
    /// convention.
    pub fn into_index(self) -> IndexDependency {
        let (name, package) = match self.explicit_name_opt {
            Some(rename) => (rename, Some(self.name)),
            None => (self.name, None),
        };
        IndexDependency {
            name,
            req: self.version_req,
            features: self.features,
            optional: self.optional,
            default_features: self.default_features,
            target: self.target,
            kind: self.kind,
            registry: self.registry,
            package,
        }
    }
}

/// Metadata section of a publish frame.
#[derive(Debug, Deserialize)]
pub struct PublishMetadata {
    pub name: String,
    pub vers: String,
    #[serde(default)]
    pub deps: Vec<PublishDependency>,
    #[serde(default)]
    pub features: FeatureMap,
    #[serde(default)]
    pub links: Option<String>,
    #[serde(default)]
    pub rust_version: Option<String>,
}

impl PublishMetadata {
    fn into_entry(self, cksum: String) -> IndexEntry {
        IndexEntry {
            name: self.name,
            vers: self.vers,
            deps: self.deps.into_iter().map(PublishDependency::into_index).collect(),
            cksum,
            features: self.features,
            yanked: false,
            links: self.links,
            v: 1,
            features2: FeatureMap::new(),
            rust_version: self.rust_version,
        }
    }
}

/// Parse and validate a publish frame into (metadata, archive bytes).
pub fn parse_publish_frame(body: &[u8]) -> AppResult<(PublishMetadata, Vec<u8>)> {
    if body.len() < 8 {
        warn!(payload_size = body.len(), "Publish payload too small");
        return Err(AppError::BadRequest(
            "Payload too small - missing required headers".to_string(),
        ));
    }
    if body.len() > MAX_PUBLISH_BODY_SIZE {
        warn!(payload_size = body.len(), "Publish payload too large");
        return Err(AppError::BadRequest(format!(
            "Payload too large: {} bytes (max: {} bytes)",
            body.len(),
            MAX_PUBLISH_BODY_SIZE
        )));
    }

    let metadata_len = u32::from_le_bytes([body[0], body[1], body[2], body[3]]) as usize;
    if metadata_len > MAX_METADATA_SIZE {
        return Err(AppError::BadRequest(format!(
            "Metadata section too large: {metadata_len} bytes"
        )));
    }
    if body.len() < 4 + metadata_len + 4 {
        return Err(AppError::BadRequest(
            "Insufficient data for metadata section".to_string(),
        ));
    }

    let metadata: PublishMetadata =
        serde_json::from_slice(&body[4..4 + metadata_len]).map_err(|e| {
            warn!(error = %e, "Failed to parse publish metadata JSON");
            AppError::BadRequest(format!("Invalid metadata JSON: {e}"))
        })?;

    validation::validate_crate_name(&metadata.name)
        .map_err(|e| AppError::BadRequest(format!("Invalid crate name: {e}")))?;
    validation::validate_version(&metadata.vers)
        .map_err(|e| AppError::BadRequest(format!("Invalid version: {e}")))?;

    let crate_len_offset = 4 + metadata_len;
    let crate_len = u32::from_le_bytes([
        body[crate_len_offset],
        body[crate_len_offset + 1],
        body[crate_len_offset + 2],
        body[crate_len_offset + 3],
    ]) as usize;

    let crate_data_offset = crate_len_offset + 4;
    if body.len() < crate_data_offset + crate_len {
        return Err(AppError::BadRequest(
            "Insufficient data for crate file".to_string(),
        ));
    }

    let crate_data = body[crate_data_offset..crate_data_offset + crate_len].to_vec();
    Ok((metadata, crate_data))
}

/// Publish endpoint: `PUT /cargo/{base_path}/api/v1/crates/new`.
pub async fn publish_crate(
    AxumPath(base_path): AxumPath<String>,
    State(state): State<Arc<AppState>>,
    body: axum::body::Bytes,
) -> AppResult<Json<Value>> {
    let ctx = RequestContext::resolve(&state, &base_path)?;
    if !ctx.distribution.allow_uploads {
        return Err(AppError::Forbidden(
            "Uploads are not allowed on this distribution".to_string(),
        ));
    }
    let repository_id = ctx.distribution.repository.ok_or_else(|| {
        AppError::BadRequest("No repository associated with this distribution".to_string())
    })?;

    let (metadata, crate_data) = parse_publish_frame(&body)?;
    info!(crate_name = %metadata.name, version = %metadata.vers, "Publishing crate");

    // The artifact path handed to the content tier is constructed from
    // request data; reject anything that does not stay a plain relative
    // path.
    let relative_path = crate::model::CrateVersion::artifact_path(&metadata.name, &metadata.vers);
    validation::validate_safe_path(&relative_path).map_err(|e| {
        AppError::BadRequest(format!("Generated unsafe artifact path '{relative_path}': {e}"))
    })?;

    let cksum = sha256_hash(&crate_data);
    state.artifacts.put(&cksum, &crate_data).await?;

    let entry = metadata.into_entry(cksum);
    let record = state
        .store
        .create_content(&state.config.domain, entry, None)?;
    state
        .store
        .append_content_to_repository(repository_id, record.id)?;

    info!(
        crate_name = %record.name,
        version = %record.vers,
        checksum = %record.cksum,
        "Crate published"
    );
    Ok(Json(json!({
        "warnings": {"invalid_categories": [], "invalid_badges": [], "other": []}
    })))
}

/// Yank endpoint:
/// `DELETE /cargo/{base_path}/api/v1/crates/{name}/{version}/yank`.
pub async fn yank_version(
    AxumPath((base_path, crate_name, version)): AxumPath<(String, String, String)>,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<Value>> {
    set_yanked(&state, &base_path, &crate_name, &version, true)
}

/// Unyank endpoint:
/// `PUT /cargo/{base_path}/api/v1/crates/{name}/{version}/unyank`.
pub async fn unyank_version(
    AxumPath((base_path, crate_name, version)): AxumPath<(String, String, String)>,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<Value>> {
    set_yanked(&state, &base_path, &crate_name, &version, false)
}

fn set_yanked(
    state: &AppState,
    base_path: &str,
    crate_name: &str,
    version: &str,
    yanked: bool,
) -> AppResult<Json<Value>> {
    RequestContext::resolve(state, base_path)?;
    state
        .store
        .set_yanked(&state.config.domain, crate_name, version, yanked)?;
    info!(crate_name = %crate_name, version = %version, yanked = yanked, "Yank flag updated");
    Ok(Json(json!({"ok": true})))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(metadata: &Value, crate_bytes: &[u8]) -> Vec<u8> {
        let metadata_bytes = serde_json::to_vec(metadata).unwrap();
        let mut payload = Vec::new();
        payload.extend_from_slice(&(metadata_bytes.len() as u32).to_le_bytes());
        payload.extend_from_slice(&metadata_bytes);
        payload.extend_from_slice(&(crate_bytes.len() as u32).to_le_bytes());
        payload.extend_from_slice(crate_bytes);
        payload
    }

    #[test]
    fn parses_a_well_formed_frame() {
        let metadata = json!({
            "name": "demo",
            "vers": "1.0.0",
            "deps": [{"name": "libc", "version_req": "^0.2"}],
            "features": {"std": []}
        });
        let payload = frame(&metadata, b"archive bytes");

        let (parsed, data) = parse_publish_frame(&payload).expect("frame parses");
        assert_eq!(parsed.name, "demo");
        assert_eq!(parsed.vers, "1.0.0");
        assert_eq!(parsed.deps.len(), 1);
        assert_eq!(data, b"archive bytes");
    }

    #[test]
    fn rejects_truncated_payloads() {
        assert!(parse_publish_frame(&[1, 2, 3]).is_err());

        let metadata = json!({"name": "demo", "vers": "1.0.0"});
        let mut payload = frame(&metadata, b"archive");
        payload.truncate(payload.len() - 3);
        assert!(parse_publish_frame(&payload).is_err());
    }

    #[test]
    fn rejects_invalid_names_early() {
        let metadata = json!({"name": "../evil", "vers": "1.0.0"});
        let payload = frame(&metadata, b"archive");
        assert!(parse_publish_frame(&payload).is_err());
    }

    #[test]
    fn renamed_dependency_translates_to_index_convention() {
        let dep = PublishDependency {
            name: "serde".to_string(),
            version_req: "^1".to_string(),
            features: vec![],
            optional: false,
            default_features: true,
            target: None,
            kind: DependencyKind::Normal,
            registry: None,
            explicit_name_opt: Some("serde_renamed".to_string()),
        };
        let index = dep.into_index();
        assert_eq!(index.name, "serde_renamed");
        assert_eq!(index.package.as_deref(), Some("serde"));
    }
}
