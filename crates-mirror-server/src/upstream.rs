//! Communication with upstream sparse registries.
//!
//! The synchronizer and the pull-through paths fetch three kinds of
//! resources from a remote: its `config.json` (for the `dl` download
//! template), per-crate index files at the sparse bucket path, and crate
//! archives. Remote URLs may carry Cargo's `sparse+` scheme prefix, which
//! is stripped here.

use crate::error::{AppError, AppResult};
use crate::validation;
use bytes::Bytes;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Calculate the sparse index bucket path for a crate name.
///
/// Names are organized by length: `1/a`, `2/ab`, `3/a/abc`,
/// `ab/cd/abcd`... The name is case-folded to lowercase first.
pub fn index_path(name: &str) -> AppResult<String> {
    let validated = validation::validate_crate_name(name)
        .map_err(|e| AppError::BadRequest(format!("Invalid crate name '{name}': {e}")))?;
    let name = validated.to_lowercase();

    let path = match name.len() {
        0 => {
            return Err(AppError::BadRequest(
                "Crate name cannot be empty".to_string(),
            ))
        }
        1 => format!("1/{name}"),
        2 => format!("2/{name}"),
        3 => {
            let first_char = &name[..1];
            format!("3/{first_char}/{name}")
        }
        _ => {
            let first_two = &name[..2];
            let next_two = &name[2..4];
            format!("{first_two}/{next_two}/{name}")
        }
    };
    Ok(path)
}

/// The directory prefix of a bucket path, for `{prefix}` dl markers.
fn index_prefix(name: &str) -> AppResult<String> {
    let path = index_path(name)?;
    Ok(path
        .rsplit_once('/')
        .map(|(prefix, _)| prefix.to_string())
        .unwrap_or_default())
}

/// Parsed upstream `config.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteIndexConfig {
    pub dl: String,
    #[serde(default)]
    pub api: Option<String>,
}

/// HTTP client for upstream registry communication.
pub struct UpstreamClient {
    client: Client,
}

impl UpstreamClient {
    pub fn new(timeout: Duration) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("crates-mirror-server/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AppError::InternalError(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Index root with the `sparse+` prefix and any trailing slash removed.
    pub fn index_root(url: &str) -> &str {
        url.strip_prefix("sparse+").unwrap_or(url).trim_end_matches('/')
    }

    /// Validate that a remote URL parses to an absolute http(s) URL.
    pub fn validate_remote_url(remote_url: &str) -> AppResult<()> {
        let root = Self::index_root(remote_url);
        let parsed = url::Url::parse(root)
            .map_err(|e| AppError::BadRequest(format!("Invalid remote URL '{remote_url}': {e}")))?;
        match parsed.scheme() {
            "http" | "https" => Ok(()),
            scheme => Err(AppError::BadRequest(format!(
                "Unsupported remote URL scheme '{scheme}'"
            ))),
        }
    }

    /// Fetch the remote's `config.json`.
    pub async fn fetch_index_config(&self, remote_url: &str) -> AppResult<RemoteIndexConfig> {
        let url = format!("{}/config.json", Self::index_root(remote_url));
        debug!(url = %url, "Fetching upstream index config");

        let response = self.client.get(&url).send().await.map_err(|e| {
            warn!(url = %url, error = %e, "Failed to fetch upstream index config");
            AppError::NotFound(format!("Upstream index config not reachable: {url}"))
        })?;

        if !response.status().is_success() {
            return Err(AppError::NotFound(format!(
                "Upstream index config not found: {url}"
            )));
        }
        response.json().await.map_err(|e| {
            AppError::InternalError(format!("Failed to parse upstream config.json: {e}"))
        })
    }

    /// Fetch the sparse index file for a crate.
    pub async fn fetch_index_file(&self, remote_url: &str, crate_name: &str) -> AppResult<String> {
        let path = index_path(crate_name)?;
        let url = format!("{}/{}", Self::index_root(remote_url), path);
        debug!(url = %url, "Fetching upstream index file");

        let response = self.client.get(&url).send().await.map_err(|e| {
            warn!(crate_name = %crate_name, error = %e, "Failed to fetch upstream index");
            AppError::NotFound(format!("Crate not found upstream: {crate_name}"))
        })?;

        if response.status().is_success() {
            let content = response.text().await.map_err(|e| {
                AppError::InternalError(format!("Failed to read upstream index response: {e}"))
            })?;
            info!(crate_name = %crate_name, "Fetched index file from upstream");
            Ok(content)
        } else {
            Err(AppError::NotFound(format!(
                "Crate not found upstream: {crate_name}"
            )))
        }
    }

    /// Fetch the remote's crate-name listing (`index.json` at the index
    /// root), used when a remote has no explicit sync set.
    pub async fn fetch_listing(&self, remote_url: &str) -> AppResult<Vec<String>> {
        let url = format!("{}/index.json", Self::index_root(remote_url));
        debug!(url = %url, "Fetching upstream crate listing");

        let response = self.client.get(&url).send().await.map_err(|e| {
            warn!(url = %url, error = %e, "Failed to fetch upstream listing");
            AppError::NotFound(format!("Upstream listing not reachable: {url}"))
        })?;

        if !response.status().is_success() {
            return Err(AppError::NotFound(format!(
                "Upstream listing not found: {url}"
            )));
        }
        response.json().await.map_err(|e| {
            AppError::InternalError(format!("Failed to parse upstream listing: {e}"))
        })
    }

    /// Build the archive download URL from a `dl` template.
    ///
    /// Supports the `{crate}`, `{version}`, `{prefix}`, `{lowerprefix}`
    /// and `{sha256-checksum}` markers; a marker-free template gets
    /// `/{crate}/{version}/download` appended, per the registry
    /// specification.
    pub fn download_url(dl: &str, name: &str, vers: &str, cksum: &str) -> AppResult<String> {
        const MARKERS: [&str; 5] = [
            "{crate}",
            "{version}",
            "{prefix}",
            "{lowerprefix}",
            "{sha256-checksum}",
        ];
        if MARKERS.iter().any(|m| dl.contains(m)) {
            let prefix = index_prefix(name)?;
            Ok(dl
                .replace("{crate}", name)
                .replace("{version}", vers)
                .replace("{prefix}", &prefix)
                .replace("{lowerprefix}", &prefix.to_lowercase())
                .replace("{sha256-checksum}", cksum))
        } else {
            Ok(format!("{}/{name}/{vers}/download", dl.trim_end_matches('/')))
        }
    }

    /// Fetch a crate archive.
    pub async fn fetch_crate(
        &self,
        dl: &str,
        name: &str,
        vers: &str,
        cksum: &str,
    ) -> AppResult<Bytes> {
        let url = Self::download_url(dl, name, vers, cksum)?;
        debug!(url = %url, "Fetching crate archive from upstream");

        let response = self.client.get(&url).send().await.map_err(|e| {
            warn!(crate_name = %name, version = %vers, error = %e, "Failed to fetch crate archive");
            AppError::NotFound(format!("Crate archive not found upstream: {name}-{vers}"))
        })?;

        if !response.status().is_success() {
            return Err(AppError::NotFound(format!(
                "Crate archive not found upstream: {name}-{vers}"
            )));
        }
        let bytes = response.bytes().await.map_err(|e| {
            AppError::InternalError(format!("Failed to read crate archive response: {e}"))
        })?;
        info!(crate_name = %name, version = %vers, size = bytes.len(), "Fetched crate archive");
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_path_algorithm() {
        assert_eq!(index_path("a").expect("path for 'a'"), "1/a");
        assert_eq!(index_path("ab").expect("path for 'ab'"), "2/ab");
        assert_eq!(index_path("abc").expect("path for 'abc'"), "3/a/abc");
        assert_eq!(index_path("abcd").expect("path for 'abcd'"), "ab/cd/abcd");
        assert_eq!(index_path("serde").expect("path for 'serde'"), "se/rd/serde");
        assert_eq!(index_path("SERDE").expect("path for 'SERDE'"), "se/rd/serde");

        assert!(index_path("../malicious").is_err());
        assert!(index_path("crate with spaces").is_err());
        assert!(index_path("").is_err());
    }

    #[test]
    fn sparse_scheme_prefix_is_stripped() {
        assert_eq!(
            UpstreamClient::index_root("sparse+https://index.crates.io/"),
            "https://index.crates.io"
        );
        assert_eq!(
            UpstreamClient::index_root("http://localhost:8000"),
            "http://localhost:8000"
        );
    }

    #[test]
    fn remote_urls_are_validated() {
        assert!(UpstreamClient::validate_remote_url("https://index.crates.io/").is_ok());
        assert!(UpstreamClient::validate_remote_url("sparse+https://index.crates.io/").is_ok());
        assert!(UpstreamClient::validate_remote_url("ftp://mirror.example").is_err());
        assert!(UpstreamClient::validate_remote_url("not a url").is_err());
    }

    #[test]
    fn download_url_templates() {
        assert_eq!(
            UpstreamClient::download_url("https://crates.io/api/v1/crates", "serde", "1.0.0", "ff")
                .expect("marker-free template"),
            "https://crates.io/api/v1/crates/serde/1.0.0/download"
        );
        assert_eq!(
            UpstreamClient::download_url(
                "https://static.example/{prefix}/{crate}/{version}",
                "serde",
                "1.0.0",
                "ff"
            )
            .expect("marker template"),
            "https://static.example/se/rd/serde/1.0.0"
        );
    }
}
