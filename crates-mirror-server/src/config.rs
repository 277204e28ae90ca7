//! Configuration management.
//!
//! The server reads a single JSON configuration file with sensible
//! defaults for every section, so a bare `mirror-server start` works out
//! of the box. Sections cover network binding, storage locations, the
//! externally visible content origin used when building download
//! redirects, and upstream fetch behavior.

use crate::error::AppResult;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Network binding settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Storage locations.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Content-serving tier settings used when building redirect URLs.
    #[serde(default)]
    pub content: ContentConfig,
    /// Upstream fetch settings.
    #[serde(default)]
    pub upstream: UpstreamSettings,
    /// Tenant domain served by the HTTP routes.
    #[serde(default = "default_domain")]
    pub domain: String,
}

/// Server network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host/IP address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Base directory for artifact storage.
    pub data_dir: PathBuf,
}

/// Settings for the content-serving tier that download redirects point at.
///
/// `origin` is the fallback when the request carries no forwarded-host
/// metadata; `path_prefix` is prepended to every artifact path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentConfig {
    pub origin: String,
    pub path_prefix: String,
}

/// Upstream registry fetch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamSettings {
    /// HTTP request timeout in seconds for upstream calls.
    pub timeout_secs: u64,
}

fn default_domain() -> String {
    "default".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3080,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
        }
    }
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            origin: "http://localhost:3080".to_string(),
            path_prefix: "/content/".to_string(),
        }
    }
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            content: ContentConfig::default(),
            upstream: UpstreamSettings::default(),
            domain: default_domain(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from a file, falling back to defaults when the
    /// file does not exist.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Upstream request timeout as a [`Duration`].
    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_complete() {
        let config = Config::default();
        assert_eq!(config.server.port, 3080);
        assert_eq!(config.domain, "default");
        assert!(config.content.path_prefix.ends_with('/'));
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"server": {"host": "127.0.0.1", "port": 9000}}"#)
                .expect("partial config should parse");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.content.origin, "http://localhost:3080");
    }

    #[test]
    fn load_or_default_without_file() {
        let config = Config::load_or_default("/nonexistent/config.json")
            .expect("missing file should fall back to defaults");
        assert_eq!(config.server.host, "0.0.0.0");
    }
}
