//! # Crates Mirror Server
//!
//! A pull-through mirror for Cargo sparse-protocol registries. The server
//! ingests package index metadata and crate archives from an upstream
//! source, stores them content-addressably, and re-serves them through
//! the same sparse-index wire protocol plus direct archive downloads.
//!
//! ## Key Modules
//!
//! - [`model`] / [`store`]: the package/dependency data model and the
//!   tenant-scoped metadata store with immutable repository snapshots
//! - [`index`]: the sparse index protocol handler
//! - [`download`]: download resolution and redirects to the content tier
//! - [`sync`] / [`promote`]: background synchronization and cache
//!   promotion, dispatched through [`scheduler`]
//! - [`upstream`]: communication with upstream registries
//! - [`server`]: HTTP routing and the server entry point

pub mod api;
pub mod config;
pub mod download;
pub mod error;
pub mod index;
pub mod model;
pub mod promote;
pub mod publish;
pub mod resolve;
pub mod scheduler;
pub mod server;
pub mod state;
pub mod storage;
pub mod store;
pub mod sync;
pub mod upstream;
pub mod validation;

// Re-export key types for convenience
pub use config::Config;
pub use error::{ApiErrorResponse, AppError, AppResult, ErrorCode};
pub use server::{build_router, run_server};
pub use state::AppState;
pub use store::RegistryStore;
pub use upstream::UpstreamClient;

use sha2::{Digest, Sha256};

/// Calculate the SHA256 hash of data as a lowercase hex string.
///
/// Used for crate archive checksums throughout: upload checksum
/// generation, sync-time verification, and content-addressed storage
/// paths.
pub fn sha256_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
