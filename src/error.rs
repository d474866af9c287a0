//! Error types for the service lifecycle layer.

use std::path::PathBuf;

/// Result type alias for service lifecycle operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the service lifecycle layer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // Record Errors
    // =========================================================================
    /// Service record not found.
    #[error("service not found: {0}")]
    ServiceNotFound(String),

    /// Service record already exists for this ID and version.
    #[error("service already exists: {service_id}@{version}")]
    ServiceAlreadyExists { service_id: String, version: String },

    /// Record budget exhausted and nothing is evictable.
    #[error("service record budget exceeded: {count} records, limit {limit}")]
    CapacityExceeded { count: usize, limit: usize },

    /// Service ID failed validation.
    #[error("invalid service ID '{service_id}': {reason}")]
    InvalidServiceId {
        service_id: String,
        reason: &'static str,
    },

    /// Composite `<service>_<version>` ID has an unexpected shape.
    #[error("invalid item ID '{0}': expected <service>_<version>")]
    InvalidItemId(String),

    // =========================================================================
    // Integrity Errors
    // =========================================================================
    /// Manifest digest no longer matches the recorded digest.
    #[error("manifest checksum mismatch: expected {expected}, computed {computed}")]
    ChecksumMismatch { expected: String, computed: String },

    /// Digest string is not `<algorithm>:<hex>`.
    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    /// Manifest is missing a required part (layers, service config).
    #[error("invalid manifest at {path}: {reason}")]
    InvalidManifest { path: PathBuf, reason: String },

    // =========================================================================
    // Install Pipeline Errors
    // =========================================================================
    /// Bundle download failed.
    #[error("failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Bundle unpack/install failed.
    #[error("failed to install service '{service_id}': {reason}")]
    InstallFailed { service_id: String, reason: String },

    // =========================================================================
    // Space Accounting Errors
    // =========================================================================
    /// Space budget cannot satisfy the reservation.
    #[error("space exhausted: requested {requested} bytes, available {available}")]
    SpaceExhausted { requested: u64, available: u64 },

    /// Outdated-item bookkeeping entry not found.
    #[error("outdated item not found: {0}")]
    OutdatedItemNotFound(String),

    // =========================================================================
    // Storage Errors
    // =========================================================================
    /// Record store read/write failed.
    #[error("storage operation failed: {0}")]
    StorageFailed(String),

    // =========================================================================
    // Generic Errors
    // =========================================================================
    /// Operation not supported.
    #[error("operation not supported: {0}")]
    NotSupported(String),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
