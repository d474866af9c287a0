//! # Service Manager Constants
//!
//! Defines the resource limits, retention defaults, and on-disk layout names
//! for the service lifecycle layer. These constants are the **single source
//! of truth** for the storage budget and validation bounds throughout the
//! codebase.
//!
//! ## Security Rationale
//!
//! The record-count and space budgets exist so that a misbehaving
//! orchestrator (or a compromised bundle source) cannot exhaust node disk.
//! Each bound includes the units, the rationale, and the attack it mitigates.
//!
//! ## Cross-References
//!
//! - [`crate::manager`]: Enforces the record budget and retention threshold
//! - [`crate::space`]: Enforces the byte budgets
//! - [`crate::image`]: Uses the manifest/blob layout names

use std::time::Duration;

// =============================================================================
// Record Budget
// =============================================================================
//
// Bounds on how many service records may exist at once and how many versions
// of one service are retained. Enforced before installs (pressure eviction)
// and after installs (truncation).
// =============================================================================

/// Default maximum number of service records across all services.
///
/// **Security**: Prevents unbounded metadata and directory growth when the
/// desired set churns rapidly. Exceeding this triggers eviction of cached
/// records; when nothing is evictable the install is refused.
///
/// **Rationale**: Edge nodes run tens of services, not thousands. 64 leaves
/// generous headroom for cached previous versions.
pub const DEFAULT_MAX_SERVICES: usize = 64;

/// Default number of non-active versions retained per service ID.
///
/// The active version is exempt; truncation removes the oldest non-active
/// versions beyond this bound after every reconciliation pass.
pub const DEFAULT_RETAIN_VERSIONS: usize = 2;

/// Default number of concurrent installs in one reconciliation pass.
///
/// **Rationale**: Downloads and unpacking are I/O bound; five in flight
/// saturates a typical edge uplink without starving unrelated work.
pub const DEFAULT_INSTALL_PARALLELISM: usize = 5;

// =============================================================================
// Retention Timing
// =============================================================================

/// Default time-to-live for cached service bundles (30 days).
///
/// A cached record whose state-transition timestamp is older than this is
/// removed by the background sweep.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Default period of the background cached-bundle sweep (24 hours).
pub const DEFAULT_CLEANUP_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

// =============================================================================
// Storage Paths
// =============================================================================
//
// Default subdirectories for managed state. The base directory is typically
// `~/.magikstore` for user mode or `/var/lib/magikstore` for system mode.
// =============================================================================

/// Subdirectory holding installed service bundles, one directory per service.
pub const SERVICES_DIR: &str = "services";

/// Subdirectory used as download staging space.
///
/// Cleared on startup: anything here is a partial download from a previous
/// run and is never referenced by a record.
pub const DOWNLOAD_DIR: &str = "downloads";

/// Record store file name used by [`crate::storage::FileStorage`].
pub const STORAGE_FILE: &str = "services.json";

/// Manifest file name inside an installed bundle directory.
pub const IMAGE_MANIFEST_FILE: &str = "manifest.json";

/// Blob directory name inside an installed bundle directory.
///
/// Structure: `blobs/<algorithm>/<hex>` (content-addressed).
pub const IMAGE_BLOBS_DIR: &str = "blobs";

// =============================================================================
// Validation Patterns
// =============================================================================
//
// Service IDs become filesystem path segments (staging paths, install
// directories), so validation is allowlist-based.
// =============================================================================

/// Valid characters for service IDs.
///
/// Includes: `a-z`, `A-Z`, `0-9`, `-`, `_`, `.`
///
/// **Security**: Excludes `/` and other separators that could be used for
/// path traversal when service IDs are used in filesystem paths.
pub const SERVICE_ID_VALID_CHARS: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789-_.";

/// Maximum service ID length.
///
/// **Rationale**: 128 characters accommodates reverse-DNS style IDs while
/// keeping composite IDs (`<service>_<version>`) well under path limits.
pub const MAX_SERVICE_ID_LEN: usize = 128;

/// Maximum version string length.
pub const MAX_VERSION_LEN: usize = 64;

/// Validates a service ID for safety.
///
/// # Security
///
/// This function ensures service IDs:
/// - Are non-empty
/// - Don't exceed [`MAX_SERVICE_ID_LEN`]
/// - Only contain characters from [`SERVICE_ID_VALID_CHARS`]
/// - Don't start with a dot (hidden/relative path segments)
///
/// # Returns
///
/// `Ok(())` if valid, `Err(reason)` with a description of the failure.
#[inline]
#[must_use = "validation result must be checked before using the ID in a path"]
pub fn validate_service_id(id: &str) -> std::result::Result<(), &'static str> {
    if id.is_empty() {
        return Err("service ID cannot be empty");
    }
    if id.len() > MAX_SERVICE_ID_LEN {
        return Err("service ID exceeds maximum length");
    }
    if id.starts_with('.') {
        return Err("service ID cannot start with a dot");
    }
    if !id.chars().all(|c| SERVICE_ID_VALID_CHARS.contains(c)) {
        return Err("service ID contains invalid characters");
    }
    Ok(())
}
