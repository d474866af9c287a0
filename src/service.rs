//! Service record data model.
//!
//! This module defines the persistent and ephemeral types the manager works
//! over:
//! - `ServiceState`: Lifecycle state of an installed bundle
//! - `ServiceRecord`: One persisted row per (service ID, version)
//! - `DesiredService`: One entry of the orchestrator's desired set
//! - `ServiceStatus` / `InstallStatus`: Per-service reconciliation outcome
//!
//! Version ordering is semantic-version ordering via the `semver` crate,
//! falling back to lexicographic comparison for versions that do not parse.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::PathBuf;

// =============================================================================
// Service State
// =============================================================================

/// Lifecycle state of an installed service version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    /// Currently required by the orchestrator's desired set.
    Active,
    /// Previously active, kept on disk for reuse; evictable.
    Cached,
    /// Install in progress; not yet committed.
    Pending,
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Cached => write!(f, "cached"),
            Self::Pending => write!(f, "pending"),
        }
    }
}

// =============================================================================
// Service Record
// =============================================================================

/// Persisted metadata for one installed service version.
///
/// `(service_id, version)` is the unique key. For a given `service_id` at
/// most one record is [`ServiceState::Active`] at any time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRecord {
    /// Service ID.
    pub service_id: String,
    /// Provider ID.
    pub provider_id: String,
    /// Semantic version string.
    pub version: String,
    /// Root directory of the installed bundle.
    pub image_path: PathBuf,
    /// Digest of the bundle manifest, recorded at install time.
    pub manifest_digest: String,
    /// Install time or last state-transition time.
    pub timestamp: DateTime<Utc>,
    /// Lifecycle state.
    pub state: ServiceState,
    /// Bytes consumed by the installed bundle.
    pub size: u64,
    /// Numeric group identifier assigned to the service.
    pub gid: u32,
}

impl ServiceRecord {
    /// Composite ID used for allocator bookkeeping and administrative
    /// removal: `<service_id>_<version>`.
    #[must_use]
    pub fn item_id(&self) -> String {
        format_item_id(&self.service_id, &self.version)
    }
}

/// Formats the composite `<service_id>_<version>` item ID.
#[must_use]
pub fn format_item_id(service_id: &str, version: &str) -> String {
    format!("{}_{}", service_id, version)
}

// =============================================================================
// Desired Service
// =============================================================================

/// One entry of the desired set handed to the manager by the orchestrator.
///
/// Not persisted; consumed by a single reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredService {
    /// Service ID.
    pub service_id: String,
    /// Provider ID.
    pub provider_id: String,
    /// Semantic version string.
    pub version: String,
    /// Source URL of the bundle archive.
    pub url: String,
    /// Expected bundle size in bytes (download staging hint).
    pub size: u64,
    /// Numeric group identifier to assign.
    pub gid: u32,
}

// =============================================================================
// Reconciliation Outcome
// =============================================================================

/// Install progress of one desired service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "status")]
pub enum InstallStatus {
    /// Install has been scheduled and is running.
    Installing,
    /// Bundle is installed and active.
    Installed,
    /// Install or validation failed.
    Error {
        /// Failure cause, preserved for the orchestrator.
        message: String,
    },
}

impl std::fmt::Display for InstallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Installing => write!(f, "installing"),
            Self::Installed => write!(f, "installed"),
            Self::Error { message } => write!(f, "error: {}", message),
        }
    }
}

/// Per-service outcome of a reconciliation pass.
///
/// Every originally-desired service produces exactly one status, whether the
/// pass succeeded or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    /// Service ID.
    pub service_id: String,
    /// Version the status refers to.
    pub version: String,
    /// Outcome.
    #[serde(flatten)]
    pub status: InstallStatus,
}

// =============================================================================
// Version Ordering
// =============================================================================

/// Compares two version strings with semantic-version ordering.
///
/// Both sides are parsed as semver; when either fails to parse, the
/// comparison falls back to plain lexicographic ordering so that sorting
/// never fails on legacy version strings.
#[must_use]
pub fn compare_versions(lhs: &str, rhs: &str) -> Ordering {
    match (
        semver::Version::parse(lhs),
        semver::Version::parse(rhs),
    ) {
        (Ok(l), Ok(r)) => l.cmp(&r),
        _ => lhs.cmp(rhs),
    }
}
