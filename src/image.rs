//! # Image Manifest and Bundle Parts
//!
//! Minimal view of an installed bundle's OCI-style manifest, plus the helpers
//! that derive on-disk blob paths from it.
//!
//! ## Bundle Layout
//!
//! An installed bundle directory contains a manifest and a content-addressed
//! blob tree:
//!
//! ```text
//! <image_path>/
//! ├── manifest.json
//! └── blobs/
//!     └── sha256/
//!         ├── 1111...  (image config)
//!         ├── 2222...  (service config)
//!         └── 3333...  (root filesystem layer)
//! ```
//!
//! Digests of form `<algorithm>:<hex>` map to `blobs/<algorithm>/<hex>`.
//! Full manifest schema handling lives with the [`ImageHandler`]; this module
//! only reads the descriptor set needed to locate bundle parts.
//!
//! ## Security Model
//!
//! Digest strings are validated before path construction: the algorithm and
//! hex part must be non-empty and free of path separators, so a crafted
//! manifest cannot direct a blob path outside the bundle directory.

use crate::constants::IMAGE_MANIFEST_FILE;
use crate::error::{Error, Result};
use crate::service::DesiredService;
use crate::space::SpaceHandle;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

// =============================================================================
// Manifest Model
// =============================================================================

/// Content descriptor: one blob reference inside a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// Media type of the referenced blob.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    /// Blob digest, `<algorithm>:<hex>`.
    pub digest: String,
    /// Blob size in bytes.
    #[serde(default)]
    pub size: u64,
}

/// Minimal image manifest: the descriptors needed to locate bundle parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageManifest {
    /// Manifest schema version.
    #[serde(default)]
    pub schema_version: u32,
    /// Image config descriptor.
    pub config: Descriptor,
    /// Layer descriptors, bottom-to-top; `layers[0]` is the service rootfs.
    #[serde(default)]
    pub layers: Vec<Descriptor>,
    /// Service config descriptor (runtime parameters for the service).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_config: Option<Descriptor>,
}

impl ImageManifest {
    /// Loads a manifest from a bundle directory's `manifest.json`.
    pub fn load(image_path: &Path) -> Result<Self> {
        let manifest_path = image_path.join(IMAGE_MANIFEST_FILE);
        let data = fs::read(&manifest_path).map_err(|e| Error::InvalidManifest {
            path: manifest_path.clone(),
            reason: e.to_string(),
        })?;

        serde_json::from_slice(&data).map_err(|e| Error::InvalidManifest {
            path: manifest_path,
            reason: e.to_string(),
        })
    }
}

// =============================================================================
// Image Parts
// =============================================================================

/// Paths to the parts of an installed bundle, relative to its blob tree
/// until joined by the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageParts {
    /// Path to the image config blob.
    pub image_config_path: PathBuf,
    /// Path to the service config blob.
    pub service_config_path: PathBuf,
    /// Path to the service root filesystem blob.
    pub service_fs_path: PathBuf,
}

/// Splits a `<algorithm>:<hex>` digest into an `<algorithm>/<hex>` path.
///
/// # Security
///
/// Rejects digests whose components are empty or contain path separators,
/// preventing a crafted manifest from escaping the blob directory.
pub fn digest_to_path(digest: &str) -> Result<PathBuf> {
    let (algorithm, hash) = digest
        .split_once(':')
        .ok_or_else(|| Error::InvalidDigest(digest.to_string()))?;

    if algorithm.is_empty() || hash.is_empty() {
        return Err(Error::InvalidDigest(digest.to_string()));
    }

    if [algorithm, hash]
        .iter()
        .any(|part| part.contains('/') || part.contains('\\') || part.contains(".."))
    {
        return Err(Error::InvalidDigest(digest.to_string()));
    }

    Ok(PathBuf::from(algorithm).join(hash))
}

/// Derives [`ImageParts`] from a manifest.
///
/// Fails when the manifest has no layers or no service config descriptor:
/// such a bundle cannot be run and must not be registered.
pub fn image_parts_from_manifest(manifest: &ImageManifest) -> Result<ImageParts> {
    let image_config_path = digest_to_path(&manifest.config.digest)?;

    let service_config = manifest.service_config.as_ref().ok_or_else(|| {
        Error::InvalidManifest {
            path: PathBuf::from(IMAGE_MANIFEST_FILE),
            reason: "manifest has no service config descriptor".to_string(),
        }
    })?;
    let service_config_path = digest_to_path(&service_config.digest)?;

    let rootfs_layer = manifest.layers.first().ok_or_else(|| Error::InvalidManifest {
        path: PathBuf::from(IMAGE_MANIFEST_FILE),
        reason: "manifest has no layers".to_string(),
    })?;
    let service_fs_path = digest_to_path(&rootfs_layer.digest)?;

    Ok(ImageParts {
        image_config_path,
        service_config_path,
        service_fs_path,
    })
}

// =============================================================================
// Digest Helpers
// =============================================================================

/// Computes the `sha256:<hex>` digest of a byte slice.
#[must_use]
pub fn digest_bytes(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}

/// Computes the `sha256:<hex>` digest of a file's contents.
///
/// Provided for [`ImageHandler`] implementations; the manager itself only
/// consumes digests through the handler contract.
pub fn digest_file(path: &Path) -> Result<String> {
    let data = fs::read(path)?;
    Ok(digest_bytes(&data))
}

// =============================================================================
// Image Handler Contract
// =============================================================================

/// Unpack/validate/digest engine for service bundles.
///
/// Implementations own the archive format and the layout of the installed
/// bundle; the manager only sees the installed path and the space handle
/// charged for it.
#[async_trait]
pub trait ImageHandler: Send + Sync {
    /// Unpacks a downloaded archive into `services_dir` and reserves
    /// installed space sized to the actual unpacked bytes.
    ///
    /// On success the returned handle is still pending: the caller commits
    /// it with [`SpaceHandle::accept`] once the record is persisted, or
    /// rolls it back with [`SpaceHandle::release`].
    async fn install_service(
        &self,
        archive_path: &Path,
        services_dir: &Path,
        desired: &DesiredService,
    ) -> Result<(PathBuf, SpaceHandle)>;

    /// Validates the content of an installed bundle.
    async fn validate_service(&self, image_path: &Path) -> Result<()>;

    /// Computes the digest of a file, typically the bundle manifest.
    async fn calculate_digest(&self, path: &Path) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_to_path() {
        let path = digest_to_path("sha256:abcd1234").unwrap();
        assert_eq!(path, PathBuf::from("sha256").join("abcd1234"));
    }

    #[test]
    fn test_digest_to_path_rejects_malformed() {
        assert!(digest_to_path("no-colon").is_err());
        assert!(digest_to_path(":empty-algo").is_err());
        assert!(digest_to_path("sha256:").is_err());
        assert!(digest_to_path("sha256:../../escape").is_err());
        assert!(digest_to_path("sha/256:abcd").is_err());
    }

    #[test]
    fn test_image_parts_from_manifest() {
        let manifest = ImageManifest {
            schema_version: 2,
            config: Descriptor {
                media_type: None,
                digest: "sha256:11111111".to_string(),
                size: 0,
            },
            layers: vec![Descriptor {
                media_type: None,
                digest: "sha256:33333333".to_string(),
                size: 0,
            }],
            service_config: Some(Descriptor {
                media_type: None,
                digest: "sha256:22222222".to_string(),
                size: 0,
            }),
        };

        let parts = image_parts_from_manifest(&manifest).unwrap();

        assert_eq!(parts.image_config_path, PathBuf::from("sha256/11111111"));
        assert_eq!(parts.service_config_path, PathBuf::from("sha256/22222222"));
        assert_eq!(parts.service_fs_path, PathBuf::from("sha256/33333333"));
    }

    #[test]
    fn test_image_parts_requires_layers() {
        let manifest = ImageManifest {
            schema_version: 2,
            config: Descriptor {
                media_type: None,
                digest: "sha256:11111111".to_string(),
                size: 0,
            },
            layers: vec![],
            service_config: Some(Descriptor {
                media_type: None,
                digest: "sha256:22222222".to_string(),
                size: 0,
            }),
        };

        assert!(image_parts_from_manifest(&manifest).is_err());
    }

    #[test]
    fn test_digest_bytes_known_value() {
        // SHA-256 of the empty input.
        assert_eq!(
            digest_bytes(b""),
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
