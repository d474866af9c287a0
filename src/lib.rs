//! # magikstore
//!
//! **Service Bundle Lifecycle Manager**
//!
//! This crate is the on-node package/image lifecycle layer of an edge-device
//! runtime: given a desired set of versioned service bundles (OCI-style
//! images), it reconciles local storage against that desired set by
//! downloading, unpacking, validating, persisting metadata, tracking
//! disk-space consumption, and evicting unneeded or expired bundles, all
//! while never exceeding a fixed storage/record budget.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                          magikstore                                 │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────────────┐    │
//! │  │                     ServiceManager                          │    │
//! │  │  process_desired_services(desired) → per-service statuses  │    │
//! │  │  get_service │ get_image_parts │ remove_item │ start/stop  │    │
//! │  └──────────────────────────┬──────────────────────────────────┘    │
//! │                             │                                       │
//! │  ┌──────────────────────────┼──────────────────────────────────┐    │
//! │  │                 Reconciliation Pass                         │    │
//! │  │  state transitions │ pressure eviction │ install pool │     │    │
//! │  │  version truncation                                         │    │
//! │  └──────────────────────────┼──────────────────────────────────┘    │
//! ├─────────────────────────────┼───────────────────────────────────────┤
//! │                       Collaborators                                 │
//! │  ┌────────────┐ ┌────────────┐ ┌──────────────┐ ┌───────────────┐   │
//! │  │  Storage   │ │ Downloader │ │ ImageHandler │ │ SpaceAllocator│   │
//! │  │ (records)  │ │  (fetch)   │ │(unpack/digest│ │ (byte budget, │   │
//! │  │            │ │            │ │  /validate)  │ │outdated items)│   │
//! │  └────────────┘ └────────────┘ └──────────────┘ └───────────────┘   │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Service Lifecycle
//!
//! ```text
//!                     install
//!   ┌─────────┐   (desired set)   ┌─────────┐
//!   │ (none)  │ ────────────────► │ Active  │ ◄───────────┐
//!   └─────────┘                   └────┬────┘             │
//!        ▲                             │ dropped from     │ re-desired
//!        │                             │ desired set      │
//!        │   TTL / pressure /          ▼                  │
//!        │   truncation           ┌─────────┐             │
//!        └─────────────────────── │ Cached  │ ────────────┘
//!                                 └─────────┘
//! ```
//!
//! Becoming Cached never deletes files by itself: it registers the bundle
//! as an *outdated item* with the space allocator, marking its bytes
//! reclaimable. Deletion happens later, through exactly one of the three
//! eviction triggers (TTL sweep, pressure eviction, version truncation) or
//! an administrative [`ServiceManager::remove_item`].
//!
//! # Resource Guarantees
//!
//! - **Record budget**: the total record count never exceeds
//!   [`Config::max_services`]; cached records are evicted to make headroom
//!   before installs, and the pass fails hard when nothing is evictable.
//! - **Space conservation**: every space reservation reaches exactly one of
//!   accept/release, enforced by consuming methods on
//!   [`SpaceHandle`](space::SpaceHandle) with a release-on-drop backstop.
//! - **Retention bound**: per service ID, at most
//!   [`Config::retain_versions`] non-active versions survive truncation.
//! - **Bounded concurrency**: installs run on a per-pass worker pool
//!   (default width 5) that is fully drained before the pass returns.
//!
//! # Example
//!
//! ```rust,ignore
//! use magikstore::{
//!     Config, DesiredService, FileStorage, PartitionAllocator, ServiceManager,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> magikstore::Result<()> {
//!     let config = Config::default();
//!     let storage = Arc::new(FileStorage::open("services.json")?);
//!
//!     let manager = ServiceManager::new(
//!         config,
//!         storage,
//!         downloader,      // impl Downloader
//!         image_handler,   // impl ImageHandler
//!         Arc::new(PartitionAllocator::new(8 * 1024 * 1024 * 1024)),
//!         Arc::new(PartitionAllocator::new(1024 * 1024 * 1024)),
//!     )?;
//!
//!     manager.start()?;
//!
//!     let report = manager
//!         .process_desired_services(&[DesiredService {
//!             service_id: "telemetry".into(),
//!             provider_id: "provider1".into(),
//!             version: "1.0.0".into(),
//!             url: "https://bundles.example/telemetry-1.0.0.tar.gz".into(),
//!             size: 4 * 1024 * 1024,
//!             gid: 5000,
//!         }])
//!         .await;
//!
//!     for status in &report.statuses {
//!         println!("{}@{}: {}", status.service_id, status.version, status.status);
//!     }
//!
//!     manager.stop().await
//! }
//! ```

pub mod constants;
pub mod downloader;
pub mod error;
pub mod image;
pub mod manager;
pub mod service;
pub mod space;
pub mod storage;

// Re-exports
pub use constants::*;
pub use downloader::{DownloadContent, Downloader};
pub use error::{Error, Result};
pub use image::{
    digest_bytes, digest_file, digest_to_path, image_parts_from_manifest, Descriptor,
    ImageHandler, ImageManifest, ImageParts,
};
pub use manager::{Config, ReconcileReport, ServiceManager};
pub use service::{
    compare_versions, format_item_id, DesiredService, InstallStatus, ServiceRecord, ServiceState,
    ServiceStatus,
};
pub use space::{OutdatedItem, PartitionAllocator, SpaceAllocator, SpaceHandle, SpaceLedger};
pub use storage::{FileStorage, Storage};
