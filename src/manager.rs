//! # Service Manager - Bundle Lifecycle Reconciliation
//!
//! This is the **core module**: it reconciles on-disk service bundles
//! against the orchestrator's desired set, drives the bounded-concurrency
//! install pipeline, and enforces the storage budget through eviction and
//! version retention.
//!
//! ## Reconciliation Pipeline
//!
//! One [`ServiceManager::process_desired_services`] pass runs these stages
//! strictly in order (reordering them would under- or over-count space):
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │ 1. State transitions                                                │
//! │    installed ∩ desired  → Active  (validate, report Installed)      │
//! │    installed ∖ desired  → Cached  (register as outdated item)       │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │ 2. Pressure eviction                                                │
//! │    while records + pending installs > budget:                       │
//! │        evict oldest Cached record (fail hard if none)               │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │ 3. Install pipeline (bounded worker pool, default width 5)          │
//! │    download → unpack → digest → persist record → accept space       │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │ 4. Version truncation                                               │
//! │    per desired service ID, drop oldest non-Active versions          │
//! │    beyond the retention threshold                                   │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Failure Isolation
//!
//! Storage and bookkeeping failures abort the pass and surface in
//! [`ReconcileReport::error`]. Install and validation failures are isolated
//! into the failing service's [`ServiceStatus`]; the pass continues for all
//! other services. Every originally-desired service receives exactly one
//! status either way.
//!
//! ## Locking Discipline
//!
//! A single pass-wide `tokio::sync::Mutex` serializes every mutating entry
//! point (`process_desired_services`, `get_service`, `get_all_services`,
//! `get_image_parts`, `validate_service`, `remove_item`, and the background
//! sweep tick). Concurrent top-level calls on one manager are serialized,
//! never interleaved. The install worker pool lives entirely inside one
//! pass: it is created at the start, fully drained before the pass returns,
//! and no install task outlives its originating call.
//!
//! ## Removal Uniformity
//!
//! TTL eviction, pressure eviction, truncation, and administrative removal
//! all funnel through one primitive (delete directory, clear outdated-item
//! entry, free space, remove record). Only the *selection* of records
//! differs per trigger, so space bookkeeping is never double-released or
//! leaked regardless of which trigger fired.

use crate::constants::{
    validate_service_id, DEFAULT_CACHE_TTL, DEFAULT_CLEANUP_PERIOD, DEFAULT_INSTALL_PARALLELISM,
    DEFAULT_MAX_SERVICES, DEFAULT_RETAIN_VERSIONS, DOWNLOAD_DIR, IMAGE_BLOBS_DIR,
    IMAGE_MANIFEST_FILE, SERVICES_DIR,
};
use crate::downloader::{DownloadContent, Downloader};
use crate::error::{Error, Result};
use crate::image::{image_parts_from_manifest, ImageHandler, ImageManifest, ImageParts};
use crate::service::{
    compare_versions, DesiredService, InstallStatus, ServiceRecord, ServiceState, ServiceStatus,
};
use crate::space::SpaceAllocator;
use crate::storage::Storage;
use chrono::Utc;
use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Service manager configuration.
///
/// All values have defaults from [`crate::constants`]; the base directory
/// defaults to `~/.magikstore`.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding installed service bundles.
    pub services_dir: PathBuf,
    /// Download staging directory; cleared on startup.
    pub download_dir: PathBuf,
    /// Maximum number of service records across all services.
    pub max_services: usize,
    /// Concurrent installs per reconciliation pass.
    pub install_parallelism: usize,
    /// Non-active versions retained per service ID after truncation.
    pub retain_versions: usize,
    /// Time-to-live of cached bundles.
    pub cache_ttl: Duration,
    /// Period of the background cached-bundle sweep.
    pub cleanup_period: Duration,
}

impl Config {
    /// Builds a configuration rooted at `base_dir`.
    #[must_use]
    pub fn with_base_dir(base_dir: &Path) -> Self {
        Self {
            services_dir: base_dir.join(SERVICES_DIR),
            download_dir: base_dir.join(DOWNLOAD_DIR),
            max_services: DEFAULT_MAX_SERVICES,
            install_parallelism: DEFAULT_INSTALL_PARALLELISM,
            retain_versions: DEFAULT_RETAIN_VERSIONS,
            cache_ttl: DEFAULT_CACHE_TTL,
            cleanup_period: DEFAULT_CLEANUP_PERIOD,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let base_dir = if let Some(home) = dirs::home_dir() {
            home.join(".magikstore")
        } else {
            PathBuf::from(".magikstore")
        };

        Self::with_base_dir(&base_dir)
    }
}

// =============================================================================
// Reconcile Report
// =============================================================================

/// Result of one reconciliation pass.
///
/// `statuses` always holds exactly one entry per originally-desired service,
/// whether or not the pass also hit a fatal bookkeeping error.
#[derive(Debug)]
pub struct ReconcileReport {
    /// Per-service outcomes.
    pub statuses: Vec<ServiceStatus>,
    /// Fatal error that aborted the pass, if any.
    pub error: Option<Error>,
}

impl ReconcileReport {
    /// Returns true when the pass completed without a fatal error.
    ///
    /// Individual services may still have failed; check `statuses`.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

// =============================================================================
// Service Manager
// =============================================================================

struct SweepHandle {
    shutdown: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

/// Shared internals, cloned into install tasks and the background sweep.
struct Inner {
    config: Config,
    storage: Arc<dyn Storage>,
    downloader: Arc<dyn Downloader>,
    image_handler: Arc<dyn ImageHandler>,
    service_allocator: Arc<dyn SpaceAllocator>,
    download_allocator: Arc<dyn SpaceAllocator>,
    /// Serializes all mutating entry points against each other.
    lock: tokio::sync::Mutex<()>,
}

/// On-node service bundle lifecycle manager.
///
/// Owns the installed-services directory and the download staging
/// directory; reconciles them against desired sets handed in by the
/// orchestrator. Thread-safe: entry points serialize on an internal lock.
pub struct ServiceManager {
    inner: Arc<Inner>,
    sweep: std::sync::Mutex<Option<SweepHandle>>,
}

impl ServiceManager {
    /// Creates a manager and runs startup recovery.
    ///
    /// Recovery re-registers cached bundles with the space allocator,
    /// removes damaged entries (records without a bundle directory, bundle
    /// directories without a record), and sweeps expired cached bundles
    /// once. The staging directory is cleared: its content is never
    /// referenced by a record.
    pub fn new(
        config: Config,
        storage: Arc<dyn Storage>,
        downloader: Arc<dyn Downloader>,
        image_handler: Arc<dyn ImageHandler>,
        service_allocator: Arc<dyn SpaceAllocator>,
        download_allocator: Arc<dyn SpaceAllocator>,
    ) -> Result<Self> {
        debug!("Init service manager");

        fs::create_dir_all(&config.services_dir)?;

        if config.download_dir.exists() {
            fs::remove_dir_all(&config.download_dir)?;
        }
        fs::create_dir_all(&config.download_dir)?;

        let inner = Arc::new(Inner {
            config,
            storage,
            downloader,
            image_handler,
            service_allocator,
            download_allocator,
            lock: tokio::sync::Mutex::new(()),
        });

        let services = inner.storage.get_all_services()?;

        for record in &services {
            if record.state != ServiceState::Cached {
                continue;
            }

            inner.service_allocator.add_outdated_item(
                &record.item_id(),
                record.size,
                record.timestamp,
            )?;
        }

        if let Err(err) = inner.remove_damaged_service_folders(&services) {
            error!("Can't remove damaged service folders: {}", err);
        }

        match inner.storage.get_all_services() {
            Ok(services) => {
                if let Err(err) = inner.remove_expired(&services) {
                    error!("Can't remove outdated services: {}", err);
                }
            }
            Err(err) => error!("Can't get services: {}", err),
        }

        Ok(Self {
            inner,
            sweep: std::sync::Mutex::new(None),
        })
    }

    /// Starts the background sweep removing expired cached bundles.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotSupported`] when the sweep is already running.
    pub fn start(&self) -> Result<()> {
        debug!("Start service manager");

        let mut sweep = self.sweep.lock().unwrap();
        if sweep.is_some() {
            return Err(Error::NotSupported(
                "service manager already started".to_string(),
            ));
        }

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let inner = Arc::clone(&self.inner);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.config.cleanup_period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // interval fires immediately; the first sweep already ran at init
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let _guard = inner.lock.lock().await;

                        match inner.storage.get_all_services() {
                            Ok(services) => {
                                if let Err(err) = inner.remove_expired(&services) {
                                    error!("Failed to remove outdated services: {}", err);
                                }
                            }
                            Err(err) => error!("Can't get services: {}", err),
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        });

        *sweep = Some(SweepHandle { shutdown, task });

        Ok(())
    }

    /// Stops the background sweep.
    ///
    /// Waits for an in-flight sweep tick to finish; returns immediately
    /// when the sweep was never started.
    pub async fn stop(&self) -> Result<()> {
        debug!("Stop service manager");

        let handle = self.sweep.lock().unwrap().take();

        if let Some(handle) = handle {
            let _ = handle.shutdown.send(true);
            let _ = handle.task.await;
        }

        Ok(())
    }

    /// Reconciles local storage against the orchestrator's desired set.
    ///
    /// Returns one status per desired service; see the module docs for the
    /// pipeline stages and failure isolation rules.
    pub async fn process_desired_services(&self, desired: &[DesiredService]) -> ReconcileReport {
        let _guard = self.inner.lock.lock().await;

        debug!("Process desired services: {} desired", desired.len());

        let mut statuses = Vec::with_capacity(desired.len());
        let error = match self.reconcile(desired, &mut statuses).await {
            Ok(()) => None,
            Err(err) => Some(err),
        };

        if let Some(err) = &error {
            // Services the aborted pass never reached still get an outcome.
            let message = format!("reconciliation aborted: {}", err);

            for service in desired {
                if !has_status(&statuses, &service.service_id, &service.version) {
                    statuses.push(ServiceStatus {
                        service_id: service.service_id.clone(),
                        version: service.version.clone(),
                        status: InstallStatus::Error {
                            message: message.clone(),
                        },
                    });
                }
            }
        }

        ReconcileReport { statuses, error }
    }

    /// Returns the non-cached record for `service_id`.
    pub async fn get_service(&self, service_id: &str) -> Result<ServiceRecord> {
        let _guard = self.inner.lock.lock().await;

        let mut services = self.inner.storage.get_all_services()?;
        services.sort_by(|a, b| compare_versions(&a.version, &b.version));

        services
            .into_iter()
            .find(|record| record.service_id == service_id && record.state != ServiceState::Cached)
            .ok_or_else(|| Error::ServiceNotFound(service_id.to_string()))
    }

    /// Returns all stored records.
    pub async fn get_all_services(&self) -> Result<Vec<ServiceRecord>> {
        let _guard = self.inner.lock.lock().await;

        self.inner.storage.get_all_services()
    }

    /// Resolves the on-disk parts of an installed bundle.
    pub async fn get_image_parts(&self, record: &ServiceRecord) -> Result<ImageParts> {
        let _guard = self.inner.lock.lock().await;

        debug!("Get image parts: {}", record.service_id);

        let manifest = ImageManifest::load(&record.image_path)?;
        let parts = image_parts_from_manifest(&manifest)?;
        let blobs = record.image_path.join(IMAGE_BLOBS_DIR);

        Ok(ImageParts {
            image_config_path: blobs.join(parts.image_config_path),
            service_config_path: blobs.join(parts.service_config_path),
            service_fs_path: blobs.join(parts.service_fs_path),
        })
    }

    /// Validates an installed bundle against its recorded manifest digest,
    /// then delegates content validation to the image handler.
    pub async fn validate_service(&self, record: &ServiceRecord) -> Result<()> {
        let _guard = self.inner.lock.lock().await;

        self.inner.validate_service(record).await
    }

    /// Removes a service version by its composite `<service>_<version>` ID.
    ///
    /// Administrative entry point; uses the same removal primitive as the
    /// eviction triggers.
    pub async fn remove_item(&self, item_id: &str) -> Result<()> {
        let _guard = self.inner.lock.lock().await;

        let parts: Vec<&str> = item_id.split('_').collect();
        let &[service_id, version] = parts.as_slice() else {
            return Err(Error::InvalidItemId(item_id.to_string()));
        };

        let services = self.inner.storage.get_service_versions(service_id)?;

        for record in &services {
            if record.version == version {
                self.inner.remove_service_from_system(record)?;
            }
        }

        Ok(())
    }

    // =========================================================================
    // Reconciliation Stages
    // =========================================================================

    async fn reconcile(
        &self,
        desired: &[DesiredService],
        statuses: &mut Vec<ServiceStatus>,
    ) -> Result<()> {
        let inner = &self.inner;

        // Invalid IDs would become hostile path segments; fail them up front
        // without aborting the pass.
        let mut remaining: Vec<DesiredService> = Vec::with_capacity(desired.len());

        for service in desired {
            match validate_service_id(&service.service_id) {
                Ok(()) => remaining.push(service.clone()),
                Err(reason) => {
                    warn!(
                        "Rejecting desired service '{}': {}",
                        service.service_id, reason
                    );
                    statuses.push(ServiceStatus {
                        service_id: service.service_id.clone(),
                        version: service.version.clone(),
                        status: InstallStatus::Error {
                            message: Error::InvalidServiceId {
                                service_id: service.service_id.clone(),
                                reason,
                            }
                            .to_string(),
                        },
                    });
                }
            }
        }

        // Stage 1: state transitions.
        let installed = inner.storage.get_all_services()?;

        for record in &installed {
            let matched = remaining.iter().position(|service| {
                record.service_id == service.service_id && record.version == service.version
            });

            let Some(index) = matched else {
                if record.state != ServiceState::Cached {
                    inner.set_service_state(record, ServiceState::Cached)?;
                }

                continue;
            };

            if record.state != ServiceState::Active {
                inner.set_service_state(record, ServiceState::Active)?;
            }

            remaining.remove(index);

            let status = match inner.validate_service(record).await {
                Ok(()) => InstallStatus::Installed,
                Err(err) => {
                    warn!(
                        "Service validation failed: serviceID={}, version={}, err={}",
                        record.service_id, record.version, err
                    );
                    InstallStatus::Error {
                        message: err.to_string(),
                    }
                }
            };

            upsert_status(statuses, &record.service_id, &record.version, status);
        }

        // Stage 2: pressure eviction keeps the record budget honest before
        // any new install claims a slot.
        inner.make_headroom(remaining.len())?;

        // Stage 3: install pipeline.
        self.install_all(remaining, statuses).await;

        // Stage 4: version truncation for every desired service ID.
        let mut truncated: Vec<&str> = Vec::new();

        for service in desired {
            if truncated.contains(&service.service_id.as_str()) {
                continue;
            }
            truncated.push(&service.service_id);

            inner.truncate_service_versions(&service.service_id)?;
        }

        Ok(())
    }

    /// Runs installs on a worker pool of `install_parallelism` tasks and
    /// drains it completely before returning.
    async fn install_all(
        &self,
        pending: Vec<DesiredService>,
        statuses: &mut Vec<ServiceStatus>,
    ) {
        let parallelism = self.inner.config.install_parallelism.max(1);
        let mut queue = pending.into_iter();
        let mut pool: JoinSet<(String, String, Result<()>)> = JoinSet::new();

        loop {
            while pool.len() < parallelism {
                let Some(service) = queue.next() else {
                    break;
                };

                upsert_status(
                    statuses,
                    &service.service_id,
                    &service.version,
                    InstallStatus::Installing,
                );

                let inner = Arc::clone(&self.inner);
                pool.spawn(async move {
                    let service_id = service.service_id.clone();
                    let version = service.version.clone();
                    let result = inner.install_service(service).await;

                    (service_id, version, result)
                });
            }

            let Some(joined) = pool.join_next().await else {
                break;
            };

            match joined {
                Ok((service_id, version, Ok(()))) => {
                    upsert_status(statuses, &service_id, &version, InstallStatus::Installed);
                }
                Ok((service_id, version, Err(err))) => {
                    error!(
                        "Can't install service: serviceID={}, version={}, err={}",
                        service_id, version, err
                    );
                    upsert_status(
                        statuses,
                        &service_id,
                        &version,
                        InstallStatus::Error {
                            message: err.to_string(),
                        },
                    );
                }
                Err(join_err) => {
                    // A panicked install task loses its identity; the
                    // fatal-error padding in process_desired_services
                    // covers its status.
                    error!("Install task failed: {}", join_err);
                }
            }
        }
    }
}

impl Drop for ServiceManager {
    fn drop(&mut self) {
        if let Ok(mut sweep) = self.sweep.lock() {
            if let Some(handle) = sweep.take() {
                handle.task.abort();
            }
        }
    }
}

// =============================================================================
// Internals
// =============================================================================

impl Inner {
    /// Installs one service bundle: reserve staging space, download,
    /// unpack, digest, persist.
    ///
    /// The staging reservation is never accepted: it is released, and the
    /// staging path removed, on every path out of this function. The
    /// installed-space reservation is accepted only after the record is
    /// persisted.
    async fn install_service(self: Arc<Self>, service: DesiredService) -> Result<()> {
        info!(
            "Install service: serviceID={}, version={}",
            service.service_id, service.version
        );

        let download_space = self.download_allocator.allocate_space(service.size)?;
        let archive_path = self.config.download_dir.join(&service.service_id);

        let result = self.download_and_install(&service, &archive_path).await;

        debug!("Cleanup download space");
        remove_path_best_effort(&archive_path);
        download_space.release();

        result
    }

    async fn download_and_install(
        &self,
        service: &DesiredService,
        archive_path: &Path,
    ) -> Result<()> {
        self.downloader
            .download(&service.url, archive_path, DownloadContent::Service)
            .await?;

        let (service_path, service_space) = self
            .image_handler
            .install_service(archive_path, &self.config.services_dir, service)
            .await?;

        match self
            .register_service(service, &service_path, service_space.size())
            .await
        {
            Ok(()) => {
                service_space.accept();
                Ok(())
            }
            Err(err) => {
                error!(
                    "Can't install service: serviceID={}, version={}, imagePath={}, err={}",
                    service.service_id,
                    service.version,
                    service_path.display(),
                    err
                );
                remove_path_best_effort(&service_path);
                service_space.release();
                Err(err)
            }
        }
    }

    async fn register_service(
        &self,
        service: &DesiredService,
        service_path: &Path,
        size: u64,
    ) -> Result<()> {
        let manifest_digest = self
            .image_handler
            .calculate_digest(&service_path.join(IMAGE_MANIFEST_FILE))
            .await?;

        let record = ServiceRecord {
            service_id: service.service_id.clone(),
            provider_id: service.provider_id.clone(),
            version: service.version.clone(),
            image_path: service_path.to_path_buf(),
            manifest_digest,
            timestamp: Utc::now(),
            state: ServiceState::Active,
            size,
            gid: service.gid,
        };

        self.storage.add_service(&record)?;

        info!(
            "Service successfully installed: serviceID={}, version={}, path={}",
            record.service_id,
            record.version,
            record.image_path.display()
        );

        Ok(())
    }

    async fn validate_service(&self, record: &ServiceRecord) -> Result<()> {
        debug!(
            "Validate service: serviceID={}, version={}",
            record.service_id, record.version
        );

        let computed = self
            .image_handler
            .calculate_digest(&record.image_path.join(IMAGE_MANIFEST_FILE))
            .await?;

        if computed != record.manifest_digest {
            return Err(Error::ChecksumMismatch {
                expected: record.manifest_digest.clone(),
                computed,
            });
        }

        self.image_handler.validate_service(&record.image_path).await
    }

    /// Transitions a record between Active and Cached, refreshing its
    /// timestamp and keeping the allocator's outdated-item registry in sync.
    fn set_service_state(&self, record: &ServiceRecord, state: ServiceState) -> Result<()> {
        debug!(
            "Set service state: serviceID={}, version={}, state={}",
            record.service_id, record.version, state
        );

        let mut updated = record.clone();
        updated.state = state;
        updated.timestamp = Utc::now();

        self.storage.update_service(&updated)?;

        let item_id = record.item_id();

        if state == ServiceState::Cached {
            self.service_allocator
                .add_outdated_item(&item_id, record.size, updated.timestamp)?;
        } else if record.state == ServiceState::Cached {
            self.service_allocator.restore_outdated_item(&item_id)?;
        }

        Ok(())
    }

    /// Evicts cached records until `pending` new installs fit the record
    /// budget.
    ///
    /// Victims are picked oldest-version-first within lexicographic service
    /// ID order. Fails hard when the budget cannot be met: nothing but a
    /// Cached record is ever sacrificed for headroom.
    fn make_headroom(&self, pending: usize) -> Result<()> {
        let mut stored = self.storage.get_all_services()?;

        while stored.len() + pending > self.config.max_services {
            let victim = stored
                .iter()
                .enumerate()
                .filter(|(_, record)| record.state == ServiceState::Cached)
                .min_by(|(_, a), (_, b)| order_for_eviction(a, b))
                .map(|(index, _)| index);

            let Some(index) = victim else {
                return Err(Error::CapacityExceeded {
                    count: stored.len() + pending,
                    limit: self.config.max_services,
                });
            };

            let record = stored.remove(index);

            info!(
                "Evict cached service for headroom: serviceID={}, version={}",
                record.service_id, record.version
            );

            self.remove_service_from_system(&record)?;
        }

        Ok(())
    }

    /// Truncates one service's version history to the retention threshold.
    ///
    /// Oldest versions go first; the Active record is exempt.
    fn truncate_service_versions(&self, service_id: &str) -> Result<()> {
        let mut versions = self.storage.get_service_versions(service_id)?;
        versions.sort_by(|a, b| compare_versions(&a.version, &b.version));

        let non_active = versions
            .iter()
            .filter(|record| record.state != ServiceState::Active)
            .count();
        let mut excess = non_active.saturating_sub(self.config.retain_versions);

        for record in &versions {
            if excess == 0 {
                break;
            }

            if record.state == ServiceState::Active {
                continue;
            }

            debug!(
                "Truncate service version: serviceID={}, version={}",
                record.service_id, record.version
            );

            self.remove_service_from_system(record)?;
            excess -= 1;
        }

        Ok(())
    }

    /// Removes expired cached bundles (TTL eviction).
    fn remove_expired(&self, services: &[ServiceRecord]) -> Result<()> {
        debug!("Remove outdated services");

        let now = Utc::now();
        let ttl = chrono::Duration::from_std(self.config.cache_ttl)
            .unwrap_or_else(|_| chrono::Duration::MAX);

        for record in services {
            if record.state != ServiceState::Cached {
                continue;
            }

            let expires_at = record
                .timestamp
                .checked_add_signed(ttl)
                .unwrap_or(chrono::DateTime::<Utc>::MAX_UTC);

            if now < expires_at {
                continue;
            }

            debug!(
                "Service outdated: serviceID={}, version={}",
                record.service_id, record.version
            );

            self.remove_service_from_system(record)?;
        }

        Ok(())
    }

    /// The single removal primitive shared by all eviction triggers.
    ///
    /// Directory removal and outdated-item cleanup are best effort: the
    /// record row is the source of truth and its removal is the only
    /// propagated failure.
    fn remove_service_from_system(&self, record: &ServiceRecord) -> Result<()> {
        info!(
            "Remove service: serviceID={}, providerID={}, version={}, path={}",
            record.service_id,
            record.provider_id,
            record.version,
            record.image_path.display()
        );

        remove_path_best_effort(&record.image_path);

        if record.state == ServiceState::Cached {
            if let Err(err) = self
                .service_allocator
                .restore_outdated_item(&record.item_id())
            {
                warn!(
                    "Can't restore outdated item: id={}, err={}",
                    record.item_id(),
                    err
                );
            }
        }

        self.service_allocator.free_space(record.size);

        self.storage
            .remove_service(&record.service_id, &record.version)?;

        debug!(
            "Service successfully removed: serviceID={}, version={}",
            record.service_id, record.version
        );

        Ok(())
    }

    /// Reconciles disk and records at startup: records without a bundle
    /// directory are removed, bundle directories without a record are
    /// deleted.
    fn remove_damaged_service_folders(&self, services: &[ServiceRecord]) -> Result<()> {
        debug!("Remove damaged service folders");

        for record in services {
            if record.image_path.exists() {
                continue;
            }

            warn!("Service missing: imagePath={}", record.image_path.display());

            self.remove_service_from_system(record)?;
        }

        for entry in fs::read_dir(&self.config.services_dir)? {
            let path = entry?.path();

            if services.iter().any(|record| record.image_path == path) {
                continue;
            }

            warn!("Service missing in storage: imagePath={}", path.display());

            fs::remove_dir_all(&path)?;
        }

        Ok(())
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Eviction order: lexicographic service ID, then oldest version first.
fn order_for_eviction(a: &ServiceRecord, b: &ServiceRecord) -> Ordering {
    a.service_id
        .cmp(&b.service_id)
        .then_with(|| compare_versions(&a.version, &b.version))
}

fn has_status(statuses: &[ServiceStatus], service_id: &str, version: &str) -> bool {
    statuses
        .iter()
        .any(|status| status.service_id == service_id && status.version == version)
}

/// Replaces a service's status in place, or appends it.
fn upsert_status(
    statuses: &mut Vec<ServiceStatus>,
    service_id: &str,
    version: &str,
    status: InstallStatus,
) {
    if let Some(existing) = statuses
        .iter_mut()
        .find(|entry| entry.service_id == service_id && entry.version == version)
    {
        existing.status = status;
        return;
    }

    statuses.push(ServiceStatus {
        service_id: service_id.to_string(),
        version: version.to_string(),
        status,
    });
}

/// Best-effort file or directory removal; failures are logged, never
/// propagated, since the caller's primary error already explains the state.
fn remove_path_best_effort(path: &Path) {
    if !path.exists() {
        return;
    }

    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };

    if let Err(err) = result {
        warn!("Can't remove {}: {}", path.display(), err);
    }
}
