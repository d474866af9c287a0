//! Shared fixtures and collaborator doubles for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use magikstore::{
    digest_file, Config, Descriptor, DesiredService, DownloadContent, Downloader, Error,
    FileStorage, ImageHandler, ImageManifest, PartitionAllocator, Result, ServiceManager,
    SpaceAllocator, SpaceHandle, SpaceLedger,
};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

// =============================================================================
// Downloader Double
// =============================================================================

/// Downloader double: writes a placeholder archive, or fails on demand.
#[derive(Default)]
pub struct MockDownloader {
    fail_urls: Mutex<HashSet<String>>,
    calls: AtomicUsize,
}

impl MockDownloader {
    /// Makes every download of `url` fail.
    pub fn fail_for(&self, url: &str) {
        self.fail_urls.lock().unwrap().insert(url.to_string());
    }

    /// Number of download attempts so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Downloader for MockDownloader {
    async fn download(&self, url: &str, dest: &Path, _content: DownloadContent) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_urls.lock().unwrap().contains(url) {
            return Err(Error::DownloadFailed {
                url: url.to_string(),
                reason: "simulated network failure".to_string(),
            });
        }

        fs::write(dest, b"bundle-archive")?;
        Ok(())
    }
}

// =============================================================================
// Image Handler Double
// =============================================================================

/// Digests used by the handler double's generated manifests.
pub const CONFIG_DIGEST: &str = "sha256:11111111";
pub const SERVICE_CONFIG_DIGEST: &str = "sha256:22222222";
pub const ROOTFS_DIGEST: &str = "sha256:33333333";

/// Image handler double: "unpacks" a bundle by writing a manifest and blob
/// tree, reserving installed space from the configured allocator.
pub struct MockImageHandler {
    allocator: Arc<dyn SpaceAllocator>,
    fail_install: Mutex<HashSet<String>>,
    fail_digest: Mutex<HashSet<String>>,
    fail_validate: Mutex<HashSet<String>>,
}

impl MockImageHandler {
    pub fn new(allocator: Arc<dyn SpaceAllocator>) -> Self {
        Self {
            allocator,
            fail_install: Mutex::new(HashSet::new()),
            fail_digest: Mutex::new(HashSet::new()),
            fail_validate: Mutex::new(HashSet::new()),
        }
    }

    /// Makes `install_service` fail for this service ID.
    pub fn fail_install_for(&self, service_id: &str) {
        self.fail_install.lock().unwrap().insert(service_id.to_string());
    }

    /// Makes `calculate_digest` fail for paths mentioning this service ID.
    pub fn fail_digest_for(&self, service_id: &str) {
        self.fail_digest.lock().unwrap().insert(service_id.to_string());
    }

    /// Makes `validate_service` fail for paths mentioning this service ID.
    pub fn fail_validate_for(&self, service_id: &str) {
        self.fail_validate.lock().unwrap().insert(service_id.to_string());
    }

    fn matches(set: &Mutex<HashSet<String>>, path: &Path) -> bool {
        let path = path.to_string_lossy();
        set.lock().unwrap().iter().any(|id| path.contains(id.as_str()))
    }
}

#[async_trait]
impl ImageHandler for MockImageHandler {
    async fn install_service(
        &self,
        _archive_path: &Path,
        services_dir: &Path,
        desired: &DesiredService,
    ) -> Result<(PathBuf, SpaceHandle)> {
        if self
            .fail_install
            .lock()
            .unwrap()
            .contains(&desired.service_id)
        {
            return Err(Error::InstallFailed {
                service_id: desired.service_id.clone(),
                reason: "simulated unpack failure".to_string(),
            });
        }

        let image_path =
            services_dir.join(format!("{}_{}", desired.service_id, desired.version));
        let blobs = image_path.join("blobs").join("sha256");
        fs::create_dir_all(&blobs)?;

        fs::write(blobs.join("11111111"), b"image-config")?;
        fs::write(blobs.join("22222222"), b"service-config")?;
        fs::write(blobs.join("33333333"), b"rootfs-layer")?;

        let manifest = ImageManifest {
            schema_version: 2,
            config: Descriptor {
                media_type: None,
                digest: CONFIG_DIGEST.to_string(),
                size: 12,
            },
            layers: vec![Descriptor {
                media_type: None,
                digest: ROOTFS_DIGEST.to_string(),
                size: 12,
            }],
            service_config: Some(Descriptor {
                media_type: None,
                digest: SERVICE_CONFIG_DIGEST.to_string(),
                size: 14,
            }),
        };
        fs::write(
            image_path.join("manifest.json"),
            serde_json::to_vec_pretty(&manifest).map_err(|e| Error::Serialization(e.to_string()))?,
        )?;

        let handle = self.allocator.allocate_space(desired.size)?;

        Ok((image_path, handle))
    }

    async fn validate_service(&self, image_path: &Path) -> Result<()> {
        if Self::matches(&self.fail_validate, image_path) {
            return Err(Error::InstallFailed {
                service_id: image_path.to_string_lossy().to_string(),
                reason: "simulated content corruption".to_string(),
            });
        }

        Ok(())
    }

    async fn calculate_digest(&self, path: &Path) -> Result<String> {
        if Self::matches(&self.fail_digest, path) {
            return Err(Error::InvalidDigest(
                "simulated digest failure".to_string(),
            ));
        }

        digest_file(path)
    }
}

// =============================================================================
// Counting Allocator
// =============================================================================

/// Call-lifecycle counters recorded by [`CountingAllocator`].
#[derive(Debug, Default, Clone)]
pub struct SpaceCounters {
    pub allocations: usize,
    pub commits: usize,
    pub rollbacks: usize,
    pub freed: u64,
    pub outdated_added: usize,
    pub outdated_restored: usize,
}

#[derive(Default)]
struct CountingState {
    counters: Mutex<SpaceCounters>,
}

impl SpaceLedger for CountingState {
    fn commit(&self, _size: u64) {
        self.counters.lock().unwrap().commits += 1;
    }

    fn rollback(&self, _size: u64) {
        self.counters.lock().unwrap().rollbacks += 1;
    }
}

/// Allocator double that records every contract call, for verifying the
/// exactly-one-settlement property.
#[derive(Default)]
pub struct CountingAllocator {
    state: Arc<CountingState>,
}

impl CountingAllocator {
    pub fn counters(&self) -> SpaceCounters {
        self.state.counters.lock().unwrap().clone()
    }
}

impl SpaceAllocator for CountingAllocator {
    fn allocate_space(&self, size: u64) -> Result<SpaceHandle> {
        self.state.counters.lock().unwrap().allocations += 1;
        Ok(SpaceHandle::new(size, self.state.clone()))
    }

    fn free_space(&self, size: u64) {
        self.state.counters.lock().unwrap().freed += size;
    }

    fn add_outdated_item(
        &self,
        _id: &str,
        _size: u64,
        _timestamp: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        self.state.counters.lock().unwrap().outdated_added += 1;
        Ok(())
    }

    fn restore_outdated_item(&self, _id: &str) -> Result<()> {
        self.state.counters.lock().unwrap().outdated_restored += 1;
        Ok(())
    }
}

// =============================================================================
// Fixture
// =============================================================================

/// One managed-storage environment: temp directories, record store,
/// partition allocators, and collaborator doubles.
pub struct Fixture {
    pub temp: TempDir,
    pub config: Config,
    pub storage: Arc<FileStorage>,
    pub downloader: Arc<MockDownloader>,
    pub handler: Arc<MockImageHandler>,
    pub service_allocator: Arc<PartitionAllocator>,
    pub download_allocator: Arc<PartitionAllocator>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config_mut(|_| {})
    }

    pub fn with_config_mut(tweak: impl FnOnce(&mut Config)) -> Self {
        let temp = TempDir::new().unwrap();

        let mut config = Config::with_base_dir(temp.path());
        config.cache_ttl = Duration::from_secs(3600);
        config.cleanup_period = Duration::from_secs(3600);
        tweak(&mut config);

        let storage = Arc::new(FileStorage::open(temp.path().join("services.json")).unwrap());
        let service_allocator = Arc::new(PartitionAllocator::new(1024 * 1024 * 1024));
        let download_allocator = Arc::new(PartitionAllocator::new(1024 * 1024 * 1024));
        let downloader = Arc::new(MockDownloader::default());
        let handler = Arc::new(MockImageHandler::new(service_allocator.clone()));

        Self {
            temp,
            config,
            storage,
            downloader,
            handler,
            service_allocator,
            download_allocator,
        }
    }

    /// Builds a manager over this fixture's state (startup recovery runs).
    pub fn manager(&self) -> ServiceManager {
        ServiceManager::new(
            self.config.clone(),
            self.storage.clone(),
            self.downloader.clone(),
            self.handler.clone(),
            self.service_allocator.clone(),
            self.download_allocator.clone(),
        )
        .unwrap()
    }
}

/// Environment wired with [`CountingAllocator`] doubles instead of real
/// partition allocators.
pub struct CountingFixture {
    pub temp: TempDir,
    pub config: Config,
    pub storage: Arc<FileStorage>,
    pub downloader: Arc<MockDownloader>,
    pub handler: Arc<MockImageHandler>,
    pub service_allocator: Arc<CountingAllocator>,
    pub download_allocator: Arc<CountingAllocator>,
}

impl CountingFixture {
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();

        let mut config = Config::with_base_dir(temp.path());
        config.cache_ttl = Duration::from_secs(3600);
        config.cleanup_period = Duration::from_secs(3600);

        let storage = Arc::new(FileStorage::open(temp.path().join("services.json")).unwrap());
        let service_allocator = Arc::new(CountingAllocator::default());
        let download_allocator = Arc::new(CountingAllocator::default());
        let downloader = Arc::new(MockDownloader::default());
        let handler = Arc::new(MockImageHandler::new(service_allocator.clone()));

        Self {
            temp,
            config,
            storage,
            downloader,
            handler,
            service_allocator,
            download_allocator,
        }
    }

    pub fn manager(&self) -> ServiceManager {
        ServiceManager::new(
            self.config.clone(),
            self.storage.clone(),
            self.downloader.clone(),
            self.handler.clone(),
            self.service_allocator.clone(),
            self.download_allocator.clone(),
        )
        .unwrap()
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Desired-service entry with deterministic URL and defaults.
pub fn desired(service_id: &str, version: &str) -> DesiredService {
    DesiredService {
        service_id: service_id.to_string(),
        provider_id: "provider1".to_string(),
        version: version.to_string(),
        url: format!("https://bundles.example/{}-{}.tar.gz", service_id, version),
        size: 1024,
        gid: 5000,
    }
}
