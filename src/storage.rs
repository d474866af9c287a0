//! # Service Record Store
//!
//! Durable key-indexed store for [`ServiceRecord`] rows. The manager is the
//! only writer; the store is the sole durable owner of record state.
//!
//! ## Contract
//!
//! `(service_id, version)` is the unique key:
//!
//! - [`Storage::add_service`] rejects duplicates with
//!   [`Error::ServiceAlreadyExists`]
//! - [`Storage::update_service`] and [`Storage::remove_service`] require the
//!   row to exist and fail with [`Error::ServiceNotFound`] otherwise
//!
//! Any durable store satisfying this contract works; production deployments
//! typically sit on an embedded database. [`FileStorage`] is the reference
//! implementation: a single JSON file rewritten atomically on every
//! mutation.
//!
//! ## Atomic Writes
//!
//! `FileStorage` persists via a temp file + rename pattern:
//! 1. Write to `<path>.tmp.<uuid>`
//! 2. Rename to `<path>`
//!
//! This prevents a torn record file on crash. Unique temp names keep
//! concurrent flushes from colliding; the final rename is atomic and the
//! last writer wins with a complete file.

use crate::error::{Error, Result};
use crate::service::ServiceRecord;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

// =============================================================================
// Storage Contract
// =============================================================================

/// Durable record store for service metadata.
pub trait Storage: Send + Sync {
    /// Adds a new record.
    ///
    /// # Errors
    ///
    /// [`Error::ServiceAlreadyExists`] when a record with the same
    /// `(service_id, version)` is already stored.
    fn add_service(&self, record: &ServiceRecord) -> Result<()>;

    /// Updates an existing record.
    ///
    /// # Errors
    ///
    /// [`Error::ServiceNotFound`] when no such `(service_id, version)` row
    /// exists.
    fn update_service(&self, record: &ServiceRecord) -> Result<()>;

    /// Removes a record.
    ///
    /// # Errors
    ///
    /// [`Error::ServiceNotFound`] when no such `(service_id, version)` row
    /// exists.
    fn remove_service(&self, service_id: &str, version: &str) -> Result<()>;

    /// Returns all stored records for one service ID.
    fn get_service_versions(&self, service_id: &str) -> Result<Vec<ServiceRecord>>;

    /// Returns all stored records.
    fn get_all_services(&self) -> Result<Vec<ServiceRecord>>;
}

// =============================================================================
// File Storage
// =============================================================================

/// JSON-file record store.
pub struct FileStorage {
    path: PathBuf,
    records: Mutex<HashMap<(String, String), ServiceRecord>>,
}

impl FileStorage {
    /// Opens (or creates) a record store at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let records = if path.exists() {
            let data =
                fs::read(&path).map_err(|e| Error::StorageFailed(e.to_string()))?;
            let list: Vec<ServiceRecord> =
                serde_json::from_slice(&data).map_err(|e| Error::StorageFailed(e.to_string()))?;

            list.into_iter()
                .map(|r| ((r.service_id.clone(), r.version.clone()), r))
                .collect()
        } else {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|e| Error::StorageFailed(e.to_string()))?;
            }
            HashMap::new()
        };

        info!(
            "Record store opened at {} ({} records)",
            path.display(),
            records.len()
        );

        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    /// Store file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, records: &HashMap<(String, String), ServiceRecord>) -> Result<()> {
        let mut list: Vec<&ServiceRecord> = records.values().collect();
        list.sort_by(|a, b| {
            (&a.service_id, &a.version).cmp(&(&b.service_id, &b.version))
        });

        let data = serde_json::to_vec_pretty(&list)
            .map_err(|e| Error::StorageFailed(e.to_string()))?;

        let temp_name = format!("tmp.{}", uuid::Uuid::now_v7());
        let temp_path = self.path.with_extension(temp_name);
        fs::write(&temp_path, data).map_err(|e| Error::StorageFailed(e.to_string()))?;
        fs::rename(&temp_path, &self.path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            Error::StorageFailed(e.to_string())
        })?;

        debug!("Flushed {} records to {}", list.len(), self.path.display());
        Ok(())
    }
}

impl Storage for FileStorage {
    fn add_service(&self, record: &ServiceRecord) -> Result<()> {
        let mut records = self.records.lock().unwrap();
        let key = (record.service_id.clone(), record.version.clone());

        if records.contains_key(&key) {
            return Err(Error::ServiceAlreadyExists {
                service_id: record.service_id.clone(),
                version: record.version.clone(),
            });
        }

        records.insert(key, record.clone());
        self.flush(&records)
    }

    fn update_service(&self, record: &ServiceRecord) -> Result<()> {
        let mut records = self.records.lock().unwrap();
        let key = (record.service_id.clone(), record.version.clone());

        if !records.contains_key(&key) {
            return Err(Error::ServiceNotFound(record.service_id.clone()));
        }

        records.insert(key, record.clone());
        self.flush(&records)
    }

    fn remove_service(&self, service_id: &str, version: &str) -> Result<()> {
        let mut records = self.records.lock().unwrap();
        let key = (service_id.to_string(), version.to_string());

        if records.remove(&key).is_none() {
            return Err(Error::ServiceNotFound(service_id.to_string()));
        }

        self.flush(&records)
    }

    fn get_service_versions(&self, service_id: &str) -> Result<Vec<ServiceRecord>> {
        let records = self.records.lock().unwrap();
        Ok(records
            .values()
            .filter(|r| r.service_id == service_id)
            .cloned()
            .collect())
    }

    fn get_all_services(&self) -> Result<Vec<ServiceRecord>> {
        let records = self.records.lock().unwrap();
        Ok(records.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::ServiceState;
    use chrono::Utc;
    use tempfile::TempDir;

    fn record(service_id: &str, version: &str) -> ServiceRecord {
        ServiceRecord {
            service_id: service_id.to_string(),
            provider_id: "provider1".to_string(),
            version: version.to_string(),
            image_path: PathBuf::from("/srv").join(service_id),
            manifest_digest: "sha256:abcd".to_string(),
            timestamp: Utc::now(),
            state: ServiceState::Active,
            size: 1024,
            gid: 5000,
        }
    }

    #[test]
    fn test_add_and_get() {
        let temp = TempDir::new().unwrap();
        let storage = FileStorage::open(temp.path().join("services.json")).unwrap();

        storage.add_service(&record("svc1", "1.0.0")).unwrap();
        storage.add_service(&record("svc1", "2.0.0")).unwrap();
        storage.add_service(&record("svc2", "1.0.0")).unwrap();

        assert_eq!(storage.get_all_services().unwrap().len(), 3);
        assert_eq!(storage.get_service_versions("svc1").unwrap().len(), 2);
    }

    #[test]
    fn test_duplicate_add_fails() {
        let temp = TempDir::new().unwrap();
        let storage = FileStorage::open(temp.path().join("services.json")).unwrap();

        storage.add_service(&record("svc1", "1.0.0")).unwrap();
        let result = storage.add_service(&record("svc1", "1.0.0"));

        assert!(matches!(
            result,
            Err(Error::ServiceAlreadyExists { .. })
        ));
    }

    #[test]
    fn test_update_missing_fails() {
        let temp = TempDir::new().unwrap();
        let storage = FileStorage::open(temp.path().join("services.json")).unwrap();

        let result = storage.update_service(&record("svc1", "1.0.0"));
        assert!(matches!(result, Err(Error::ServiceNotFound(_))));
    }

    #[test]
    fn test_remove_missing_fails() {
        let temp = TempDir::new().unwrap();
        let storage = FileStorage::open(temp.path().join("services.json")).unwrap();

        let result = storage.remove_service("svc1", "1.0.0");
        assert!(matches!(result, Err(Error::ServiceNotFound(_))));
    }

    #[test]
    fn test_persistence_across_reopen() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("services.json");

        {
            let storage = FileStorage::open(&path).unwrap();
            storage.add_service(&record("svc1", "1.0.0")).unwrap();

            let mut updated = record("svc1", "1.0.0");
            updated.state = ServiceState::Cached;
            storage.update_service(&updated).unwrap();
        }

        let reopened = FileStorage::open(&path).unwrap();
        let all = reopened.get_all_services().unwrap();

        assert_eq!(all.len(), 1);
        assert_eq!(all[0].state, ServiceState::Cached);
    }
}
