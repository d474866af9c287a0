//! # Disk-Space Budget Accounting
//!
//! Reservation-based space accounting for the two managed partitions:
//! installed services and download staging. Each partition gets its own
//! allocator instance; the allocators are the **sole owners** of space-budget
//! state and must never be bypassed when space changes.
//!
//! ## Reservation Lifecycle
//!
//! ```text
//!   allocate_space(size) ──► SpaceHandle (charged, pending)
//!                                │
//!                  ┌─────────────┴─────────────┐
//!                  ▼                           ▼
//!             accept()                    release()
//!        (committed: stays            (rolled back: charge
//!         charged until                removed immediately)
//!         free_space)
//! ```
//!
//! Every reservation must reach exactly one of `accept` / `release`, even on
//! error paths. [`SpaceHandle`] enforces this statically: both methods
//! consume the handle, and dropping an unsettled handle releases it as a
//! backstop (with a warning, since that indicates a missed settlement).
//!
//! ## Outdated Items
//!
//! Separately from reservations, an allocator tracks *outdated* items:
//! entries keyed by an opaque ID with a size and timestamp, marking space
//! that may be reclaimed under pressure without the files having been
//! deleted yet. State-tracked removal paths call [`SpaceAllocator::free_space`]
//! and clear the entry via [`SpaceAllocator::restore_outdated_item`]; the
//! registry itself never mutates the used-byte counter.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

// =============================================================================
// Allocator Contract
// =============================================================================

/// Space-budget bookkeeping for one managed partition.
pub trait SpaceAllocator: Send + Sync {
    /// Reserves `size` bytes against the partition budget.
    ///
    /// The reservation is charged immediately; the returned handle commits
    /// or rolls back the charge.
    fn allocate_space(&self, size: u64) -> Result<SpaceHandle>;

    /// Returns `size` bytes of previously committed space to the budget.
    ///
    /// Used when a stored bundle is removed through a state-tracked path.
    fn free_space(&self, size: u64);

    /// Registers an evictable-on-pressure item keyed by an opaque ID.
    fn add_outdated_item(&self, id: &str, size: u64, timestamp: DateTime<Utc>) -> Result<()>;

    /// Clears an outdated-item entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutdatedItemNotFound`] when no entry with this ID
    /// exists.
    fn restore_outdated_item(&self, id: &str) -> Result<()>;
}

/// Settlement sink for one reservation. Implemented by allocator internals
/// (and by counting test doubles).
pub trait SpaceLedger: Send + Sync {
    /// Commits a reservation permanently.
    fn commit(&self, size: u64);
    /// Rolls a reservation back, returning its bytes to the budget.
    fn rollback(&self, size: u64);
}

// =============================================================================
// Space Handle
// =============================================================================

/// A pending space reservation.
///
/// Consuming `accept`/`release` methods guarantee the
/// exactly-one-settlement contract at compile time; `Drop` releases
/// unsettled handles so a panicking install task cannot leak budget.
pub struct SpaceHandle {
    size: u64,
    ledger: Arc<dyn SpaceLedger>,
    settled: bool,
}

impl SpaceHandle {
    /// Creates a handle for `size` bytes settling into `ledger`.
    #[must_use]
    pub fn new(size: u64, ledger: Arc<dyn SpaceLedger>) -> Self {
        Self {
            size,
            ledger,
            settled: false,
        }
    }

    /// Reserved size in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Commits the reservation: the bytes stay charged until a matching
    /// [`SpaceAllocator::free_space`].
    pub fn accept(mut self) {
        self.settled = true;
        self.ledger.commit(self.size);
    }

    /// Rolls the reservation back immediately.
    pub fn release(mut self) {
        self.settled = true;
        self.ledger.rollback(self.size);
    }
}

impl Drop for SpaceHandle {
    fn drop(&mut self) {
        if !self.settled {
            warn!(
                "space handle dropped without settlement, releasing {} bytes",
                self.size
            );
            self.ledger.rollback(self.size);
        }
    }
}

impl std::fmt::Debug for SpaceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpaceHandle")
            .field("size", &self.size)
            .field("settled", &self.settled)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Partition Allocator
// =============================================================================

/// An outdated (evictable-on-pressure) item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutdatedItem {
    /// Reclaimable bytes.
    pub size: u64,
    /// When the item became evictable.
    pub timestamp: DateTime<Utc>,
}

#[derive(Default)]
struct PartitionState {
    used: Mutex<u64>,
    outdated: Mutex<HashMap<String, OutdatedItem>>,
}

impl SpaceLedger for PartitionState {
    fn commit(&self, _size: u64) {
        // Charged at allocation time; committing keeps the charge.
    }

    fn rollback(&self, size: u64) {
        let mut used = self.used.lock().unwrap();
        *used = used.saturating_sub(size);
    }
}

/// Reference [`SpaceAllocator`] over a fixed byte budget.
///
/// Thread-safe; handles stay valid independently of the allocator value
/// they were created from (state is shared through an `Arc`).
pub struct PartitionAllocator {
    limit: u64,
    state: Arc<PartitionState>,
}

impl PartitionAllocator {
    /// Creates an allocator with a `limit`-byte budget.
    #[must_use]
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            state: Arc::new(PartitionState::default()),
        }
    }

    /// Bytes currently charged (pending reservations plus committed space).
    #[must_use]
    pub fn used_space(&self) -> u64 {
        *self.state.used.lock().unwrap()
    }

    /// Budget limit in bytes.
    #[must_use]
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Snapshot of the outdated-item registry.
    #[must_use]
    pub fn outdated_items(&self) -> HashMap<String, OutdatedItem> {
        self.state.outdated.lock().unwrap().clone()
    }
}

impl SpaceAllocator for PartitionAllocator {
    fn allocate_space(&self, size: u64) -> Result<SpaceHandle> {
        let mut used = self.state.used.lock().unwrap();
        let available = self.limit.saturating_sub(*used);

        if size > available {
            return Err(Error::SpaceExhausted {
                requested: size,
                available,
            });
        }

        *used += size;
        debug!("Reserved {} bytes ({}/{} used)", size, *used, self.limit);

        Ok(SpaceHandle::new(size, self.state.clone()))
    }

    fn free_space(&self, size: u64) {
        let mut used = self.state.used.lock().unwrap();
        *used = used.saturating_sub(size);
        debug!("Freed {} bytes ({}/{} used)", size, *used, self.limit);
    }

    fn add_outdated_item(&self, id: &str, size: u64, timestamp: DateTime<Utc>) -> Result<()> {
        self.state
            .outdated
            .lock()
            .unwrap()
            .insert(id.to_string(), OutdatedItem { size, timestamp });
        Ok(())
    }

    fn restore_outdated_item(&self, id: &str) -> Result<()> {
        self.state
            .outdated
            .lock()
            .unwrap()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| Error::OutdatedItemNotFound(id.to_string()))
    }
}
