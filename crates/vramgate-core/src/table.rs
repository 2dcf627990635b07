//! Live allocation tracking.
//!
//! Maps device handles to the byte count that was charged against the quota
//! when they were allocated. The table has no lock of its own: it lives inside
//! the quota context's ledger and is only touched while that lock is held.
//!
//! Capacity is claimed in two steps so that an allocation the device already
//! granted can always be recorded: admission calls [`AllocationTable::try_reserve`]
//! before the real call, and the commit path either [`fill`]s or
//! [`cancel_reservation`]s that slot.
//!
//! [`fill`]: AllocationTable::fill
//! [`cancel_reservation`]: AllocationTable::cancel_reservation

use std::collections::HashMap;

use crate::error::TableError;

/// A tracked device allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationEntry {
    /// Device address returned by the vendor allocator.
    pub handle: usize,
    /// Bytes charged against the quota.
    pub size: u64,
}

/// Handle-keyed allocation table with reservation-based capacity.
#[derive(Debug, Default)]
pub struct AllocationTable {
    entries: HashMap<usize, u64>,
    reserved: usize,
    capacity: Option<usize>,
}

impl AllocationTable {
    /// Create an empty table. `None` capacity means unbounded.
    #[must_use]
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            entries: HashMap::new(),
            reserved: 0,
            capacity,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Slots claimed by in-flight allocations.
    #[must_use]
    pub fn reserved(&self) -> usize {
        self.reserved
    }

    /// Sum of tracked sizes.
    #[must_use]
    pub fn live_bytes(&self) -> u64 {
        self.entries
            .values()
            .fold(0_u64, |acc, &size| acc.saturating_add(size))
    }

    /// Size tracked for `handle`, if live.
    #[must_use]
    pub fn find(&self, handle: usize) -> Option<u64> {
        self.entries.get(&handle).copied()
    }

    /// Claim a slot for an allocation whose handle is not known yet.
    pub fn try_reserve(&mut self) -> Result<(), TableError> {
        if let Some(capacity) = self.capacity {
            if self.entries.len() + self.reserved >= capacity {
                return Err(TableError::CapacityExhausted { capacity });
            }
        }
        self.reserved += 1;
        Ok(())
    }

    /// Give back a slot whose allocation did not happen.
    pub fn cancel_reservation(&mut self) {
        self.reserved = self.reserved.saturating_sub(1);
    }

    /// Record `handle` in a previously reserved slot.
    ///
    /// Returns the size of a stale entry the handle replaced: the device can
    /// only hand out a live address twice if its earlier free bypassed us.
    pub fn fill(&mut self, handle: usize, size: u64) -> Option<u64> {
        self.reserved = self.reserved.saturating_sub(1);
        self.entries.insert(handle, size)
    }

    /// Reserve and fill in one step.
    pub fn insert(&mut self, handle: usize, size: u64) -> Result<Option<u64>, TableError> {
        if !self.entries.contains_key(&handle) {
            self.try_reserve()?;
            return Ok(self.fill(handle, size));
        }
        Ok(self.entries.insert(handle, size))
    }

    /// Remove `handle`, returning its entry if it was tracked.
    pub fn take(&mut self, handle: usize) -> Option<AllocationEntry> {
        self.entries
            .remove(&handle)
            .map(|size| AllocationEntry { handle, size })
    }

    /// Remove `handle`, returning its size or 0 when untracked.
    pub fn remove(&mut self, handle: usize) -> u64 {
        self.take(handle).map_or(0, |entry| entry.size)
    }
}
