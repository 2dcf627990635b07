//! Point-in-time views of the quota ledger.
//!
//! Snapshots are copied out under the quota lock and can be inspected or
//! logged without holding it.

use std::fmt;

use crate::size::format_size;

/// Counters and accounting state at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuotaSnapshot {
    pub limit: u64,
    pub used: u64,
    pub peak: u64,
    pub total_allocs: u64,
    pub total_frees: u64,
    pub failed_allocs: u64,
    /// Live entries in the allocation table.
    pub tracked: usize,
}

impl QuotaSnapshot {
    /// Bytes still admissible under the limit.
    #[must_use]
    pub fn available(&self) -> u64 {
        self.limit.saturating_sub(self.used)
    }

    /// `(total allocations, total frees, failed allocations)`.
    #[must_use]
    pub fn stats(&self) -> (u64, u64, u64) {
        (self.total_allocs, self.total_frees, self.failed_allocs)
    }
}

impl fmt::Display for QuotaSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "allocs={}, frees={}, failed={}, peak={}, final={}, limit={}",
            self.total_allocs,
            self.total_frees,
            self.failed_allocs,
            format_size(self.peak),
            format_size(self.used),
            format_size(self.limit),
        )
    }
}

/// Device memory figures as reported to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemInfo {
    pub free: u64,
    pub total: u64,
}

impl MemInfo {
    /// The quota's view: total is the limit, free is what remains of it.
    #[must_use]
    pub fn virtualized(limit: u64, used: u64) -> Self {
        Self {
            free: limit.saturating_sub(used),
            total: limit,
        }
    }
}
