//! Quota context and the admission protocol shared by every vendor hook.
//!
//! One `parking_lot::Mutex` guards the whole ledger: `used`, `peak`, the
//! counters and the allocation table. The lock is not re-entrant; nothing
//! reachable from inside it may call back into an interposed function.
//!
//! Allocation runs in three phases:
//!
//! 1. **admit**: under the lock, deny if `used + requested > limit` or if no
//!    tracking slot can be reserved. Denials never reach the real allocator.
//! 2. **delegate**: call the real allocator. In [`AdmissionMode::Optimistic`]
//!    the lock is released first, so slow device allocations never stall
//!    other threads' checks and frees; two threads may then both pass phase 1
//!    before either commits and jointly overshoot the limit.
//!    [`AdmissionMode::Strict`] keeps the lock held and cannot overshoot.
//! 3. **settle**: on success charge `requested` and record the handle in the
//!    reserved slot; on failure release the slot and change nothing else.
//!
//! `used` is always the exact total of committed allocations.

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::config::{AdmissionMode, QuotaConfig};
use crate::error::GateError;
use crate::metrics::{MemInfo, QuotaSnapshot};
use crate::size::format_size;
use crate::table::AllocationTable;
use crate::vendor::CallSite;

/// What the real allocator reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RealAllocation {
    /// Vendor status code, returned to the application verbatim.
    pub status: i32,
    /// Device address written through the out-pointer; 0 if none.
    pub handle: usize,
}

impl RealAllocation {
    #[must_use]
    pub const fn new(status: i32, handle: usize) -> Self {
        Self { status, handle }
    }

    /// A failed call that produced no handle.
    #[must_use]
    pub const fn failed(status: i32) -> Self {
        Self { status, handle: 0 }
    }
}

#[derive(Debug)]
struct Ledger {
    used: u64,
    peak: u64,
    total_allocs: u64,
    total_frees: u64,
    failed_allocs: u64,
    table: AllocationTable,
}

impl Ledger {
    fn new(max_tracked: Option<usize>) -> Self {
        Self {
            used: 0,
            peak: 0,
            total_allocs: 0,
            total_frees: 0,
            failed_allocs: 0,
            table: AllocationTable::new(max_tracked),
        }
    }

    fn commit(&mut self, site: CallSite, handle: usize, size: u64) {
        if let Some(stale) = self.table.fill(handle, size) {
            warn!(
                function = site.function,
                "{}: handle {handle:#x} was still tracked with {}; dropping stale entry",
                site.function,
                format_size(stale),
            );
            self.used = self.used.saturating_sub(stale);
        }
        self.used = self.used.saturating_add(size);
        self.peak = self.peak.max(self.used);
        self.total_allocs += 1;
    }
}

/// A granted admission. Holds the ledger lock in strict mode.
#[must_use]
struct Admission<'a> {
    held: Option<MutexGuard<'a, Ledger>>,
}

/// Process-wide quota accounting.
#[derive(Debug)]
pub struct QuotaContext {
    limit: u64,
    mode: AdmissionMode,
    ledger: Mutex<Ledger>,
}

impl QuotaContext {
    #[must_use]
    pub fn new(config: &QuotaConfig) -> Self {
        Self {
            limit: config.limit,
            mode: config.admission,
            ledger: Mutex::new(Ledger::new(config.max_tracked)),
        }
    }

    /// Context with default settings and the given byte ceiling.
    #[must_use]
    pub fn with_limit(limit: u64) -> Self {
        Self::new(&QuotaConfig::with_limit(limit))
    }

    #[must_use]
    pub fn limit(&self) -> u64 {
        self.limit
    }

    #[must_use]
    pub fn mode(&self) -> AdmissionMode {
        self.mode
    }

    #[must_use]
    pub fn used(&self) -> u64 {
        self.ledger.lock().used
    }

    #[must_use]
    pub fn peak(&self) -> u64 {
        self.ledger.lock().peak
    }

    /// `(total allocations, total frees, failed allocations)`.
    #[must_use]
    pub fn stats(&self) -> (u64, u64, u64) {
        let ledger = self.ledger.lock();
        (ledger.total_allocs, ledger.total_frees, ledger.failed_allocs)
    }

    /// Size tracked for `handle`, if live.
    #[must_use]
    pub fn tracked_size(&self, handle: usize) -> Option<u64> {
        self.ledger.lock().table.find(handle)
    }

    #[must_use]
    pub fn capacity(&self) -> Option<usize> {
        self.ledger.lock().table.capacity()
    }

    #[must_use]
    pub fn snapshot(&self) -> QuotaSnapshot {
        let ledger = self.ledger.lock();
        QuotaSnapshot {
            limit: self.limit,
            used: ledger.used,
            peak: ledger.peak,
            total_allocs: ledger.total_allocs,
            total_frees: ledger.total_frees,
            failed_allocs: ledger.failed_allocs,
            tracked: ledger.table.len(),
        }
    }

    /// Run the admission protocol around `real`.
    ///
    /// Returns the vendor's out-of-memory code without calling `real` when
    /// the request is denied; otherwise returns `real`'s status unchanged.
    pub fn allocate<F>(&self, site: CallSite, requested: u64, real: F) -> i32
    where
        F: FnOnce() -> RealAllocation,
    {
        let admission = match self.admit(site, requested) {
            Ok(admission) => admission,
            Err(err) => return err.status(site.vendor),
        };
        let outcome = real();
        self.settle(admission, site, requested, outcome);
        outcome.status
    }

    fn admit(&self, site: CallSite, requested: u64) -> Result<Admission<'_>, GateError> {
        let mut ledger = self.ledger.lock();

        let fits = ledger
            .used
            .checked_add(requested)
            .is_some_and(|total| total <= self.limit);
        if !fits {
            ledger.failed_allocs += 1;
            warn!(
                function = site.function,
                "{} DENIED: requested={}, used={}, limit={}",
                site.function,
                format_size(requested),
                format_size(ledger.used),
                format_size(self.limit),
            );
            return Err(GateError::AdmissionDenied {
                requested,
                used: ledger.used,
                limit: self.limit,
            });
        }

        if let Err(err) = ledger.table.try_reserve() {
            ledger.failed_allocs += 1;
            warn!(
                function = site.function,
                "{} DENIED: {err}; free tracked allocations or raise the tracking capacity",
                site.function,
            );
            return Err(err.into());
        }

        let held = self.mode.holds_lock_across_call().then_some(ledger);
        Ok(Admission { held })
    }

    fn settle(
        &self,
        admission: Admission<'_>,
        site: CallSite,
        requested: u64,
        outcome: RealAllocation,
    ) {
        let mut ledger = match admission.held {
            Some(guard) => guard,
            None => self.ledger.lock(),
        };

        if !site.vendor.is_success(outcome.status) || outcome.handle == 0 {
            ledger.table.cancel_reservation();
            debug!(
                function = site.function,
                "{}: real call returned {} for {}; nothing charged",
                site.function,
                outcome.status,
                format_size(requested),
            );
            return;
        }

        ledger.commit(site, outcome.handle, requested);
        debug!(
            function = site.function,
            "{}: size={}, ptr={:#x}, total_used={}",
            site.function,
            format_size(requested),
            outcome.handle,
            format_size(ledger.used),
        );
    }

    /// Run the free path: uncharge `handle` if tracked, then always call `real`.
    ///
    /// A null handle goes straight to `real` without touching the ledger.
    pub fn release<F>(&self, site: CallSite, handle: usize, real: F) -> i32
    where
        F: FnOnce() -> i32,
    {
        if handle == 0 {
            return real();
        }

        {
            let mut ledger = self.ledger.lock();
            match ledger.table.take(handle) {
                Some(entry) => {
                    ledger.used = ledger.used.saturating_sub(entry.size);
                    ledger.total_frees += 1;
                    debug!(
                        function = site.function,
                        "{}: size={}, ptr={handle:#x}, total_used={}",
                        site.function,
                        format_size(entry.size),
                        format_size(ledger.used),
                    );
                }
                None => debug!(
                    function = site.function,
                    "{}: ptr={handle:#x} (not tracked)",
                    site.function,
                ),
            }
        }

        real()
    }

    /// Run the query path: `real` first, then replace its figures with the
    /// quota's view.
    ///
    /// A failing `real` status comes back as `Err` untouched.
    pub fn query_mem_info<F>(&self, site: CallSite, real: F) -> Result<MemInfo, i32>
    where
        F: FnOnce() -> i32,
    {
        let status = real();
        if !site.vendor.is_success(status) {
            return Err(status);
        }

        let info = self.virtual_mem_info();
        debug!(
            function = site.function,
            "{}: free={}, total={} (virtualized)",
            site.function,
            format_size(info.free),
            format_size(info.total),
        );
        Ok(info)
    }

    /// Current quota view of device memory.
    #[must_use]
    pub fn virtual_mem_info(&self) -> MemInfo {
        MemInfo::virtualized(self.limit, self.ledger.lock().used)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::size::{GIB, MIB};
    use crate::vendor::Vendor;
    use std::cell::Cell;

    const MALLOC: CallSite = CallSite::new(Vendor::Cuda, "cudaMalloc");
    const FREE: CallSite = CallSite::new(Vendor::Cuda, "cudaFree");
    const INFO: CallSite = CallSite::new(Vendor::Cuda, "cudaMemGetInfo");

    /// Counts calls and hands out increasing fake device addresses.
    struct FakeDevice {
        calls: Cell<u32>,
        next: Cell<usize>,
    }

    impl FakeDevice {
        fn new() -> Self {
            Self {
                calls: Cell::new(0),
                next: Cell::new(0x7f00_0000_0000),
            }
        }

        fn malloc(&self) -> RealAllocation {
            self.calls.set(self.calls.get() + 1);
            let handle = self.next.get();
            self.next.set(handle + 0x1000);
            RealAllocation::new(0, handle)
        }
    }

    fn alloc(gate: &QuotaContext, dev: &FakeDevice, size: u64) -> (i32, usize) {
        let mut handle = 0;
        let status = gate.allocate(MALLOC, size, || {
            let out = dev.malloc();
            handle = out.handle;
            out
        });
        (status, handle)
    }

    #[test]
    fn admitted_allocation_is_charged_and_tracked() {
        let gate = QuotaContext::with_limit(GIB);
        let dev = FakeDevice::new();

        let (status, handle) = alloc(&gate, &dev, 500 * MIB);
        assert_eq!(status, 0);
        assert_eq!(gate.used(), 500 * MIB);
        assert_eq!(gate.peak(), 500 * MIB);
        assert_eq!(gate.tracked_size(handle), Some(500 * MIB));
        assert_eq!(gate.stats(), (1, 0, 0));
    }

    #[test]
    fn denial_skips_real_allocator() {
        let gate = QuotaContext::with_limit(GIB);
        let dev = FakeDevice::new();
        alloc(&gate, &dev, 500 * MIB);

        let (status, _) = alloc(&gate, &dev, 600 * MIB);
        assert_eq!(status, 2);
        assert_eq!(dev.calls.get(), 1);
        assert_eq!(gate.used(), 500 * MIB);
        assert_eq!(gate.stats(), (1, 0, 1));
    }

    #[test]
    fn exact_fit_is_admitted() {
        let gate = QuotaContext::with_limit(GIB);
        let dev = FakeDevice::new();
        assert_eq!(alloc(&gate, &dev, GIB).0, 0);
        assert_eq!(alloc(&gate, &dev, 1).0, 2);
    }

    #[test]
    fn overflowing_request_is_denied() {
        let gate = QuotaContext::with_limit(u64::MAX);
        let dev = FakeDevice::new();
        assert_eq!(alloc(&gate, &dev, 10).0, 0);
        assert_eq!(alloc(&gate, &dev, u64::MAX).0, 2);
        assert_eq!(gate.used(), 10);
    }

    #[test]
    fn zero_limit_denies_everything() {
        let gate = QuotaContext::with_limit(0);
        let dev = FakeDevice::new();
        assert_eq!(alloc(&gate, &dev, 1).0, 2);
        assert_eq!(dev.calls.get(), 0);
    }

    #[test]
    fn real_failure_propagates_without_charge() {
        let gate = QuotaContext::with_limit(GIB);
        let status = gate.allocate(MALLOC, MIB, || RealAllocation::failed(2));
        assert_eq!(status, 2);
        assert_eq!(
            gate.snapshot(),
            QuotaSnapshot {
                limit: GIB,
                ..QuotaSnapshot::default()
            }
        );

        let weird = gate.allocate(MALLOC, MIB, || RealAllocation::failed(719));
        assert_eq!(weird, 719);
        assert_eq!(gate.used(), 0);
        assert_eq!(gate.stats(), (0, 0, 0));
    }

    #[test]
    fn success_without_handle_is_not_charged() {
        let gate = QuotaContext::new(&QuotaConfig::with_limit(GIB).max_tracked(Some(1)));
        assert_eq!(gate.allocate(MALLOC, MIB, || RealAllocation::new(0, 0)), 0);
        assert_eq!(gate.used(), 0);

        // The reservation was given back.
        let dev = FakeDevice::new();
        assert_eq!(alloc(&gate, &dev, MIB).0, 0);
    }

    #[test]
    fn free_uncharges_and_forwards() {
        let gate = QuotaContext::with_limit(GIB);
        let dev = FakeDevice::new();
        let (_, handle) = alloc(&gate, &dev, 500 * MIB);

        let forwarded = Cell::new(0);
        let status = gate.release(FREE, handle, || {
            forwarded.set(forwarded.get() + 1);
            0
        });
        assert_eq!(status, 0);
        assert_eq!(forwarded.get(), 1);
        assert_eq!(gate.used(), 0);
        assert_eq!(gate.peak(), 500 * MIB);
        assert_eq!(gate.stats(), (1, 1, 0));
    }

    #[test]
    fn untracked_and_null_frees_touch_nothing() {
        let gate = QuotaContext::with_limit(GIB);
        let dev = FakeDevice::new();
        alloc(&gate, &dev, MIB);
        let before = gate.snapshot();

        let forwarded = Cell::new(0);
        let real = || {
            forwarded.set(forwarded.get() + 1);
            0
        };
        assert_eq!(gate.release(FREE, 0, real), 0);
        assert_eq!(gate.release(FREE, 0xdead_beef, real), 0);
        assert_eq!(forwarded.get(), 2);
        assert_eq!(gate.snapshot(), before);
    }

    #[test]
    fn free_returns_real_status_verbatim() {
        let gate = QuotaContext::with_limit(GIB);
        let dev = FakeDevice::new();
        let (_, handle) = alloc(&gate, &dev, MIB);
        assert_eq!(gate.release(FREE, handle, || 400), 400);
        assert_eq!(gate.used(), 0);
    }

    #[test]
    fn mem_info_is_virtualized() {
        let gate = QuotaContext::with_limit(GIB);
        let dev = FakeDevice::new();
        alloc(&gate, &dev, 500 * MIB);

        let info = gate.query_mem_info(INFO, || 0).unwrap();
        assert_eq!(info.total, GIB);
        assert_eq!(info.free, 524 * MIB);
    }

    #[test]
    fn mem_info_error_is_propagated() {
        let gate = QuotaContext::with_limit(GIB);
        assert_eq!(gate.query_mem_info(INFO, || 3), Err(3));
    }

    #[test]
    fn capacity_exhaustion_denies_before_real_call() {
        let gate = QuotaContext::new(&QuotaConfig::with_limit(GIB).max_tracked(Some(2)));
        assert_eq!(gate.capacity(), Some(2));
        let dev = FakeDevice::new();
        let (_, first) = alloc(&gate, &dev, MIB);
        alloc(&gate, &dev, MIB);

        let (status, _) = alloc(&gate, &dev, MIB);
        assert_eq!(status, 2);
        assert_eq!(dev.calls.get(), 2);
        assert_eq!(gate.stats(), (2, 0, 1));

        gate.release(FREE, first, || 0);
        assert_eq!(alloc(&gate, &dev, MIB).0, 0);
        assert_eq!(gate.used(), 2 * MIB);

        let unbounded = QuotaContext::new(&QuotaConfig::with_limit(GIB).max_tracked(None));
        assert_eq!(unbounded.capacity(), None);
    }

    #[test]
    fn reused_live_handle_keeps_conservation() {
        let gate = QuotaContext::with_limit(GIB);
        assert_eq!(gate.allocate(MALLOC, 100, || RealAllocation::new(0, 0x40)), 0);
        assert_eq!(gate.allocate(MALLOC, 30, || RealAllocation::new(0, 0x40)), 0);
        assert_eq!(gate.used(), 30);
        assert_eq!(gate.tracked_size(0x40), Some(30));
        assert_eq!(gate.peak(), 100);
    }

    #[test]
    fn strict_mode_settles_under_the_same_guard() {
        let gate =
            QuotaContext::new(&QuotaConfig::with_limit(GIB).admission(AdmissionMode::Strict));
        let dev = FakeDevice::new();
        let (status, handle) = alloc(&gate, &dev, 700 * MIB);
        assert_eq!(status, 0);
        assert_eq!(gate.mode(), AdmissionMode::Strict);
        assert_eq!(alloc(&gate, &dev, 400 * MIB).0, 2);
        gate.release(FREE, handle, || 0);
        assert_eq!(alloc(&gate, &dev, 400 * MIB).0, 0);
    }
}
