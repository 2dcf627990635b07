//! Read-only introspection exports for external tooling.
//!
//! Each reads a lock-guarded snapshot of the process-wide context.

use vramgate_core::QuotaContext;

use crate::macros::abi_fn;
use crate::state;

fn saturate(bytes: u64) -> usize {
    usize::try_from(bytes).unwrap_or(usize::MAX)
}

/// Write `(total allocations, total frees, failed allocations)` of `gate`
/// through the non-null out-pointers.
///
/// # Safety
///
/// Each pointer must be null or valid for writing a `u64`.
pub unsafe fn write_stats(
    gate: &QuotaContext,
    allocs: *mut u64,
    frees: *mut u64,
    failed: *mut u64,
) {
    let (total_allocs, total_frees, failed_allocs) = gate.stats();
    for (out, value) in [(allocs, total_allocs), (frees, total_frees), (failed, failed_allocs)] {
        if !out.is_null() {
            // SAFETY: non-null and writable per the caller's contract.
            unsafe { out.write(value) };
        }
    }
}

abi_fn! {
    /// Bytes currently charged against the quota.
    fn hcs_get_quota_used() -> usize {
        saturate(state::context().used())
    }
}

abi_fn! {
    /// Configured quota in bytes.
    fn hcs_get_quota_limit() -> usize {
        saturate(state::context().limit())
    }
}

abi_fn! {
    /// Highest value `used` has reached.
    fn hcs_get_peak_usage() -> usize {
        saturate(state::context().peak())
    }
}

abi_fn! {
    /// Allocation counters; null out-pointers are skipped.
    fn hcs_get_stats(allocs: *mut u64, frees: *mut u64, failed: *mut u64) {
        // SAFETY: forwards the caller's out-pointers.
        unsafe { write_stats(state::context(), allocs, frees, failed) }
    }
}
