//! Lazily resolved real-function bindings.
//!
//! Each interposed entry point forwards to "the next" definition of the same
//! symbol. The address is looked up on first use, not at load time: vendor
//! runtimes are frequently opened with `dlopen` after this library is
//! already in the process.
//!
//! State machine per binding:
//!
//! ```text
//! Unresolved --resolve ok--> Resolved (terminal)
//! Unresolved --resolve err-> Failed --resolve ok--> Resolved
//! ```
//!
//! `Failed` is not terminal: a later call retries the lookup, so a runtime
//! that appears after the first attempt still gets picked up. Only the first
//! failure is logged at error severity; retries log at debug.
//!
//! The pointer is published with a release store and read with an acquire
//! load. Two threads racing on first use may both look the symbol up and
//! store the same address.

use std::ffi::{CStr, c_void};
use std::fmt;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, AtomicU8, AtomicU32, Ordering};

use tracing::{debug, error};

use crate::error::GateError;
use crate::vendor::Vendor;

/// Finds the next definition of a symbol after the interposer.
pub trait SymbolResolver {
    fn lookup(&self, symbol: &CStr) -> Option<NonNull<c_void>>;
}

impl<F> SymbolResolver for F
where
    F: Fn(&CStr) -> Option<NonNull<c_void>>,
{
    fn lookup(&self, symbol: &CStr) -> Option<NonNull<c_void>> {
        self(symbol)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BindingState {
    Unresolved = 0,
    Resolved = 1,
    Failed = 2,
}

impl BindingState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Resolved,
            2 => Self::Failed,
            _ => Self::Unresolved,
        }
    }
}

/// One real entry point, resolved on first use.
#[derive(Debug)]
pub struct LazyBinding {
    symbol: &'static CStr,
    ptr: AtomicPtr<c_void>,
    state: AtomicU8,
    attempts: AtomicU32,
}

impl LazyBinding {
    #[must_use]
    pub const fn new(symbol: &'static CStr) -> Self {
        Self {
            symbol,
            ptr: AtomicPtr::new(ptr::null_mut()),
            state: AtomicU8::new(BindingState::Unresolved as u8),
            attempts: AtomicU32::new(0),
        }
    }

    /// Symbol name for diagnostics.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.symbol.to_str().unwrap_or("<non-utf8 symbol>")
    }

    #[must_use]
    pub fn state(&self) -> BindingState {
        BindingState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Lookups performed so far, probes included.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// The published address, if resolved.
    #[must_use]
    pub fn get(&self) -> Option<NonNull<c_void>> {
        NonNull::new(self.ptr.load(Ordering::Acquire))
    }

    fn publish(&self, found: NonNull<c_void>) {
        self.ptr.store(found.as_ptr(), Ordering::Release);
        self.state.store(BindingState::Resolved as u8, Ordering::Release);
    }

    /// Try to resolve without recording or reporting a failure.
    ///
    /// Used by the startup probe: an absent vendor is normal there.
    pub fn probe<R: SymbolResolver + ?Sized>(&self, resolver: &R) -> bool {
        if self.get().is_some() {
            return true;
        }
        self.attempts.fetch_add(1, Ordering::Relaxed);
        match resolver.lookup(self.symbol) {
            Some(found) => {
                self.publish(found);
                true
            }
            None => false,
        }
    }

    /// Resolve on demand, reporting the first failure.
    pub fn resolve<R: SymbolResolver + ?Sized>(&self, resolver: &R) -> Option<NonNull<c_void>> {
        if let Some(found) = self.get() {
            return Some(found);
        }
        self.attempts.fetch_add(1, Ordering::Relaxed);
        if let Some(found) = resolver.lookup(self.symbol) {
            self.publish(found);
            return Some(found);
        }

        let first_failure = self
            .state
            .compare_exchange(
                BindingState::Unresolved as u8,
                BindingState::Failed as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if first_failure {
            error!(symbol = self.name(), "failed to find real {}", self.name());
        } else {
            debug!(symbol = self.name(), "real {} still unavailable", self.name());
        }
        None
    }

    /// Like [`resolve`](Self::resolve), as a [`GateError`] for `?` chains.
    pub fn require<R: SymbolResolver + ?Sized>(
        &self,
        resolver: &R,
    ) -> Result<NonNull<c_void>, GateError> {
        self.resolve(resolver).ok_or(GateError::BindingUnresolved {
            symbol: self.name(),
        })
    }
}

/// What the startup probe found for one vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VendorPresence {
    pub vendor: Vendor,
    /// The primary allocator resolved; the vendor counts as present.
    pub allocate_resolved: bool,
    pub resolved: usize,
    pub total: usize,
}

impl fmt::Display for VendorPresence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}/{})", self.vendor.name(), self.resolved, self.total)
    }
}

/// The real entry points of one vendor runtime.
#[derive(Debug)]
pub struct VendorBindings {
    vendor: Vendor,
    pub allocate: LazyBinding,
    pub free: LazyBinding,
    pub mem_info: LazyBinding,
    /// Only CUDA has a managed (unified) allocator.
    pub allocate_managed: Option<LazyBinding>,
}

impl VendorBindings {
    #[must_use]
    pub const fn new(
        vendor: Vendor,
        allocate: &'static CStr,
        free: &'static CStr,
        mem_info: &'static CStr,
        allocate_managed: Option<&'static CStr>,
    ) -> Self {
        Self {
            vendor,
            allocate: LazyBinding::new(allocate),
            free: LazyBinding::new(free),
            mem_info: LazyBinding::new(mem_info),
            allocate_managed: match allocate_managed {
                Some(symbol) => Some(LazyBinding::new(symbol)),
                None => None,
            },
        }
    }

    #[must_use]
    pub fn vendor(&self) -> Vendor {
        self.vendor
    }

    pub fn iter(&self) -> impl Iterator<Item = &LazyBinding> {
        [&self.allocate, &self.free, &self.mem_info]
            .into_iter()
            .chain(self.allocate_managed.as_ref())
    }

    /// Attempt every binding silently.
    pub fn probe<R: SymbolResolver + ?Sized>(&self, resolver: &R) -> VendorPresence {
        let mut resolved = 0;
        let mut total = 0;
        for binding in self.iter() {
            total += 1;
            if binding.probe(resolver) {
                resolved += 1;
            }
        }
        VendorPresence {
            vendor: self.vendor,
            allocate_resolved: self.allocate.get().is_some(),
            resolved,
            total,
        }
    }

    /// Returns true if the primary allocator is already resolved.
    #[must_use]
    pub fn is_present(&self) -> bool {
        self.allocate.get().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    static TARGET: u8 = 0;

    fn target() -> NonNull<c_void> {
        NonNull::from(&TARGET).cast()
    }

    fn none(_: &CStr) -> Option<NonNull<c_void>> {
        None
    }

    #[test]
    fn resolves_once_and_caches() {
        let binding = LazyBinding::new(c"cudaMalloc");
        let lookups = Cell::new(0);
        let resolver = |_: &CStr| {
            lookups.set(lookups.get() + 1);
            Some(target())
        };

        assert_eq!(binding.state(), BindingState::Unresolved);
        assert_eq!(binding.resolve(&resolver), Some(target()));
        assert_eq!(binding.resolve(&resolver), Some(target()));
        assert_eq!(lookups.get(), 1);
        assert_eq!(binding.state(), BindingState::Resolved);
        assert_eq!(binding.get(), Some(target()));
    }

    #[test]
    fn failure_is_retried_and_recovers() {
        let binding = LazyBinding::new(c"aclrtMalloc");
        let available = Cell::new(false);
        let resolver = |_: &CStr| -> Option<NonNull<c_void>> { available.get().then(target) };

        assert_eq!(binding.resolve(&resolver), None);
        assert_eq!(binding.state(), BindingState::Failed);
        assert_eq!(binding.resolve(&resolver), None);
        assert_eq!(binding.attempts(), 2);

        available.set(true);
        assert_eq!(binding.resolve(&resolver), Some(target()));
        assert_eq!(binding.state(), BindingState::Resolved);
    }

    #[test]
    fn probe_never_marks_failed() {
        let binding = LazyBinding::new(c"hipMalloc");
        assert!(!binding.probe(&none));
        assert_eq!(binding.state(), BindingState::Unresolved);
        assert_eq!(binding.attempts(), 1);
    }

    #[test]
    fn require_reports_symbol() {
        let binding = LazyBinding::new(c"hipFree");
        assert_eq!(
            binding.require(&none),
            Err(GateError::BindingUnresolved { symbol: "hipFree" })
        );
    }

    #[test]
    fn concurrent_resolution_converges() {
        static SHARED: LazyBinding = LazyBinding::new(c"cudaMemGetInfo");
        fn found(_: &CStr) -> Option<NonNull<c_void>> {
            Some(target())
        }

        let threads: Vec<_> = (0..8)
            .map(|_| std::thread::spawn(|| SHARED.resolve(&found).map(|p| p.as_ptr() as usize)))
            .collect();
        for handle in threads {
            assert_eq!(handle.join().unwrap(), Some(target().as_ptr() as usize));
        }
        assert_eq!(SHARED.state(), BindingState::Resolved);
        assert!((1..=8).contains(&SHARED.attempts()));
    }

    #[test]
    fn vendor_probe_counts_bindings() {
        let cuda = VendorBindings::new(
            Vendor::Cuda,
            c"cudaMalloc",
            c"cudaFree",
            c"cudaMemGetInfo",
            Some(c"cudaMallocManaged"),
        );
        let only_malloc = |symbol: &CStr| -> Option<NonNull<c_void>> {
            (symbol == c"cudaMalloc").then(target)
        };

        let presence = cuda.probe(&only_malloc);
        assert_eq!(presence.vendor, Vendor::Cuda);
        assert!(presence.allocate_resolved);
        assert_eq!((presence.resolved, presence.total), (1, 4));
        assert_eq!(presence.to_string(), "cuda(1/4)");
        assert!(cuda.is_present());
        assert_eq!(cuda.free.state(), BindingState::Unresolved);
    }

    #[test]
    fn absent_vendor_is_not_present() {
        let acl = VendorBindings::new(
            Vendor::Acl,
            c"aclrtMalloc",
            c"aclrtFree",
            c"aclrtGetMemInfo",
            None,
        );
        let presence = acl.probe(&none);
        assert!(!presence.allocate_resolved);
        assert_eq!((presence.resolved, presence.total), (0, 3));
        assert_eq!(acl.iter().count(), 3);
        assert!(!acl.is_present());
    }
}
