//! Glue between the C hooks and the quota protocol.
//!
//! An [`Interposer`] ties one vendor's binding set to a quota context and a
//! symbol resolver. The exported hooks build one over the process-wide
//! context and `dlsym(RTLD_NEXT)`; tests build them over fakes.
//!
//! Every entry point resolves its real function before touching the ledger,
//! so an unresolvable binding returns the vendor's invalid-argument code and
//! leaves all counters alone.

use std::ffi::{c_int, c_void};
use std::ptr::NonNull;

use vramgate_core::{
    CallSite, LazyBinding, QuotaContext, RealAllocation, SymbolResolver, VendorBindings,
};

use crate::resolver::NextObject;
use crate::state;

/// One vendor's hooks bound to a quota context.
pub struct Interposer<'a, R: ?Sized> {
    gate: &'a QuotaContext,
    bindings: &'a VendorBindings,
    resolver: &'a R,
}

impl Interposer<'static, NextObject> {
    /// Hooks for `bindings` over the process-wide context, initializing it
    /// on first use.
    #[must_use]
    pub fn process(bindings: &'static VendorBindings) -> Self {
        Self::new(state::context(), bindings, &NextObject)
    }
}

impl<'a, R: SymbolResolver + ?Sized> Interposer<'a, R> {
    #[must_use]
    pub fn new(gate: &'a QuotaContext, bindings: &'a VendorBindings, resolver: &'a R) -> Self {
        Self {
            gate,
            bindings,
            resolver,
        }
    }

    #[must_use]
    pub fn bindings(&self) -> &'a VendorBindings {
        self.bindings
    }

    fn real(&self, site: CallSite, binding: &LazyBinding) -> Result<NonNull<c_void>, c_int> {
        binding
            .require(self.resolver)
            .map_err(|err| err.status(site.vendor))
    }

    /// Allocation path: resolve, admit, call, settle.
    ///
    /// `call` receives the real function's address and returns its status.
    ///
    /// # Safety
    ///
    /// `dev_ptr` must be null or valid for reading a pointer once `call`
    /// reports success.
    pub unsafe fn allocate<F>(
        &self,
        site: CallSite,
        binding: &LazyBinding,
        dev_ptr: *mut *mut c_void,
        size: usize,
        call: F,
    ) -> c_int
    where
        F: FnOnce(NonNull<c_void>) -> c_int,
    {
        let real = match self.real(site, binding) {
            Ok(real) => real,
            Err(status) => return status,
        };
        self.gate.allocate(site, size as u64, || {
            let status = call(real);
            let handle = if site.vendor.is_success(status) {
                // SAFETY: caller guarantees `dev_ptr` is null or readable.
                unsafe { read_handle(dev_ptr) }
            } else {
                0
            };
            RealAllocation::new(status, handle)
        })
    }

    /// Free path: resolve, uncharge, call.
    pub fn free<F>(
        &self,
        site: CallSite,
        binding: &LazyBinding,
        dev_ptr: *mut c_void,
        call: F,
    ) -> c_int
    where
        F: FnOnce(NonNull<c_void>) -> c_int,
    {
        let real = match self.real(site, binding) {
            Ok(real) => real,
            Err(status) => return status,
        };
        self.gate.release(site, dev_ptr as usize, || call(real))
    }

    /// Memory-info path: resolve, call, overwrite with the quota's view.
    ///
    /// # Safety
    ///
    /// `free` and `total` must each be null or valid for writing a `usize`.
    pub unsafe fn mem_info<F>(
        &self,
        site: CallSite,
        binding: &LazyBinding,
        free: *mut usize,
        total: *mut usize,
        call: F,
    ) -> c_int
    where
        F: FnOnce(NonNull<c_void>) -> c_int,
    {
        let real = match self.real(site, binding) {
            Ok(real) => real,
            Err(status) => return status,
        };
        match self.gate.query_mem_info(site, || call(real)) {
            Ok(info) => {
                // SAFETY: caller guarantees both out-pointers are null or writable.
                unsafe {
                    write_size(free, info.free);
                    write_size(total, info.total);
                }
                site.codes().success
            }
            Err(status) => status,
        }
    }
}

/// Read the device address an allocator wrote through `dev_ptr`.
///
/// # Safety
///
/// `dev_ptr` must be null or valid for reading a pointer.
pub(crate) unsafe fn read_handle(dev_ptr: *mut *mut c_void) -> usize {
    if dev_ptr.is_null() {
        return 0;
    }
    // SAFETY: non-null and readable per the caller's contract.
    unsafe { dev_ptr.read() as usize }
}

/// Store `value` through `out`, saturating to `usize`. Null is skipped.
///
/// # Safety
///
/// `out` must be null or valid for writing a `usize`.
pub(crate) unsafe fn write_size(out: *mut usize, value: u64) {
    if out.is_null() {
        return;
    }
    // SAFETY: non-null and writable per the caller's contract.
    unsafe { out.write(usize::try_from(value).unwrap_or(usize::MAX)) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_pointers_are_skipped() {
        // SAFETY: null is explicitly allowed.
        unsafe {
            assert_eq!(read_handle(std::ptr::null_mut()), 0);
            write_size(std::ptr::null_mut(), 7);
        }
    }

    #[test]
    fn read_and_write_through_valid_pointers() {
        let mut slot: *mut c_void = 0x4000 as *mut c_void;
        let mut out = 0_usize;
        // SAFETY: both locals are live and properly aligned.
        unsafe {
            assert_eq!(read_handle(&mut slot), 0x4000);
            write_size(&mut out, 1 << 20);
        }
        assert_eq!(out, 1 << 20);
    }
}
