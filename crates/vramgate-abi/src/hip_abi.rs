//! HIP runtime hooks: `hipMalloc`, `hipFree`, `hipMemGetInfo`.

use std::ffi::{c_int, c_void};

use vramgate_core::{CallSite, SymbolResolver, Vendor};

use crate::bindings::HIP;
use crate::dispatch::Interposer;
use crate::macros::abi_fn;
use crate::resolver::cast_fn;

type MallocFn = unsafe extern "C" fn(*mut *mut c_void, usize) -> c_int;
type FreeFn = unsafe extern "C" fn(*mut c_void) -> c_int;
type MemGetInfoFn = unsafe extern "C" fn(*mut usize, *mut usize) -> c_int;

const MALLOC: CallSite = CallSite::new(Vendor::Hip, "hipMalloc");
const FREE: CallSite = CallSite::new(Vendor::Hip, "hipFree");
const MEM_GET_INFO: CallSite = CallSite::new(Vendor::Hip, "hipMemGetInfo");

/// `hipMalloc` through `ix`.
///
/// # Safety
///
/// Same contract as `hipMalloc`; `ix` must carry HIP bindings.
pub unsafe fn malloc_via<R: SymbolResolver + ?Sized>(
    ix: &Interposer<'_, R>,
    dev_ptr: *mut *mut c_void,
    size: usize,
) -> c_int {
    // SAFETY: `dev_ptr` comes from the caller of hipMalloc.
    unsafe {
        ix.allocate(MALLOC, &ix.bindings().allocate, dev_ptr, size, |real| {
            let real: MallocFn = cast_fn(real);
            real(dev_ptr, size)
        })
    }
}

/// `hipFree` through `ix`.
///
/// # Safety
///
/// Same contract as `hipFree`; `ix` must carry HIP bindings.
pub unsafe fn free_via<R: SymbolResolver + ?Sized>(
    ix: &Interposer<'_, R>,
    dev_ptr: *mut c_void,
) -> c_int {
    ix.free(FREE, &ix.bindings().free, dev_ptr, |real| {
        // SAFETY: resolved from "hipFree"; argument forwarded unchanged.
        unsafe {
            let real: FreeFn = cast_fn(real);
            real(dev_ptr)
        }
    })
}

/// `hipMemGetInfo` through `ix`.
///
/// # Safety
///
/// Same contract as `hipMemGetInfo`; `ix` must carry HIP bindings.
pub unsafe fn mem_get_info_via<R: SymbolResolver + ?Sized>(
    ix: &Interposer<'_, R>,
    free: *mut usize,
    total: *mut usize,
) -> c_int {
    // SAFETY: out-pointers come from the caller of hipMemGetInfo.
    unsafe {
        ix.mem_info(MEM_GET_INFO, &ix.bindings().mem_info, free, total, |real| {
            let real: MemGetInfoFn = cast_fn(real);
            real(free, total)
        })
    }
}

abi_fn! {
    /// Quota-checked `hipMalloc`.
    fn hipMalloc(dev_ptr: *mut *mut c_void, size: usize) -> c_int {
        // SAFETY: forwards the caller's arguments.
        unsafe { malloc_via(&Interposer::process(&HIP), dev_ptr, size) }
    }
}

abi_fn! {
    /// `hipFree` that returns the allocation's bytes to the quota.
    fn hipFree(dev_ptr: *mut c_void) -> c_int {
        // SAFETY: forwards the caller's arguments.
        unsafe { free_via(&Interposer::process(&HIP), dev_ptr) }
    }
}

abi_fn! {
    /// `hipMemGetInfo` reporting the quota instead of the physical device.
    fn hipMemGetInfo(free: *mut usize, total: *mut usize) -> c_int {
        // SAFETY: forwards the caller's arguments.
        unsafe { mem_get_info_via(&Interposer::process(&HIP), free, total) }
    }
}
