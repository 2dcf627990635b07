//! CUDA runtime hooks: `cudaMalloc`, `cudaMallocManaged`, `cudaFree`,
//! `cudaMemGetInfo`.
//!
//! Managed allocations are charged like device allocations and released by
//! the same `cudaFree`.

use std::ffi::{c_int, c_uint, c_void};

use vramgate_core::{CallSite, SymbolResolver, Vendor};

use crate::bindings::CUDA;
use crate::dispatch::Interposer;
use crate::macros::abi_fn;
use crate::resolver::cast_fn;

type MallocFn = unsafe extern "C" fn(*mut *mut c_void, usize) -> c_int;
type MallocManagedFn = unsafe extern "C" fn(*mut *mut c_void, usize, c_uint) -> c_int;
type FreeFn = unsafe extern "C" fn(*mut c_void) -> c_int;
type MemGetInfoFn = unsafe extern "C" fn(*mut usize, *mut usize) -> c_int;

const MALLOC: CallSite = CallSite::new(Vendor::Cuda, "cudaMalloc");
const MALLOC_MANAGED: CallSite = CallSite::new(Vendor::Cuda, "cudaMallocManaged");
const FREE: CallSite = CallSite::new(Vendor::Cuda, "cudaFree");
const MEM_GET_INFO: CallSite = CallSite::new(Vendor::Cuda, "cudaMemGetInfo");

/// `cudaMalloc` through `ix`.
///
/// # Safety
///
/// Same contract as `cudaMalloc`; `ix` must carry CUDA bindings.
pub unsafe fn malloc_via<R: SymbolResolver + ?Sized>(
    ix: &Interposer<'_, R>,
    dev_ptr: *mut *mut c_void,
    size: usize,
) -> c_int {
    // SAFETY: `dev_ptr` comes from the caller of cudaMalloc.
    unsafe {
        ix.allocate(MALLOC, &ix.bindings().allocate, dev_ptr, size, |real| {
            let real: MallocFn = cast_fn(real);
            real(dev_ptr, size)
        })
    }
}

/// `cudaMallocManaged` through `ix`.
///
/// # Safety
///
/// Same contract as `cudaMallocManaged`; `ix` must carry CUDA bindings.
pub unsafe fn malloc_managed_via<R: SymbolResolver + ?Sized>(
    ix: &Interposer<'_, R>,
    dev_ptr: *mut *mut c_void,
    size: usize,
    flags: c_uint,
) -> c_int {
    let Some(binding) = ix.bindings().allocate_managed.as_ref() else {
        return MALLOC_MANAGED.codes().invalid_value;
    };
    // SAFETY: `dev_ptr` comes from the caller of cudaMallocManaged.
    unsafe {
        ix.allocate(MALLOC_MANAGED, binding, dev_ptr, size, |real| {
            let real: MallocManagedFn = cast_fn(real);
            real(dev_ptr, size, flags)
        })
    }
}

/// `cudaFree` through `ix`.
///
/// # Safety
///
/// Same contract as `cudaFree`; `ix` must carry CUDA bindings.
pub unsafe fn free_via<R: SymbolResolver + ?Sized>(
    ix: &Interposer<'_, R>,
    dev_ptr: *mut c_void,
) -> c_int {
    ix.free(FREE, &ix.bindings().free, dev_ptr, |real| {
        // SAFETY: resolved from "cudaFree"; argument forwarded unchanged.
        unsafe {
            let real: FreeFn = cast_fn(real);
            real(dev_ptr)
        }
    })
}

/// `cudaMemGetInfo` through `ix`.
///
/// # Safety
///
/// Same contract as `cudaMemGetInfo`; `ix` must carry CUDA bindings.
pub unsafe fn mem_get_info_via<R: SymbolResolver + ?Sized>(
    ix: &Interposer<'_, R>,
    free: *mut usize,
    total: *mut usize,
) -> c_int {
    // SAFETY: out-pointers come from the caller of cudaMemGetInfo.
    unsafe {
        ix.mem_info(MEM_GET_INFO, &ix.bindings().mem_info, free, total, |real| {
            let real: MemGetInfoFn = cast_fn(real);
            real(free, total)
        })
    }
}

abi_fn! {
    /// Quota-checked `cudaMalloc`.
    fn cudaMalloc(dev_ptr: *mut *mut c_void, size: usize) -> c_int {
        // SAFETY: forwards the caller's arguments.
        unsafe { malloc_via(&Interposer::process(&CUDA), dev_ptr, size) }
    }
}

abi_fn! {
    /// Quota-checked `cudaMallocManaged`.
    fn cudaMallocManaged(dev_ptr: *mut *mut c_void, size: usize, flags: c_uint) -> c_int {
        // SAFETY: forwards the caller's arguments.
        unsafe { malloc_managed_via(&Interposer::process(&CUDA), dev_ptr, size, flags) }
    }
}

abi_fn! {
    /// `cudaFree` that returns the allocation's bytes to the quota.
    fn cudaFree(dev_ptr: *mut c_void) -> c_int {
        // SAFETY: forwards the caller's arguments.
        unsafe { free_via(&Interposer::process(&CUDA), dev_ptr) }
    }
}

abi_fn! {
    /// `cudaMemGetInfo` reporting the quota instead of the physical device.
    fn cudaMemGetInfo(free: *mut usize, total: *mut usize) -> c_int {
        // SAFETY: forwards the caller's arguments.
        unsafe { mem_get_info_via(&Interposer::process(&CUDA), free, total) }
    }
}
