//! Ascend ACL runtime hooks: `aclrtMalloc`, `aclrtFree`, `aclrtGetMemInfo`.
//!
//! `aclrtMemMallocPolicy` and `aclrtMemAttr` are C enums and cross the
//! boundary as `c_int`; both are forwarded untouched.

use std::ffi::{c_int, c_void};

use vramgate_core::{CallSite, SymbolResolver, Vendor};

use crate::bindings::ACL;
use crate::dispatch::Interposer;
use crate::macros::abi_fn;
use crate::resolver::cast_fn;

type MallocFn = unsafe extern "C" fn(*mut *mut c_void, usize, c_int) -> c_int;
type FreeFn = unsafe extern "C" fn(*mut c_void) -> c_int;
type GetMemInfoFn = unsafe extern "C" fn(c_int, *mut usize, *mut usize) -> c_int;

const MALLOC: CallSite = CallSite::new(Vendor::Acl, "aclrtMalloc");
const FREE: CallSite = CallSite::new(Vendor::Acl, "aclrtFree");
const GET_MEM_INFO: CallSite = CallSite::new(Vendor::Acl, "aclrtGetMemInfo");

/// `aclrtMalloc` through `ix`.
///
/// # Safety
///
/// Same contract as `aclrtMalloc`; `ix` must carry ACL bindings.
pub unsafe fn malloc_via<R: SymbolResolver + ?Sized>(
    ix: &Interposer<'_, R>,
    dev_ptr: *mut *mut c_void,
    size: usize,
    policy: c_int,
) -> c_int {
    // SAFETY: `dev_ptr` comes from the caller of aclrtMalloc.
    unsafe {
        ix.allocate(MALLOC, &ix.bindings().allocate, dev_ptr, size, |real| {
            let real: MallocFn = cast_fn(real);
            real(dev_ptr, size, policy)
        })
    }
}

/// `aclrtFree` through `ix`.
///
/// # Safety
///
/// Same contract as `aclrtFree`; `ix` must carry ACL bindings.
pub unsafe fn free_via<R: SymbolResolver + ?Sized>(
    ix: &Interposer<'_, R>,
    dev_ptr: *mut c_void,
) -> c_int {
    ix.free(FREE, &ix.bindings().free, dev_ptr, |real| {
        // SAFETY: resolved from "aclrtFree"; argument forwarded unchanged.
        unsafe {
            let real: FreeFn = cast_fn(real);
            real(dev_ptr)
        }
    })
}

/// `aclrtGetMemInfo` through `ix`.
///
/// Every memory attribute gets the same quota view.
///
/// # Safety
///
/// Same contract as `aclrtGetMemInfo`; `ix` must carry ACL bindings.
pub unsafe fn get_mem_info_via<R: SymbolResolver + ?Sized>(
    ix: &Interposer<'_, R>,
    attr: c_int,
    free: *mut usize,
    total: *mut usize,
) -> c_int {
    // SAFETY: out-pointers come from the caller of aclrtGetMemInfo.
    unsafe {
        ix.mem_info(GET_MEM_INFO, &ix.bindings().mem_info, free, total, |real| {
            let real: GetMemInfoFn = cast_fn(real);
            real(attr, free, total)
        })
    }
}

abi_fn! {
    /// Quota-checked `aclrtMalloc`.
    fn aclrtMalloc(dev_ptr: *mut *mut c_void, size: usize, policy: c_int) -> c_int {
        // SAFETY: forwards the caller's arguments.
        unsafe { malloc_via(&Interposer::process(&ACL), dev_ptr, size, policy) }
    }
}

abi_fn! {
    /// `aclrtFree` that returns the allocation's bytes to the quota.
    fn aclrtFree(dev_ptr: *mut c_void) -> c_int {
        // SAFETY: forwards the caller's arguments.
        unsafe { free_via(&Interposer::process(&ACL), dev_ptr) }
    }
}

abi_fn! {
    /// `aclrtGetMemInfo` reporting the quota instead of the physical device.
    fn aclrtGetMemInfo(attr: c_int, free: *mut usize, total: *mut usize) -> c_int {
        // SAFETY: forwards the caller's arguments.
        unsafe { get_mem_info_via(&Interposer::process(&ACL), attr, free, total) }
    }
}
