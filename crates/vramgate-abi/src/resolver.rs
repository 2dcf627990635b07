//! `dlsym(RTLD_NEXT)` symbol resolution.

use std::ffi::{CStr, c_void};
use std::ptr::NonNull;

use vramgate_core::SymbolResolver;

/// Resolves the next definition of a symbol in the lookup order after this
/// library, which is the vendor runtime's own implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NextObject;

impl SymbolResolver for NextObject {
    fn lookup(&self, symbol: &CStr) -> Option<NonNull<c_void>> {
        // SAFETY: `symbol` is NUL-terminated; RTLD_NEXT is a valid pseudo-handle.
        let addr = unsafe { libc::dlsym(libc::RTLD_NEXT, symbol.as_ptr()) };
        NonNull::new(addr)
    }
}

/// Reinterpret a resolved address as the vendor function pointer type `F`.
///
/// # Safety
///
/// `F` must be an `extern "C"` function pointer type matching the C
/// prototype of the symbol `addr` was resolved from.
pub(crate) unsafe fn cast_fn<F: Copy>(addr: NonNull<c_void>) -> F {
    debug_assert_eq!(size_of::<F>(), size_of::<*mut c_void>());
    let raw = addr.as_ptr();
    // SAFETY: caller guarantees `F` is a pointer-sized fn type for this symbol.
    unsafe { std::mem::transmute_copy::<*mut c_void, F>(&raw) }
}
