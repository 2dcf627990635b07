//! Helper macros for hook generation.
//!
//! Provides the `abi_fn!` macro that generates `#[unsafe(no_mangle)] pub unsafe extern "C" fn`
//! exports carrying the vendor's C symbol name.

/// Generate an exported `extern "C"` hook.
///
/// # Usage
///
/// ```ignore
/// abi_fn! {
///     /// Doc comment for the hook.
///     fn cudaFree(dev_ptr: *mut c_void) -> c_int {
///         // forward to the dispatcher
///     }
/// }
/// ```
///
/// The body is not wrapped in `unsafe`: each raw-pointer operation inside it
/// carries its own `unsafe` block and `SAFETY:` note.
macro_rules! abi_fn {
    (
        $(#[$meta:meta])*
        fn $name:ident( $($arg:ident : $argty:ty),* $(,)? ) -> $ret:ty
        $body:block
    ) => {
        $(#[$meta])*
        #[allow(non_snake_case)]
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn $name( $($arg : $argty),* ) -> $ret
        $body
    };

    // Variant without return type (returns ())
    (
        $(#[$meta:meta])*
        fn $name:ident( $($arg:ident : $argty:ty),* $(,)? )
        $body:block
    ) => {
        $(#[$meta])*
        #[allow(non_snake_case)]
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn $name( $($arg : $argty),* )
        $body
    };
}

pub(crate) use abi_fn;
