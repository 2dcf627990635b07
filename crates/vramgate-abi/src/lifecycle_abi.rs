//! Load and unload hooks.
//!
//! The dynamic loader runs `.init_array` entries when the object is mapped
//! and `.fini_array` entries at exit or `dlclose`. Neither is emitted for
//! unit tests, where the test harness owns process startup.

use crate::state;

#[cfg(all(not(test), target_os = "linux"))]
#[used]
#[unsafe(link_section = ".init_array")]
static ON_LOAD: extern "C" fn() = on_load;

#[cfg(all(not(test), target_os = "linux"))]
#[used]
#[unsafe(link_section = ".fini_array")]
static ON_UNLOAD: extern "C" fn() = on_unload;

/// Build the process-wide context as soon as the library is loaded.
pub extern "C" fn on_load() {
    state::initialize();
}

/// Print the exit summary.
pub extern "C" fn on_unload() {
    state::shutdown();
}
