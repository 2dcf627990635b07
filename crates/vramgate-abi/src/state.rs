//! Process-wide quota context and its lifecycle.
//!
//! The context is built exactly once, by whichever comes first: the load
//! hook or the first intercepted call. Later calls to [`initialize`] are
//! no-ops.

use std::sync::OnceLock;

use tracing::{info, warn};
use vramgate_core::{LogLevel, QuotaConfig, QuotaContext, VERSION, format_size};

use crate::bindings;
use crate::logging;
use crate::resolver::NextObject;

static CONTEXT: OnceLock<QuotaContext> = OnceLock::new();

/// The process-wide context, initializing it from the environment if needed.
pub fn context() -> &'static QuotaContext {
    CONTEXT.get_or_init(|| build(&QuotaConfig::from_env()))
}

/// The process-wide context if it has been initialized.
#[must_use]
pub fn try_context() -> Option<&'static QuotaContext> {
    CONTEXT.get()
}

/// Idempotent initialization.
pub fn initialize() {
    context();
}

fn build(config: &QuotaConfig) -> QuotaContext {
    logging::install(config.log_level);
    let gate = QuotaContext::new(config);

    let presence = bindings::probe_all(&NextObject);
    let vendors: Vec<String> = presence
        .iter()
        .filter(|p| p.allocate_resolved)
        .map(ToString::to_string)
        .collect();
    let capacity = gate
        .capacity()
        .map_or_else(|| "unbounded".to_owned(), |cap| cap.to_string());

    info!(
        "vramgate {VERSION} initialized, quota={}, mode={}, max_allocations={capacity}, vendors=[{}]",
        format_size(gate.limit()),
        gate.mode().as_str(),
        vendors.join(","),
    );
    if !bindings::CUDA.is_present() {
        warn!("cudaMalloc not found - CUDA library may not be loaded yet");
    }
    gate
}

/// Report the exit summary if the context was ever initialized.
pub fn shutdown() {
    let Some(gate) = try_context() else {
        return;
    };
    logging::write_raw(
        LogLevel::Info,
        &format!("vramgate shutdown: {}", gate.snapshot()),
    );
}
