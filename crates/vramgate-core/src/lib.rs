//! Quota engine for vramgate.
//!
//! This crate holds everything the interposed vendor hooks share: the
//! admission protocol, the allocation table, the lazy binding state machine
//! and the configuration layer. It is pure safe Rust; the `extern "C"`
//! boundary lives in `vramgate-abi`.
//!
//! # Architecture
//!
//! ```text
//! vendor hook (abi) -> QuotaContext::allocate -> admit -> real call -> settle
//!                   -> QuotaContext::release  -> take   -> real call
//!                   -> QuotaContext::query_mem_info -> real call -> virtualize
//! ```
//!
//! - **Size parsing** (`size`): quota strings to bytes, bytes to log strings
//! - **Configuration** (`config`): environment-driven limit, verbosity, mode
//! - **Allocation table** (`table`): handle-keyed tracking with reservations
//! - **Quota context** (`context`): the single lock and the protocol
//! - **Vendors** (`vendor`): per-runtime status codes and call sites
//! - **Bindings** (`binding`): lazily published real-function pointers
//! - **Metrics** (`metrics`): snapshots for introspection and exit reports

pub mod binding;
pub mod config;
pub mod context;
pub mod error;
pub mod metrics;
pub mod size;
pub mod table;
pub mod vendor;

pub use binding::{BindingState, LazyBinding, SymbolResolver, VendorBindings, VendorPresence};
pub use config::{AdmissionMode, LogLevel, QuotaConfig};
pub use context::{QuotaContext, RealAllocation};
pub use error::{ConfigError, GateError, TableError};
pub use metrics::{MemInfo, QuotaSnapshot};
pub use size::{format_size, parse_size, try_parse_size};
pub use table::{AllocationEntry, AllocationTable};
pub use vendor::{CallSite, StatusCodes, Vendor};

/// Version string reported in the startup banner.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
