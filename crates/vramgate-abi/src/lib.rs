// Every hook takes raw pointers from C callers with the vendor's own
// contract; restating it per export adds nothing.
#![allow(clippy::missing_safety_doc)]
//! # vramgate-abi
//!
//! The `LD_PRELOAD` boundary of vramgate. Builds `libvramgate.so`, which
//! exports the CUDA, ACL and HIP allocation entry points ahead of the real
//! runtimes, charges every allocation against a per-process quota, and
//! forwards to the real implementation found through `dlsym(RTLD_NEXT)`.
//!
//! # Architecture
//!
//! ```text
//! app -> cudaMalloc (this crate) -> Interposer -> QuotaContext -> real cudaMalloc
//! ```
//!
//! The quota engine itself lives in `vramgate-core`; this crate only owns
//! the C signatures, symbol resolution, the process-wide context and
//! diagnostics.

mod macros;

pub mod bindings;
pub mod dispatch;
pub mod lifecycle_abi;
pub mod logging;
pub mod resolver;
pub mod state;

pub mod acl_abi;
pub mod cuda_abi;
pub mod hip_abi;
pub mod query_abi;

pub use dispatch::Interposer;
pub use resolver::NextObject;
