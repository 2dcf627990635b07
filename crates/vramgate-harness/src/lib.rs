//! Operator tooling for vramgate.
//!
//! This crate provides:
//! - Size inspection: how a quota string will be interpreted
//! - Configuration dump: what the interposer would read from this environment
//! - Scenarios: deterministic allocate/free sequences run against a simulated
//!   device behind a real `QuotaContext`, reported as JSON

#![forbid(unsafe_code)]

pub mod error;
pub mod report;
pub mod scenario;
pub mod sim_device;

pub use error::HarnessError;
pub use report::{ConfigReport, ScenarioReport, SizeReport, SnapshotReport, StepRecord};
pub use scenario::{ScenarioKind, ScenarioParams};
pub use sim_device::SimDevice;
