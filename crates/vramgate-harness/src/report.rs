//! JSON report shapes emitted by the harness.

use serde::Serialize;
use vramgate_core::{QuotaConfig, QuotaSnapshot, format_size, parse_size, try_parse_size};

/// How one size string is interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SizeReport {
    pub input: String,
    /// What the interposer would use; garbage reads as 0.
    pub bytes: u64,
    pub formatted: String,
    /// False if the string has no leading number.
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SizeReport {
    #[must_use]
    pub fn from_input(input: &str) -> Self {
        let bytes = parse_size(input);
        let error = try_parse_size(input).err().map(|err| err.to_string());
        Self {
            input: input.to_owned(),
            bytes,
            formatted: format_size(bytes),
            valid: error.is_none(),
            error,
        }
    }
}

/// The configuration the interposer resolves from an environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigReport {
    pub limit: u64,
    pub limit_formatted: String,
    pub log_level: &'static str,
    pub admission_mode: &'static str,
    /// `None` means unbounded.
    pub max_allocations: Option<usize>,
}

impl From<&QuotaConfig> for ConfigReport {
    fn from(config: &QuotaConfig) -> Self {
        Self {
            limit: config.limit,
            limit_formatted: format_size(config.limit),
            log_level: config.log_level.as_str(),
            admission_mode: config.admission.as_str(),
            max_allocations: config.max_tracked,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SnapshotReport {
    pub limit: u64,
    pub used: u64,
    pub peak: u64,
    /// Bytes still admissible under the limit.
    pub available: u64,
    pub total_allocs: u64,
    pub total_frees: u64,
    pub failed_allocs: u64,
    pub tracked: usize,
}

impl From<QuotaSnapshot> for SnapshotReport {
    fn from(snap: QuotaSnapshot) -> Self {
        Self {
            limit: snap.limit,
            used: snap.used,
            peak: snap.peak,
            available: snap.available(),
            total_allocs: snap.total_allocs,
            total_frees: snap.total_frees,
            failed_allocs: snap.failed_allocs,
            tracked: snap.tracked,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOp {
    Allocate,
    Free,
    MemInfo,
}

/// One call a scenario made through the quota context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    pub op: StepOp,
    pub size: u64,
    pub status: i32,
    /// Device address involved, 0 if none.
    pub handle: usize,
    /// `used` after the call returned.
    pub used_after: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScenarioReport {
    pub scenario: &'static str,
    pub admission_mode: &'static str,
    pub limit: u64,
    pub steps: Vec<StepRecord>,
    pub snapshot: SnapshotReport,
    /// Bytes the simulated device held at its peak.
    pub device_high_water: u64,
    /// The device held more than the quota at some instant.
    pub limit_exceeded: bool,
    /// Committed bytes and device bytes agree after the run.
    pub conserved: bool,
}
