//! Error taxonomy.
//!
//! None of these ever escape to the host process as a panic: every hook
//! translates them into the calling vendor's status code via
//! [`GateError::status`].

use thiserror::Error;

use crate::vendor::Vendor;

/// Failure to interpret a configuration string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("empty size string")]
    Empty,
    #[error("size {0:?} has no leading number")]
    NotANumber(String),
    #[error("size {0:?} is negative")]
    Negative(String),
}

/// Allocation table could not take another entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TableError {
    #[error("allocation table full ({capacity} entries)")]
    CapacityExhausted { capacity: usize },
}

/// Reasons a hook refuses to hand a call to the real runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
    #[error("quota exceeded: requested {requested} B with {used} B of {limit} B in use")]
    AdmissionDenied { requested: u64, used: u64, limit: u64 },
    #[error("tracking capacity exhausted ({capacity} live allocations)")]
    TrackingCapacityExhausted { capacity: usize },
    #[error("real {symbol} could not be resolved")]
    BindingUnresolved { symbol: &'static str },
}

impl GateError {
    /// Status code `vendor` callers expect for this failure.
    #[must_use]
    pub const fn status(&self, vendor: Vendor) -> i32 {
        let codes = vendor.codes();
        match self {
            Self::AdmissionDenied { .. } | Self::TrackingCapacityExhausted { .. } => {
                codes.out_of_memory
            }
            Self::BindingUnresolved { .. } => codes.invalid_value,
        }
    }
}

impl From<TableError> for GateError {
    fn from(err: TableError) -> Self {
        match err {
            TableError::CapacityExhausted { capacity } => {
                Self::TrackingCapacityExhausted { capacity }
            }
        }
    }
}
