//! Runtime configuration.
//!
//! Read once, from the environment of the interposed process:
//! - `HCS_VRAM_QUOTA`: byte ceiling (`16Gi`, `4G`, `1073741824`, ...).
//!   Unset or unparseable falls back to 4 GiB; an explicit `0` denies every
//!   allocation.
//! - `HCS_LOG_LEVEL`: `debug`, `info`, `warn` (default), `error` or `none`.
//! - `HCS_ADMISSION_MODE`: `optimistic` (default) releases the quota lock
//!   around the real allocation call; `strict` holds it, so concurrent
//!   allocations can never jointly overshoot the limit.
//! - `HCS_MAX_ALLOCATIONS`: live allocations tracked at once (default
//!   65536). `0` or `unbounded` removes the cap.
//!
//! The variable names match what the cluster admission webhook injects.

use tracing::level_filters::LevelFilter;

use crate::size::{GIB, try_parse_size};

pub const QUOTA_ENV: &str = "HCS_VRAM_QUOTA";
pub const LOG_LEVEL_ENV: &str = "HCS_LOG_LEVEL";
pub const ADMISSION_MODE_ENV: &str = "HCS_ADMISSION_MODE";
pub const MAX_ALLOCATIONS_ENV: &str = "HCS_MAX_ALLOCATIONS";

/// Quota applied when none (or garbage) is configured.
pub const DEFAULT_QUOTA: u64 = 4 * GIB;

/// Tracking capacity applied when none (or garbage) is configured.
pub const DEFAULT_MAX_ALLOCATIONS: usize = 65_536;

/// Minimum severity of emitted diagnostics.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Debug,
    Info,
    #[default]
    Warn,
    Error,
    /// Emit nothing.
    None,
}

impl LogLevel {
    /// Parse from string (case-insensitive); unknown values mean `Warn`.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Self::Debug,
            "info" => Self::Info,
            "warn" => Self::Warn,
            "error" => Self::Error,
            "none" => Self::None,
            _ => Self::Warn,
        }
    }

    #[must_use]
    pub const fn level_filter(self) -> LevelFilter {
        match self {
            Self::Debug => LevelFilter::DEBUG,
            Self::Info => LevelFilter::INFO,
            Self::Warn => LevelFilter::WARN,
            Self::Error => LevelFilter::ERROR,
            Self::None => LevelFilter::OFF,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::None => "none",
        }
    }

    /// Returns true if events at `event` severity pass this threshold.
    #[must_use]
    pub fn allows(self, event: Self) -> bool {
        event != Self::None && event >= self
    }
}

/// How the admission check relates to the real allocation call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdmissionMode {
    /// Check under the lock, allocate without it, commit under it again.
    /// Concurrent allocations may transiently overshoot the limit together.
    #[default]
    Optimistic,
    /// Hold the lock from the check through the commit. Allocations are
    /// serialized behind device latency; the limit is never exceeded.
    Strict,
}

impl AdmissionMode {
    /// Parse from string (case-insensitive); unknown values mean `Optimistic`.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" | "serial" | "serialized" => Self::Strict,
            _ => Self::Optimistic,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Optimistic => "optimistic",
            Self::Strict => "strict",
        }
    }

    /// Returns true if the quota lock stays held across the real call.
    #[must_use]
    pub const fn holds_lock_across_call(self) -> bool {
        matches!(self, Self::Strict)
    }
}

/// Everything the quota engine reads from its environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaConfig {
    pub limit: u64,
    pub log_level: LogLevel,
    pub admission: AdmissionMode,
    /// `None` means unbounded.
    pub max_tracked: Option<usize>,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            limit: DEFAULT_QUOTA,
            log_level: LogLevel::default(),
            admission: AdmissionMode::default(),
            max_tracked: Some(DEFAULT_MAX_ALLOCATIONS),
        }
    }
}

impl QuotaConfig {
    /// Defaults with a specific byte ceiling.
    #[must_use]
    pub fn with_limit(limit: u64) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn admission(mut self, mode: AdmissionMode) -> Self {
        self.admission = mode;
        self
    }

    #[must_use]
    pub fn max_tracked(mut self, cap: Option<usize>) -> Self {
        self.max_tracked = cap;
        self
    }

    /// Read the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve every setting through `lookup`, applying fallbacks.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            limit: resolve_limit(lookup(QUOTA_ENV).as_deref()),
            log_level: lookup(LOG_LEVEL_ENV)
                .map(|v| LogLevel::from_str_loose(&v))
                .unwrap_or_default(),
            admission: lookup(ADMISSION_MODE_ENV)
                .map(|v| AdmissionMode::from_str_loose(&v))
                .unwrap_or_default(),
            max_tracked: resolve_max_tracked(lookup(MAX_ALLOCATIONS_ENV).as_deref()),
        }
    }
}

fn resolve_limit(raw: Option<&str>) -> u64 {
    raw.and_then(|v| try_parse_size(v).ok())
        .unwrap_or(DEFAULT_QUOTA)
}

fn resolve_max_tracked(raw: Option<&str>) -> Option<usize> {
    let Some(raw) = raw.map(str::trim) else {
        return Some(DEFAULT_MAX_ALLOCATIONS);
    };
    if raw.eq_ignore_ascii_case("unbounded") {
        return None;
    }
    match raw.parse::<usize>() {
        Ok(0) => None,
        Ok(cap) => Some(cap),
        Err(_) => Some(DEFAULT_MAX_ALLOCATIONS),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn parse_log_levels() {
        assert_eq!(LogLevel::from_str_loose("debug"), LogLevel::Debug);
        assert_eq!(LogLevel::from_str_loose("INFO"), LogLevel::Info);
        assert_eq!(LogLevel::from_str_loose("Warn"), LogLevel::Warn);
        assert_eq!(LogLevel::from_str_loose("error"), LogLevel::Error);
        assert_eq!(LogLevel::from_str_loose("NONE"), LogLevel::None);
        assert_eq!(LogLevel::from_str_loose("verbose"), LogLevel::Warn);
        assert_eq!(LogLevel::from_str_loose(""), LogLevel::Warn);
    }

    #[test]
    fn level_threshold() {
        assert!(LogLevel::Warn.allows(LogLevel::Error));
        assert!(LogLevel::Warn.allows(LogLevel::Warn));
        assert!(!LogLevel::Warn.allows(LogLevel::Info));
        assert!(!LogLevel::None.allows(LogLevel::Error));
        assert!(!LogLevel::Debug.allows(LogLevel::None));
        assert_eq!(LogLevel::None.level_filter(), LevelFilter::OFF);
    }

    #[test]
    fn parse_admission_modes() {
        assert_eq!(AdmissionMode::from_str_loose("strict"), AdmissionMode::Strict);
        assert_eq!(AdmissionMode::from_str_loose("SERIAL"), AdmissionMode::Strict);
        assert_eq!(
            AdmissionMode::from_str_loose("optimistic"),
            AdmissionMode::Optimistic
        );
        assert_eq!(AdmissionMode::from_str_loose("fast"), AdmissionMode::Optimistic);
        assert_eq!(AdmissionMode::from_str_loose("bogus"), AdmissionMode::Optimistic);
        assert!(AdmissionMode::Strict.holds_lock_across_call());
        assert!(!AdmissionMode::Optimistic.holds_lock_across_call());
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let config = QuotaConfig::from_lookup(|_| None);
        assert_eq!(config, QuotaConfig::default());
        assert_eq!(config.limit, 4 * GIB);
        assert_eq!(config.max_tracked, Some(DEFAULT_MAX_ALLOCATIONS));
    }

    #[test]
    fn quota_fallbacks() {
        let garbage = QuotaConfig::from_lookup(lookup_from(&[(QUOTA_ENV, "plenty")]));
        assert_eq!(garbage.limit, DEFAULT_QUOTA);

        let empty = QuotaConfig::from_lookup(lookup_from(&[(QUOTA_ENV, "")]));
        assert_eq!(empty.limit, DEFAULT_QUOTA);

        let zero = QuotaConfig::from_lookup(lookup_from(&[(QUOTA_ENV, "0")]));
        assert_eq!(zero.limit, 0);

        let set = QuotaConfig::from_lookup(lookup_from(&[(QUOTA_ENV, "16Gi")]));
        assert_eq!(set.limit, 16 * GIB);

        let exponent = QuotaConfig::from_lookup(lookup_from(&[(QUOTA_ENV, "16e9")]));
        assert_eq!(exponent.limit, 16_000_000_000);
    }

    #[test]
    fn full_environment() {
        let config = QuotaConfig::from_lookup(lookup_from(&[
            (QUOTA_ENV, "1Gi"),
            (LOG_LEVEL_ENV, "debug"),
            (ADMISSION_MODE_ENV, "strict"),
            (MAX_ALLOCATIONS_ENV, "128"),
        ]));
        assert_eq!(config.limit, GIB);
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.admission, AdmissionMode::Strict);
        assert_eq!(config.max_tracked, Some(128));
    }

    #[test]
    fn tracking_capacity_variants() {
        assert_eq!(resolve_max_tracked(None), Some(DEFAULT_MAX_ALLOCATIONS));
        assert_eq!(resolve_max_tracked(Some("0")), None);
        assert_eq!(resolve_max_tracked(Some("Unbounded")), None);
        assert_eq!(resolve_max_tracked(Some(" 42 ")), Some(42));
        assert_eq!(
            resolve_max_tracked(Some("many")),
            Some(DEFAULT_MAX_ALLOCATIONS)
        );
    }
}
