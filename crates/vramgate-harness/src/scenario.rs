//! Deterministic quota scenarios against a simulated device.
//!
//! Each scenario drives a fresh `QuotaContext` through the same protocol the
//! hooks use, with a [`SimDevice`] standing in for the vendor runtime, and
//! reports every call plus the final ledger.

use std::thread;
use std::time::Duration;

use clap::ValueEnum;
use vramgate_core::size::{GIB, MIB};
use vramgate_core::{AdmissionMode, CallSite, QuotaConfig, QuotaContext, Vendor};

use crate::error::HarnessError;
use crate::report::{ScenarioReport, StepOp, StepRecord};
use crate::sim_device::SimDevice;

const MALLOC: CallSite = CallSite::new(Vendor::Cuda, "cudaMalloc");
const FREE: CallSite = CallSite::new(Vendor::Cuda, "cudaFree");
const MEM_GET_INFO: CallSite = CallSite::new(Vendor::Cuda, "cudaMemGetInfo");

/// Upper bound on allocations in `fill-then-deny`.
pub const MAX_FILL_STEPS: usize = 4096;

/// Allocations each burst thread attempts.
pub const BURST_PER_THREAD: usize = 4;

const BURST_LATENCY: Duration = Duration::from_millis(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ScenarioKind {
    /// Allocate, get denied, free, retry.
    QuotaCycle,
    /// Allocate fixed-size blocks until the quota refuses, then free all.
    FillThenDeny,
    /// Concurrent allocations released at one barrier.
    Burst,
}

impl ScenarioKind {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::QuotaCycle => "quota-cycle",
            Self::FillThenDeny => "fill-then-deny",
            Self::Burst => "burst",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioParams {
    pub limit: u64,
    pub mode: AdmissionMode,
    pub threads: usize,
    /// Block size for `fill-then-deny` and `burst`.
    pub size: u64,
}

impl Default for ScenarioParams {
    fn default() -> Self {
        Self {
            limit: GIB,
            mode: AdmissionMode::Optimistic,
            threads: 8,
            size: 50 * MIB,
        }
    }
}

/// Run `kind` with `params`.
pub fn run(kind: ScenarioKind, params: &ScenarioParams) -> Result<ScenarioReport, HarnessError> {
    let gate = QuotaContext::new(&QuotaConfig::with_limit(params.limit).admission(params.mode));
    match kind {
        ScenarioKind::QuotaCycle => {
            let mut runner = Runner::new(&gate, SimDevice::new(u64::MAX));
            quota_cycle(&mut runner, params.limit);
            Ok(runner.finish(kind))
        }
        ScenarioKind::FillThenDeny => {
            if params.size == 0 {
                return Err(HarnessError::InvalidArgument(
                    "fill-then-deny needs a non-zero --size".to_owned(),
                ));
            }
            let mut runner = Runner::new(&gate, SimDevice::new(u64::MAX));
            fill_then_deny(&mut runner, params.size)?;
            Ok(runner.finish(kind))
        }
        ScenarioKind::Burst => {
            if params.threads == 0 {
                return Err(HarnessError::InvalidArgument(
                    "burst needs at least one thread".to_owned(),
                ));
            }
            let device = SimDevice::new(u64::MAX).with_latency(BURST_LATENCY);
            let mut runner = Runner::new(&gate, device);
            burst(&mut runner, params.threads, params.size)?;
            Ok(runner.finish(kind))
        }
    }
}

struct Runner<'a> {
    gate: &'a QuotaContext,
    device: SimDevice,
    steps: Vec<StepRecord>,
}

impl<'a> Runner<'a> {
    fn new(gate: &'a QuotaContext, device: SimDevice) -> Self {
        Self {
            gate,
            device,
            steps: Vec::new(),
        }
    }

    fn allocate(&mut self, size: u64) -> Option<usize> {
        let step = allocate_step(self.gate, &self.device, size);
        let granted = (step.status == 0).then_some(step.handle);
        self.steps.push(step);
        granted
    }

    fn free(&mut self, handle: usize) {
        let size = self.gate.tracked_size(handle).unwrap_or(0);
        let status = self.gate.release(FREE, handle, || self.device.free(handle));
        self.steps.push(StepRecord {
            op: StepOp::Free,
            size,
            status,
            handle,
            used_after: self.gate.used(),
        });
    }

    fn mem_info(&mut self) {
        let result = self
            .gate
            .query_mem_info(MEM_GET_INFO, || self.device.mem_info());
        let (status, free) = match result {
            Ok(info) => (0, info.free),
            Err(status) => (status, 0),
        };
        self.steps.push(StepRecord {
            op: StepOp::MemInfo,
            size: free,
            status,
            handle: 0,
            used_after: self.gate.used(),
        });
    }

    fn finish(self, kind: ScenarioKind) -> ScenarioReport {
        let snapshot = self.gate.snapshot();
        let device_high_water = self.device.high_water();
        ScenarioReport {
            scenario: kind.name(),
            admission_mode: self.gate.mode().as_str(),
            limit: self.gate.limit(),
            steps: self.steps,
            snapshot: snapshot.into(),
            device_high_water,
            limit_exceeded: device_high_water > snapshot.limit,
            conserved: snapshot.used == self.device.outstanding(),
        }
    }
}

fn allocate_step(gate: &QuotaContext, device: &SimDevice, size: u64) -> StepRecord {
    let mut handle = 0;
    let status = gate.allocate(MALLOC, size, || {
        let out = device.malloc(size);
        handle = out.handle;
        out
    });
    StepRecord {
        op: StepOp::Allocate,
        size,
        status,
        handle: if status == 0 { handle } else { 0 },
        used_after: gate.used(),
    }
}

fn fraction_of(limit: u64, numerator: u64) -> u64 {
    (u128::from(limit) * u128::from(numerator) / 1024) as u64
}

fn quota_cycle(runner: &mut Runner<'_>, limit: u64) {
    let first = fraction_of(limit, 500);
    let second = fraction_of(limit, 600);

    let held = runner.allocate(first);
    runner.allocate(second);
    runner.mem_info();
    if let Some(handle) = held {
        runner.free(handle);
    }
    runner.allocate(second);
    runner.mem_info();
}

fn fill_then_deny(runner: &mut Runner<'_>, size: u64) -> Result<(), HarnessError> {
    let mut live = Vec::new();
    for _ in 0..MAX_FILL_STEPS {
        match runner.allocate(size) {
            Some(handle) => live.push(handle),
            None => {
                for handle in live {
                    runner.free(handle);
                }
                return Ok(());
            }
        }
    }
    Err(HarnessError::InvalidArgument(format!(
        "--size too small: quota not exhausted after {MAX_FILL_STEPS} allocations"
    )))
}

fn burst(runner: &mut Runner<'_>, threads: usize, size: u64) -> Result<(), HarnessError> {
    let barrier = std::sync::Barrier::new(threads);
    let gate = runner.gate;
    let device = &runner.device;

    let per_thread = thread::scope(|scope| {
        let workers: Vec<_> = (0..threads)
            .map(|_| {
                let barrier = &barrier;
                scope.spawn(move || {
                    barrier.wait();
                    (0..BURST_PER_THREAD)
                        .map(|_| allocate_step(gate, device, size))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        workers
            .into_iter()
            .map(|worker| worker.join())
            .collect::<Result<Vec<_>, _>>()
    })
    .map_err(|_| HarnessError::InvalidArgument("burst worker panicked".to_owned()))?;

    runner.steps.extend(per_thread.into_iter().flatten());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fraction_is_exact_for_binary_quotas() {
        assert_eq!(fraction_of(GIB, 500), 500 * MIB);
        assert_eq!(fraction_of(GIB, 600), 600 * MIB);
        assert_eq!(fraction_of(u64::MAX, 1024), u64::MAX);
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        let zero_size = ScenarioParams {
            size: 0,
            ..ScenarioParams::default()
        };
        assert!(run(ScenarioKind::FillThenDeny, &zero_size).is_err());

        let no_threads = ScenarioParams {
            threads: 0,
            ..ScenarioParams::default()
        };
        assert!(run(ScenarioKind::Burst, &no_threads).is_err());
    }
}
