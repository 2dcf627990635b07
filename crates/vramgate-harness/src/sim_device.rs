//! A simulated accelerator standing in for the real runtime.
//!
//! Hands out unique, aligned addresses and keeps its own record of what it
//! has granted, independent of the quota ledger. Scenarios compare the two.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use vramgate_core::RealAllocation;

const BASE_ADDR: usize = 0x7f00_0000_0000;
const ALIGN: usize = 0x20_0000;

#[derive(Debug)]
pub struct SimDevice {
    capacity: u64,
    latency: Duration,
    next: AtomicUsize,
    calls: AtomicU64,
    outstanding: AtomicU64,
    high_water: AtomicU64,
    live: Mutex<HashMap<usize, u64>>,
}

impl SimDevice {
    /// A device with `capacity` bytes of physical memory.
    #[must_use]
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            latency: Duration::ZERO,
            next: AtomicUsize::new(BASE_ADDR),
            calls: AtomicU64::new(0),
            outstanding: AtomicU64::new(0),
            high_water: AtomicU64::new(0),
            live: Mutex::new(HashMap::new()),
        }
    }

    /// Sleep this long inside every allocation.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Allocate with CUDA-style status codes.
    pub fn malloc(&self, size: u64) -> RealAllocation {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }

        let now = self.outstanding.fetch_add(size, Ordering::SeqCst) + size;
        if now > self.capacity {
            self.outstanding.fetch_sub(size, Ordering::SeqCst);
            return RealAllocation::failed(2);
        }
        self.high_water.fetch_max(now, Ordering::SeqCst);

        let handle = self.next.fetch_add(ALIGN, Ordering::SeqCst);
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle, size);
        RealAllocation::new(0, handle)
    }

    /// Free `handle`. Unknown handles report CUDA's invalid-value code.
    pub fn free(&self, handle: usize) -> i32 {
        let released = self
            .live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle);
        match released {
            Some(size) => {
                self.outstanding.fetch_sub(size, Ordering::SeqCst);
                0
            }
            None => 1,
        }
    }

    /// Always succeeds; the figures are overwritten by the quota anyway.
    pub fn mem_info(&self) -> i32 {
        0
    }

    #[must_use]
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn outstanding(&self) -> u64 {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Most bytes ever held at once.
    #[must_use]
    pub fn high_water(&self) -> u64 {
        self.high_water.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_outstanding_bytes() {
        let dev = SimDevice::new(1000);
        let a = dev.malloc(600);
        assert_eq!(a.status, 0);
        assert_eq!(dev.malloc(600).status, 2);
        assert_eq!(dev.outstanding(), 600);

        assert_eq!(dev.free(a.handle), 0);
        assert_eq!(dev.free(a.handle), 1);
        assert_eq!(dev.outstanding(), 0);
        assert_eq!(dev.high_water(), 600);
        assert_eq!(dev.calls(), 2);
    }
}
