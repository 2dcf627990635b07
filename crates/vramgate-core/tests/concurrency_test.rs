use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use vramgate_core::size::MIB;
use vramgate_core::{AdmissionMode, CallSite, QuotaConfig, QuotaContext, RealAllocation, Vendor};

const MALLOC: CallSite = CallSite::new(Vendor::Hip, "hipMalloc");
const FREE: CallSite = CallSite::new(Vendor::Hip, "hipFree");

const THREADS: usize = 8;
const PER_THREAD: usize = 4;

/// Shared fake device that records how much it has actually handed out.
#[derive(Default)]
struct Device {
    next: AtomicUsize,
    outstanding: AtomicU64,
    high_water: AtomicU64,
}

impl Device {
    fn malloc(&self, size: u64) -> RealAllocation {
        // Widen the window between admission and commit.
        thread::sleep(Duration::from_millis(2));
        let handle = 0x1000 + self.next.fetch_add(1, Ordering::Relaxed) * 0x1000;
        let now = self.outstanding.fetch_add(size, Ordering::SeqCst) + size;
        self.high_water.fetch_max(now, Ordering::SeqCst);
        RealAllocation::new(0, handle)
    }

    fn free(&self, size: u64) -> i32 {
        self.outstanding.fetch_sub(size, Ordering::SeqCst);
        0
    }
}

fn burst(mode: AdmissionMode, limit: u64, size: u64) -> (Arc<QuotaContext>, Arc<Device>, u64) {
    let gate = Arc::new(QuotaContext::new(&QuotaConfig::with_limit(limit).admission(mode)));
    let device = Arc::new(Device::default());
    let barrier = Arc::new(Barrier::new(THREADS));
    let granted = Arc::new(AtomicU64::new(0));

    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let gate = Arc::clone(&gate);
            let device = Arc::clone(&device);
            let barrier = Arc::clone(&barrier);
            let granted = Arc::clone(&granted);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..PER_THREAD {
                    let status = gate.allocate(MALLOC, size, || device.malloc(size));
                    if status == 0 {
                        granted.fetch_add(size, Ordering::SeqCst);
                    } else {
                        assert_eq!(status, 2);
                    }
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker panicked");
    }

    let granted = granted.load(Ordering::SeqCst);
    (gate, device, granted)
}

#[test]
fn strict_mode_never_exceeds_limit() {
    let limit = 10 * MIB;
    let (gate, device, granted) = burst(AdmissionMode::Strict, limit, MIB);

    assert_eq!(granted, limit);
    assert_eq!(gate.used(), limit);
    assert!(gate.peak() <= limit);
    assert!(device.high_water.load(Ordering::SeqCst) <= limit);

    let (allocs, frees, failed) = gate.stats();
    assert_eq!(allocs, 10);
    assert_eq!(frees, 0);
    assert_eq!(failed, (THREADS * PER_THREAD) as u64 - 10);
}

#[test]
fn optimistic_mode_settles_to_committed_total() {
    let (gate, device, granted) = burst(AdmissionMode::Optimistic, 10 * MIB, MIB);

    // Overshoot is possible while calls are in flight; after quiescence the
    // ledger must still match exactly what the device handed out.
    assert_eq!(gate.used(), granted);
    assert_eq!(device.outstanding.load(Ordering::SeqCst), granted);
    assert_eq!(gate.snapshot().tracked as u64, granted / MIB);

    let (allocs, _, failed) = gate.stats();
    assert_eq!(allocs + failed, (THREADS * PER_THREAD) as u64);
}

#[test]
fn concurrent_alloc_free_pairs_return_to_zero() {
    for mode in [AdmissionMode::Optimistic, AdmissionMode::Strict] {
        let gate = Arc::new(QuotaContext::new(
            &QuotaConfig::with_limit(1024 * MIB).admission(mode),
        ));
        let device = Arc::new(Device::default());
        let barrier = Arc::new(Barrier::new(THREADS));

        let workers: Vec<_> = (0..THREADS)
            .map(|t| {
                let gate = Arc::clone(&gate);
                let device = Arc::clone(&device);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let size = (t as u64 + 1) * MIB;
                    for _ in 0..PER_THREAD {
                        let mut handle = 0;
                        let status = gate.allocate(MALLOC, size, || {
                            let out = device.malloc(size);
                            handle = out.handle;
                            out
                        });
                        assert_eq!(status, 0);
                        assert_eq!(gate.release(FREE, handle, || device.free(size)), 0);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().expect("worker panicked");
        }

        assert_eq!(gate.used(), 0, "{mode:?}");
        assert_eq!(gate.snapshot().tracked, 0);
        let total = (THREADS * PER_THREAD) as u64;
        assert_eq!(gate.stats(), (total, total, 0));
    }
}
