use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Free-running cycle counter, the raw material for calibrated busy-waits.
///
/// Readings wrap at `u64::MAX`; consumers must compare them only via
/// `wrapping_sub`. A counter is usable for delays only when it advances at a
/// fixed rate regardless of power state.
pub trait CycleCounter: Send + Sync {
    fn read(&self) -> u64;

    /// Counter increments per second.
    fn frequency_hz(&self) -> u64;

    /// Whether the rate is invariant across frequency scaling and sleep.
    fn is_constant_rate(&self) -> bool;
}

/// Wall-clock-backed counter ticking at a fixed synthetic rate. Constant-rate
/// by construction.
#[derive(Debug)]
pub struct InstantCycleCounter {
    base: Instant,
    freq_hz: u64,
}

impl InstantCycleCounter {
    pub fn new(freq_hz: u64) -> Self {
        InstantCycleCounter {
            base: Instant::now(),
            freq_hz,
        }
    }
}

impl CycleCounter for InstantCycleCounter {
    fn read(&self) -> u64 {
        let elapsed = self.base.elapsed();
        (elapsed.as_nanos() * self.freq_hz as u128 / 1_000_000_000) as u64
    }

    fn frequency_hz(&self) -> u64 {
        self.freq_hz
    }

    fn is_constant_rate(&self) -> bool {
        true
    }
}

/// Deterministic counter for tests: advances by a fixed step per read, from a
/// settable starting value, so wraparound paths are reachable. Clones share
/// the underlying counter, letting a test keep a handle on one it handed off.
#[derive(Debug, Clone)]
pub struct FakeCycleCounter {
    now: Arc<AtomicU64>,
    step: u64,
    freq_hz: u64,
    constant_rate: bool,
}

impl FakeCycleCounter {
    pub fn new(start: u64, step: u64, freq_hz: u64) -> Self {
        FakeCycleCounter {
            now: Arc::new(AtomicU64::new(start)),
            step,
            freq_hz,
            constant_rate: true,
        }
    }

    pub fn variable_rate(start: u64, step: u64, freq_hz: u64) -> Self {
        FakeCycleCounter {
            constant_rate: false,
            ..Self::new(start, step, freq_hz)
        }
    }

    /// Current value without advancing.
    pub fn peek(&self) -> u64 {
        self.now.load(Ordering::Relaxed)
    }
}

impl CycleCounter for FakeCycleCounter {
    fn read(&self) -> u64 {
        self.now.fetch_add(self.step, Ordering::Relaxed)
    }

    fn frequency_hz(&self) -> u64 {
        self.freq_hz
    }

    fn is_constant_rate(&self) -> bool {
        self.constant_rate
    }
}
