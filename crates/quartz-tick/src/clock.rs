use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

use crate::SbTime;

/// Source of monotonic uptime readings for the dispatch loop.
///
/// Production uses [`StdUptime`]; unit tests drive the system deterministically
/// via [`FakeUptime`].
pub trait Uptime: Send + Sync {
    fn now(&self) -> SbTime;
}

/// Monotonic uptime backed by [`Instant`], anchored at construction.
#[derive(Debug)]
pub struct StdUptime {
    base: Instant,
}

impl StdUptime {
    pub fn new() -> Self {
        StdUptime {
            base: Instant::now(),
        }
    }
}

impl Default for StdUptime {
    fn default() -> Self {
        Self::new()
    }
}

impl Uptime for StdUptime {
    fn now(&self) -> SbTime {
        SbTime::from_duration(self.base.elapsed())
    }
}

/// Deterministic uptime for tests: time moves only when told to.
#[derive(Debug, Default)]
pub struct FakeUptime {
    now_bits: AtomicI64,
}

impl FakeUptime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, now: SbTime) {
        self.now_bits.store(now.to_bits(), Ordering::Relaxed);
    }

    pub fn advance(&self, delta: SbTime) {
        self.now_bits.fetch_add(delta.to_bits(), Ordering::Relaxed);
    }
}

impl Uptime for FakeUptime {
    fn now(&self) -> SbTime {
        SbTime::from_bits(self.now_bits.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_uptime_advances_on_demand() {
        let clock = FakeUptime::new();
        assert_eq!(clock.now(), SbTime::ZERO);
        clock.advance(SbTime::SECOND);
        clock.advance(SbTime::per_hz(100));
        assert_eq!(clock.now(), SbTime::SECOND + SbTime::per_hz(100));
    }

    #[test]
    fn std_uptime_is_monotonic() {
        let clock = StdUptime::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
