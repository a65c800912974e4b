//! The fixed set of per-CPU timer events, run on every interrupt in the order
//! profiling, statistics, hard-clock. Each handler updates only event-local
//! state and reports the relative tick offset it wants the next interrupt at
//! (`None` for no preference).

use quartz_tick::InterruptFrame;
use quartz_timeout::TimeoutScheduler;

/// Profiling clock: attributes samples to user or kernel context from the
/// interrupted frame. Reports no preference while disabled.
#[derive(Debug)]
pub struct ProfClock {
    enabled: bool,
    period_ticks: u32,
    user_samples: u64,
    kernel_samples: u64,
    last_requested: Option<u32>,
}

impl ProfClock {
    pub fn new(enabled: bool, period_ticks: u32) -> Self {
        ProfClock {
            enabled,
            period_ticks,
            user_samples: 0,
            kernel_samples: 0,
            last_requested: None,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn handle(&mut self, frame: &InterruptFrame) -> Option<u32> {
        if !self.enabled {
            self.last_requested = None;
            return None;
        }
        if frame.user_mode {
            self.user_samples += 1;
        } else {
            self.kernel_samples += 1;
        }
        self.last_requested = (self.period_ticks > 0).then_some(self.period_ticks);
        self.last_requested
    }

    /// `(user, kernel)` sample counts.
    pub fn samples(&self) -> (u64, u64) {
        (self.user_samples, self.kernel_samples)
    }

    pub fn last_requested(&self) -> Option<u32> {
        self.last_requested
    }
}

/// Statistics clock. With no separate statistics interrupt source it rides
/// the tick interrupt and simply counts firings per CPU.
#[derive(Debug)]
pub struct StatClock {
    period_ticks: u32,
    ticks: u64,
    last_requested: Option<u32>,
}

impl StatClock {
    pub fn new(period_ticks: u32) -> Self {
        StatClock {
            period_ticks,
            ticks: 0,
            last_requested: None,
        }
    }

    pub fn handle(&mut self, _frame: &InterruptFrame) -> Option<u32> {
        self.ticks += 1;
        self.last_requested = (self.period_ticks > 0).then_some(self.period_ticks);
        self.last_requested
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn last_requested(&self) -> Option<u32> {
        self.last_requested
    }
}

/// Hard clock: the only event touching the timing wheel. Advances the
/// interrupted CPU's wheel and drains it when the advance says so.
#[derive(Debug)]
pub struct HardClock {
    period_ticks: u32,
    softclocks: u64,
    last_requested: Option<u32>,
}

impl HardClock {
    pub fn new(period_ticks: u32) -> Self {
        HardClock {
            period_ticks,
            softclocks: 0,
            last_requested: None,
        }
    }

    pub fn handle(&mut self, frame: &InterruptFrame, scheduler: &TimeoutScheduler) -> Option<u32> {
        if scheduler.hardclock_update(frame.cpu) {
            scheduler.softclock(frame.cpu);
            self.softclocks += 1;
        }
        self.last_requested = (self.period_ticks > 0).then_some(self.period_ticks);
        self.last_requested
    }

    /// Drain passes this event has triggered on its CPU.
    pub fn softclocks(&self) -> u64 {
        self.softclocks
    }

    pub fn last_requested(&self) -> Option<u32> {
        self.last_requested
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quartz_tick::CpuId;

    #[test]
    fn prof_clock_attributes_samples_by_mode() {
        let mut prof = ProfClock::new(true, 1);
        assert_eq!(prof.handle(&InterruptFrame::kernel(CpuId::new(0))), Some(1));
        assert_eq!(prof.handle(&InterruptFrame::user(CpuId::new(0), 0x1000)), Some(1));
        assert_eq!(prof.handle(&InterruptFrame::user(CpuId::new(0), 0x2000)), Some(1));
        assert_eq!(prof.samples(), (2, 1));
    }

    #[test]
    fn disabled_prof_clock_reports_no_preference() {
        let mut prof = ProfClock::new(false, 1);
        assert_eq!(prof.handle(&InterruptFrame::kernel(CpuId::new(0))), None);
        assert_eq!(prof.samples(), (0, 0));
        prof.set_enabled(true);
        assert_eq!(prof.handle(&InterruptFrame::kernel(CpuId::new(0))), Some(1));
    }

    #[test]
    fn zero_period_counts_but_requests_nothing() {
        let mut stat = StatClock::new(0);
        assert_eq!(stat.handle(&InterruptFrame::kernel(CpuId::new(0))), None);
        assert_eq!(stat.ticks(), 1);
        assert_eq!(stat.last_requested(), None);
    }
}
