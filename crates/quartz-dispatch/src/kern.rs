//! Global timer state and the per-interrupt dispatch loop.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use quartz_tick::{CpuId, InterruptFrame, SbTime, Uptime};
use quartz_timeout::TimeoutScheduler;

use crate::driver::{RegisterError, TimerDriver};
use crate::events::{HardClock, ProfClock, StatClock};

/// How the primary CPU reprograms the one-shot driver after each interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RearmPolicy {
    /// Arm for the minimum relative offset any event asked for; skip the
    /// re-arm entirely when no event reports a preference.
    #[default]
    MinOffset,
    /// Hold a fixed nominal one-tick period. When the observed inter-fire
    /// interval drifts more than ±10% off nominal, warn and re-derive the
    /// next deadline from the current time instead of the periodic grid.
    DriftCompensating,
}

#[derive(Debug, Clone)]
pub struct KernTimerConfig {
    pub hz: u32,
    /// The elected tick-keeping CPU. Only its interrupts advance the global
    /// tick, refresh the time markers, and re-arm the driver.
    pub primary: CpuId,
    pub policy: RearmPolicy,
    pub profiling_enabled: bool,
    /// Per-event requested periods in ticks; 0 means "no preference".
    pub prof_period_ticks: u32,
    pub stat_period_ticks: u32,
    pub hard_period_ticks: u32,
}

impl Default for KernTimerConfig {
    fn default() -> Self {
        KernTimerConfig {
            hz: 100,
            primary: CpuId::new(0),
            policy: RearmPolicy::MinOffset,
            profiling_enabled: false,
            prof_period_ticks: 1,
            stat_period_ticks: 1,
            hard_period_ticks: 1,
        }
    }
}

struct CpuEvents {
    prof: ProfClock,
    stat: StatClock,
    hard: HardClock,
}

/// Process-wide timer singleton: the registered driver, the high-resolution
/// `prev`/`now`/`next` markers, and the per-CPU event set.
///
/// The markers are plain atomics rather than a lock because they have exactly
/// one writer, the primary CPU's interrupt path; everyone else only reads.
pub struct KernTimer {
    config: KernTimerConfig,
    sbt_per_tick: SbTime,
    driver: Mutex<Option<Box<dyn TimerDriver>>>,
    prev: AtomicI64,
    now: AtomicI64,
    next: AtomicI64,
    cpus: Vec<Mutex<CpuEvents>>,
}

impl KernTimer {
    pub fn new(ncpus: usize, config: KernTimerConfig) -> Self {
        assert!(ncpus >= 1, "at least one CPU");
        assert!(config.hz > 0, "tick rate must be nonzero");
        assert!(config.primary.index() < ncpus, "primary CPU out of range");
        let sbt_per_tick = SbTime::per_hz(config.hz);
        let cpus = (0..ncpus)
            .map(|_| {
                Mutex::new(CpuEvents {
                    prof: ProfClock::new(config.profiling_enabled, config.prof_period_ticks),
                    stat: StatClock::new(config.stat_period_ticks),
                    hard: HardClock::new(config.hard_period_ticks),
                })
            })
            .collect();
        KernTimer {
            config,
            sbt_per_tick,
            driver: Mutex::new(None),
            prev: AtomicI64::new(0),
            now: AtomicI64::new(0),
            next: AtomicI64::new(0),
            cpus,
        }
    }

    /// Seeds the time markers from the uptime clock: `prev = now = next`,
    /// then `next` one tick out. Call once before the first interrupt.
    pub fn init(&self, uptime: &dyn Uptime) {
        let t = uptime.now();
        self.prev.store(t.to_bits(), Ordering::Relaxed);
        self.now.store(t.to_bits(), Ordering::Relaxed);
        self.next
            .store((t + self.sbt_per_tick).to_bits(), Ordering::Relaxed);
    }

    /// Installs the one-shot hardware driver. Exactly one driver exists
    /// process-wide; a second registration is refused.
    pub fn timerdev_register(&self, driver: Box<dyn TimerDriver>) -> Result<(), RegisterError> {
        let mut slot = self.driver.lock().unwrap();
        if slot.is_some() {
            return Err(RegisterError::AlreadyRegistered);
        }
        *slot = Some(driver);
        Ok(())
    }

    /// Hardware timer interrupt entry point.
    ///
    /// On the primary CPU: advance the global tick and refresh `now` *before*
    /// running any event, so every handler sees the same updated tick; run
    /// the three events in fixed order; re-arm the driver per policy. On any
    /// other CPU the events still run (per-CPU statistics and wheel advance)
    /// but the shared tick and the driver are untouched.
    pub fn interrupt(
        &self,
        frame: &InterruptFrame,
        scheduler: &TimeoutScheduler,
        uptime: &dyn Uptime,
    ) {
        let primary = frame.cpu == self.config.primary;
        if primary {
            scheduler.advance_tick();
            self.now.store(uptime.now().to_bits(), Ordering::Relaxed);
        }

        let min_offset = {
            let mut ev = self.cpus[frame.cpu.index()].lock().unwrap();
            let offsets = [
                ev.prof.handle(frame),
                ev.stat.handle(frame),
                ev.hard.handle(frame, scheduler),
            ];
            offsets.into_iter().flatten().min()
        };

        if primary {
            self.rearm(min_offset);
        }
    }

    fn rearm(&self, min_offset: Option<u32>) {
        let now = SbTime::from_bits(self.now.load(Ordering::Relaxed));
        let prev = SbTime::from_bits(self.prev.load(Ordering::Relaxed));
        let nominal = self.sbt_per_tick;

        let next = match self.config.policy {
            RearmPolicy::MinOffset => {
                let Some(min) = min_offset else {
                    return;
                };
                now + nominal * min
            }
            RearmPolicy::DriftCompensating => {
                let drift = (now - prev) - nominal;
                if drift.abs() > nominal / 10 {
                    log::warn!(
                        "tick drift {:+.6}s beyond tolerance, resynchronizing",
                        drift.as_secs_f64()
                    );
                    now + nominal
                } else {
                    SbTime::from_bits(self.next.load(Ordering::Relaxed)) + nominal
                }
            }
        };

        self.prev.store(now.to_bits(), Ordering::Relaxed);
        self.next.store(next.to_bits(), Ordering::Relaxed);
        if let Some(driver) = self.driver.lock().unwrap().as_mut() {
            driver.start(next, SbTime::ZERO);
        }
    }

    #[inline]
    pub fn hz(&self) -> u32 {
        self.config.hz
    }

    #[inline]
    pub fn per_tick(&self) -> SbTime {
        self.sbt_per_tick
    }

    /// `(prev, now, next)` high-resolution markers.
    pub fn markers(&self) -> (SbTime, SbTime, SbTime) {
        (
            SbTime::from_bits(self.prev.load(Ordering::Relaxed)),
            SbTime::from_bits(self.now.load(Ordering::Relaxed)),
            SbTime::from_bits(self.next.load(Ordering::Relaxed)),
        )
    }

    pub fn set_profiling(&self, enabled: bool) {
        for cpu in &self.cpus {
            cpu.lock().unwrap().prof.set_enabled(enabled);
        }
    }

    /// `(user, kernel)` profiling samples taken on `cpu`.
    pub fn prof_samples(&self, cpu: CpuId) -> (u64, u64) {
        self.cpus[cpu.index()].lock().unwrap().prof.samples()
    }

    pub fn stat_ticks(&self, cpu: CpuId) -> u64 {
        self.cpus[cpu.index()].lock().unwrap().stat.ticks()
    }

    pub fn softclocks(&self, cpu: CpuId) -> u64 {
        self.cpus[cpu.index()].lock().unwrap().hard.softclocks()
    }

    /// Offsets the three events asked for on their last run, in
    /// profiling/statistics/hard-clock order.
    pub fn last_requested(&self, cpu: CpuId) -> [Option<u32>; 3] {
        let ev = self.cpus[cpu.index()].lock().unwrap();
        [
            ev.prof.last_requested(),
            ev.stat.last_requested(),
            ev.hard.last_requested(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    use quartz_tick::FakeUptime;

    const CPU0: CpuId = CpuId::new(0);
    const CPU1: CpuId = CpuId::new(1);

    #[derive(Clone, Default)]
    struct FakeDriver {
        starts: Arc<Mutex<Vec<SbTime>>>,
    }

    impl TimerDriver for FakeDriver {
        fn start(&mut self, first: SbTime, _period: SbTime) {
            self.starts.lock().unwrap().push(first);
        }

        fn stop(&mut self) {}
    }

    fn setup(ncpus: usize, config: KernTimerConfig) -> (KernTimer, TimeoutScheduler, FakeUptime, FakeDriver) {
        let hz = config.hz;
        let timer = KernTimer::new(ncpus, config);
        let sched = TimeoutScheduler::new(ncpus, hz);
        let uptime = FakeUptime::new();
        timer.init(&uptime);
        let driver = FakeDriver::default();
        timer.timerdev_register(Box::new(driver.clone())).unwrap();
        (timer, sched, uptime, driver)
    }

    #[test]
    fn arms_for_the_minimum_requested_offset() {
        let (timer, sched, uptime, driver) = setup(
            1,
            KernTimerConfig {
                profiling_enabled: true,
                prof_period_ticks: 10,
                stat_period_ticks: 7,
                hard_period_ticks: 20,
                ..KernTimerConfig::default()
            },
        );

        timer.interrupt(&InterruptFrame::kernel(CPU0), &sched, &uptime);
        assert_eq!(sched.now().raw(), 1);
        assert_eq!(timer.last_requested(CPU0), [Some(10), Some(7), Some(20)]);
        let starts = driver.starts.lock().unwrap();
        assert_eq!(*starts, vec![SbTime::per_hz(100) * 7]);
    }

    #[test]
    fn no_preference_means_no_rearm() {
        let (timer, sched, uptime, driver) = setup(
            1,
            KernTimerConfig {
                prof_period_ticks: 0,
                stat_period_ticks: 0,
                hard_period_ticks: 0,
                ..KernTimerConfig::default()
            },
        );
        let seeded = timer.markers();

        timer.interrupt(&InterruptFrame::kernel(CPU0), &sched, &uptime);
        assert!(driver.starts.lock().unwrap().is_empty());
        // markers other than `now` keep their seeded values
        assert_eq!(timer.markers().0, seeded.0);
        assert_eq!(timer.markers().2, seeded.2);
    }

    #[test]
    fn non_primary_interrupt_runs_events_only() {
        let (timer, sched, uptime, driver) = setup(2, KernTimerConfig::default());

        timer.interrupt(&InterruptFrame::kernel(CPU1), &sched, &uptime);
        assert_eq!(sched.now().raw(), 0, "shared tick belongs to the primary");
        assert!(driver.starts.lock().unwrap().is_empty());
        assert_eq!(timer.stat_ticks(CPU1), 1);
        assert_eq!(timer.stat_ticks(CPU0), 0);

        timer.interrupt(&InterruptFrame::kernel(CPU0), &sched, &uptime);
        assert_eq!(sched.now().raw(), 1);
        assert_eq!(driver.starts.lock().unwrap().len(), 1);
    }

    #[test]
    fn hard_clock_drives_the_wheel() {
        let (timer, sched, uptime, _driver) = setup(1, KernTimerConfig::default());
        let fired = Arc::new(AtomicU32::new(0));
        let f = fired.clone();
        let id = sched.set(move |_, _| {
            f.fetch_add(1, Ordering::SeqCst);
        });
        assert!(sched.add(CPU0, id, 3));

        for _ in 0..2 {
            timer.interrupt(&InterruptFrame::kernel(CPU0), &sched, &uptime);
        }
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        timer.interrupt(&InterruptFrame::kernel(CPU0), &sched, &uptime);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(timer.softclocks(CPU0) >= 1);
    }

    #[test]
    fn profiling_samples_follow_the_frame() {
        let (timer, sched, uptime, _driver) = setup(
            1,
            KernTimerConfig {
                profiling_enabled: true,
                ..KernTimerConfig::default()
            },
        );

        timer.interrupt(&InterruptFrame::user(CPU0, 0x401000), &sched, &uptime);
        timer.interrupt(&InterruptFrame::kernel(CPU0), &sched, &uptime);
        timer.interrupt(&InterruptFrame::user(CPU0, 0x402000), &sched, &uptime);
        assert_eq!(timer.prof_samples(CPU0), (2, 1));

        timer.set_profiling(false);
        timer.interrupt(&InterruptFrame::user(CPU0, 0x403000), &sched, &uptime);
        assert_eq!(timer.prof_samples(CPU0), (2, 1));
    }

    #[test]
    fn drift_policy_holds_the_periodic_grid_when_on_time() {
        let (timer, sched, uptime, driver) = setup(
            1,
            KernTimerConfig {
                policy: RearmPolicy::DriftCompensating,
                ..KernTimerConfig::default()
            },
        );
        let tick = SbTime::per_hz(100);

        uptime.advance(tick);
        timer.interrupt(&InterruptFrame::kernel(CPU0), &sched, &uptime);
        uptime.advance(tick);
        timer.interrupt(&InterruptFrame::kernel(CPU0), &sched, &uptime);

        let starts = driver.starts.lock().unwrap();
        assert_eq!(*starts, vec![tick * 2, tick * 3]);
    }

    #[test]
    fn drift_policy_resynchronizes_when_late() {
        let (timer, sched, uptime, driver) = setup(
            1,
            KernTimerConfig {
                policy: RearmPolicy::DriftCompensating,
                ..KernTimerConfig::default()
            },
        );
        let tick = SbTime::per_hz(100);

        uptime.advance(tick);
        timer.interrupt(&InterruptFrame::kernel(CPU0), &sched, &uptime);
        // three ticks late: well beyond the ±10% tolerance
        uptime.advance(tick * 3);
        timer.interrupt(&InterruptFrame::kernel(CPU0), &sched, &uptime);

        let starts = driver.starts.lock().unwrap();
        assert_eq!(starts[0], tick * 2);
        // resynchronized from current time (4 ticks in), not the grid
        assert_eq!(starts[1], tick * 5);
    }

    #[test]
    fn second_driver_registration_is_refused() {
        let timer = KernTimer::new(1, KernTimerConfig::default());
        timer
            .timerdev_register(Box::new(FakeDriver::default()))
            .unwrap();
        assert_eq!(
            timer.timerdev_register(Box::new(FakeDriver::default())),
            Err(RegisterError::AlreadyRegistered)
        );
    }

    #[test]
    fn init_seeds_markers_one_tick_apart() {
        let timer = KernTimer::new(1, KernTimerConfig::default());
        let uptime = FakeUptime::new();
        uptime.set(SbTime::from_secs(5));
        timer.init(&uptime);
        let (prev, now, next) = timer.markers();
        assert_eq!(prev, SbTime::from_secs(5));
        assert_eq!(now, SbTime::from_secs(5));
        assert_eq!(next, SbTime::from_secs(5) + SbTime::per_hz(100));
    }
}
