//! The per-CPU timeout scheduler: `set`/`add`/`del`, the per-tick wheel
//! advance, and the softclock drain that actually fires callbacks.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use quartz_tick::{CpuId, Tick, TickCounter};

use crate::queue::{Slot, TimeoutFlags};
use crate::wheel::{Wheel, WHEEL_SIZE};

/// Callback type run by the softclock. Receives the scheduler (the wheel
/// mutex is *not* held during the call) and the firing timeout's own id, so a
/// callback may re-add or cancel any timeout, including itself.
pub type TimeoutFn = dyn Fn(&TimeoutScheduler, TimeoutId) + Send + Sync;

/// Stable handle to a timeout record created by [`TimeoutScheduler::set`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeoutId(u32);

impl TimeoutId {
    #[inline]
    pub(crate) const fn from_raw(raw: u32) -> Self {
        TimeoutId(raw)
    }

    #[inline]
    pub(crate) const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Where a record currently lives: which CPU's arena, which slot.
///
/// `cpu` is the owning processor recorded at set/add time; cancellation from
/// any CPU locks that owner's wheel. Entries are never reused once dead, so a
/// stale [`TimeoutId`] can only ever read its own tombstone.
#[derive(Debug, Clone, Copy)]
struct Location {
    live: bool,
    cpu: CpuId,
    slot: u32,
}

/// One pending timeout, as reported by [`TimeoutScheduler::pending_dump`].
#[derive(Debug, Clone)]
pub struct PendingTimeout {
    pub id: TimeoutId,
    /// Ticks until the deadline; zero or negative means overdue.
    pub residual: i32,
    /// Wheel level, or `None` for an entry on the todo list.
    pub level: Option<u8>,
    /// Absolute bucket index, or `None` for the todo list.
    pub bucket: Option<u16>,
    pub name: Option<&'static str>,
}

/// Per-CPU hierarchical timing wheels plus the global tick counter.
///
/// Locking: each CPU's wheel has one mutex, held only for queue bookkeeping
/// and never across callback execution. When an operation needs two wheels
/// (cross-CPU re-add) they are taken in ascending CPU order. The location
/// table is a leaf lock: it is only ever taken while holding at most the
/// wheel locks, and readers that saw a stale location retry after locking.
pub struct TimeoutScheduler {
    hz: u32,
    ticks: TickCounter,
    cpus: Vec<Mutex<Wheel>>,
    locations: Mutex<Vec<Location>>,
    /// Wide serialization lock for callbacks flagged `SERIALIZED`; taken
    /// strictly around the callback invocation, never around bookkeeping.
    serial: Mutex<()>,
}

impl TimeoutScheduler {
    pub fn new(ncpus: usize, hz: u32) -> Self {
        Self::new_at(ncpus, hz, Tick::ZERO)
    }

    pub fn new_at(ncpus: usize, hz: u32, start: Tick) -> Self {
        assert!(ncpus >= 1, "at least one CPU");
        assert!(hz > 0, "tick rate must be nonzero");
        TimeoutScheduler {
            hz,
            ticks: TickCounter::new(start),
            cpus: (0..ncpus).map(|_| Mutex::new(Wheel::new())).collect(),
            locations: Mutex::new(Vec::new()),
            serial: Mutex::new(()),
        }
    }

    #[inline]
    pub fn hz(&self) -> u32 {
        self.hz
    }

    #[inline]
    pub fn ncpus(&self) -> usize {
        self.cpus.len()
    }

    /// Current global tick.
    #[inline]
    pub fn now(&self) -> Tick {
        self.ticks.now()
    }

    /// Advances the global tick by one and returns the new value.
    ///
    /// Single-writer: only the primary CPU's interrupt path may call this.
    #[inline]
    pub fn advance_tick(&self) -> Tick {
        self.ticks.advance()
    }

    /// Creates a timeout record bound to `callback`. The record persists until
    /// [`TimeoutScheduler::release`]; re-use it across schedulings.
    pub fn set<F>(&self, callback: F) -> TimeoutId
    where
        F: Fn(&TimeoutScheduler, TimeoutId) + Send + Sync + 'static,
    {
        self.set_inner(None, TimeoutFlags::INITIALIZED, Arc::new(callback))
    }

    /// Like [`set`](Self::set), with a symbolic name for the pending dump.
    pub fn set_named<F>(&self, name: &'static str, callback: F) -> TimeoutId
    where
        F: Fn(&TimeoutScheduler, TimeoutId) + Send + Sync + 'static,
    {
        self.set_inner(Some(name), TimeoutFlags::INITIALIZED, Arc::new(callback))
    }

    /// Like [`set_named`](Self::set_named), but the callback runs under the
    /// wide serialization lock (for callbacks that assume the legacy
    /// single-threaded environment).
    pub fn set_serialized<F>(&self, name: &'static str, callback: F) -> TimeoutId
    where
        F: Fn(&TimeoutScheduler, TimeoutId) + Send + Sync + 'static,
    {
        self.set_inner(
            Some(name),
            TimeoutFlags::INITIALIZED | TimeoutFlags::SERIALIZED,
            Arc::new(callback),
        )
    }

    fn set_inner(
        &self,
        name: Option<&'static str>,
        flags: TimeoutFlags,
        callback: Arc<TimeoutFn>,
    ) -> TimeoutId {
        let cpu = CpuId::new(0);
        let mut wheel = self.cpus[0].lock().unwrap();
        let id = {
            let mut locs = self.locations.lock().unwrap();
            locs.push(Location {
                live: true,
                cpu,
                slot: u32::MAX,
            });
            TimeoutId((locs.len() - 1) as u32)
        };
        let idx = wheel.alloc(Slot::new(id, callback, name, flags));
        self.locations.lock().unwrap()[id.index()].slot = idx;
        id
    }

    /// Schedules the timeout to fire `rel_ticks` ticks from now on `cpu`'s
    /// wheel. Returns `true` if the timeout was newly scheduled, `false` if it
    /// was already pending (in which case only an *earlier* deadline takes
    /// effect immediately; a later one is left to cascading).
    ///
    /// A negative `rel_ticks` is a caller contract violation: fatal in debug
    /// builds, unspecified behavior otherwise.
    pub fn add(&self, cpu: CpuId, id: TimeoutId, rel_ticks: i32) -> bool {
        debug_assert!(rel_ticks >= 0, "timeout added with negative relative ticks");
        debug_assert!(cpu.index() < self.cpus.len(), "no such CPU");
        loop {
            let Some((owner, slot_idx)) = self.locate(id) else {
                debug_assert!(false, "add on an uninitialized or released timeout");
                return false;
            };
            let (mut owner_wheel, target_wheel) = self.lock_pair(owner, cpu);
            if !self.location_is(id, owner, slot_idx) {
                continue;
            }

            // Record ownership follows the caller's CPU, as of this add.
            let (mut wheel, idx) = match target_wheel {
                None => (owner_wheel, slot_idx),
                Some(mut target) => {
                    let slot = owner_wheel.remove_record(slot_idx);
                    let new_idx = target.adopt(slot);
                    {
                        let mut locs = self.locations.lock().unwrap();
                        let loc = &mut locs[id.index()];
                        loc.cpu = cpu;
                        loc.slot = new_idx;
                    }
                    drop(owner_wheel);
                    (target, new_idx)
                }
            };

            let now = self.ticks.now();
            let (old_deadline, new_deadline, was_queued) = {
                let slot = wheel.get_mut(idx);
                debug_assert!(slot.flags.contains(TimeoutFlags::INITIALIZED));
                let old = slot.deadline;
                slot.deadline = now.offset(rel_ticks);
                slot.flags.remove(TimeoutFlags::TRIGGERED);
                (old, slot.deadline, slot.flags.contains(TimeoutFlags::ONQUEUE))
            };

            return if was_queued {
                // Moved earlier: relink onto the todo list so the next drain
                // re-evaluates it instead of waiting for a bucket cascade.
                if new_deadline.since(now) < old_deadline.since(now) {
                    wheel.unlink(idx);
                    wheel.insert_todo(idx);
                }
                false
            } else {
                wheel.get_mut(idx).flags.insert(TimeoutFlags::ONQUEUE);
                wheel.insert_todo(idx);
                true
            };
        }
    }

    /// Cancels a pending timeout. Returns `true` if it was pending (the
    /// callback will not fire for that scheduling), `false` if it was not
    /// queued — including when its callback is concurrently executing on some
    /// CPU; there is no cross-context join.
    pub fn del(&self, id: TimeoutId) -> bool {
        loop {
            let Some((owner, idx)) = self.locate(id) else {
                debug_assert!(false, "del on an uninitialized or released timeout");
                return false;
            };
            let mut wheel = self.cpus[owner.index()].lock().unwrap();
            if !self.location_is(id, owner, idx) {
                continue;
            }
            let was_pending = wheel.get(idx).flags.contains(TimeoutFlags::ONQUEUE);
            if was_pending {
                wheel.unlink(idx);
                wheel.get_mut(idx).flags.remove(TimeoutFlags::ONQUEUE);
            }
            wheel.get_mut(idx).flags.remove(TimeoutFlags::TRIGGERED);
            return was_pending;
        }
    }

    /// Destroys the record. Cancels it first if pending; the handle is dead
    /// afterwards. Returns whether it was still pending.
    pub fn release(&self, id: TimeoutId) -> bool {
        loop {
            let Some((owner, idx)) = self.locate(id) else {
                return false;
            };
            let mut wheel = self.cpus[owner.index()].lock().unwrap();
            if !self.location_is(id, owner, idx) {
                continue;
            }
            let was_pending = wheel.get(idx).flags.contains(TimeoutFlags::ONQUEUE);
            drop(wheel.remove_record(idx));
            self.locations.lock().unwrap()[id.index()].live = false;
            return was_pending;
        }
    }

    /// Whether the timeout is currently queued.
    pub fn pending(&self, id: TimeoutId) -> bool {
        self.read_flags(id)
            .is_some_and(|f| f.contains(TimeoutFlags::ONQUEUE))
    }

    /// Whether the callback has fired since the last `add`.
    pub fn triggered(&self, id: TimeoutId) -> bool {
        self.read_flags(id)
            .is_some_and(|f| f.contains(TimeoutFlags::TRIGGERED))
    }

    fn read_flags(&self, id: TimeoutId) -> Option<TimeoutFlags> {
        loop {
            let (owner, idx) = self.locate(id)?;
            let wheel = self.cpus[owner.index()].lock().unwrap();
            if !self.location_is(id, owner, idx) {
                continue;
            }
            return Some(wheel.get(idx).flags);
        }
    }

    /// Per-tick wheel advance for `cpu`, called once per tick from the
    /// hard-clock event. Returns whether a softclock pass is needed.
    pub fn hardclock_update(&self, cpu: CpuId) -> bool {
        let mut wheel = self.cpus[cpu.index()].lock().unwrap();
        wheel.hardclock_update(self.ticks.now())
    }

    /// Drains `cpu`'s todo list: fires due entries (with the wheel mutex
    /// released around each callback) and re-hashes entries that a coarse
    /// cascade woke early.
    pub fn softclock(&self, cpu: CpuId) {
        let wheel_mutex = &self.cpus[cpu.index()];
        let mut wheel = wheel_mutex.lock().unwrap();
        wheel.softclock_runs += 1;
        loop {
            let Some(idx) = wheel.pop_todo() else {
                break;
            };
            let now = self.ticks.now();
            let (deadline, rel) = {
                let slot = wheel.get(idx);
                (slot.deadline, slot.deadline.since(now))
            };
            if rel > 0 {
                // Spurious wake from cascade granularity: not due yet, put it
                // in its proper bucket.
                let bucket = Wheel::bucket_index(rel, deadline);
                wheel.insert_bucket(idx, bucket);
                continue;
            }
            if rel < 0 {
                log::debug!("timeout delayed {} ticks", -rel);
            }
            let (id, callback, serialized) = {
                let slot = wheel.get_mut(idx);
                slot.flags.remove(TimeoutFlags::ONQUEUE);
                slot.flags.insert(TimeoutFlags::TRIGGERED);
                (
                    slot.handle,
                    slot.callback.clone(),
                    slot.flags.contains(TimeoutFlags::SERIALIZED),
                )
            };
            drop(wheel);
            if serialized {
                let _serial = self.serial.lock().unwrap();
                callback(self, id);
            } else {
                callback(self, id);
            }
            wheel = wheel_mutex.lock().unwrap();
        }
    }

    /// Completed softclock passes on `cpu`.
    pub fn softclock_runs(&self, cpu: CpuId) -> u64 {
        self.cpus[cpu.index()].lock().unwrap().softclock_runs
    }

    /// Administrative forward clock jump: every queued entry with remaining
    /// time `< delta_ticks` becomes due on the next drain, on every CPU, and
    /// the global tick advances by `delta_ticks`. A zero or negative delta is
    /// a benign no-op.
    pub fn correct_forward(&self, delta_ticks: i32) {
        if delta_ticks <= 0 {
            return;
        }
        let now = self.ticks.now();
        for wheel in &self.cpus {
            wheel.lock().unwrap().adjust_forward(now, delta_ticks);
        }
        self.ticks.advance_by(delta_ticks as u32);
    }

    /// Read-only view of everything pending on `cpu`'s wheel, todo list
    /// first, then buckets in index order.
    pub fn pending_dump(&self, cpu: CpuId) -> Vec<PendingTimeout> {
        let wheel = self.cpus[cpu.index()].lock().unwrap();
        let now = self.ticks.now();
        let mut out = Vec::new();
        for idx in wheel.todo_entries() {
            let slot = wheel.get(idx);
            out.push(PendingTimeout {
                id: slot.handle,
                residual: slot.deadline.since(now),
                level: None,
                bucket: None,
                name: slot.name,
            });
        }
        for b in 0..crate::wheel::BUCKETS {
            for idx in wheel.bucket_entries(b) {
                let slot = wheel.get(idx);
                out.push(PendingTimeout {
                    id: slot.handle,
                    residual: slot.deadline.since(now),
                    level: Some((b / WHEEL_SIZE) as u8),
                    bucket: Some(b as u16),
                    name: slot.name,
                });
            }
        }
        out
    }

    // --- duration-based add helpers -------------------------------------

    /// Schedules after `d`, converted to ticks at this scheduler's `hz`
    /// (truncating), saturating at `i32::MAX` ticks.
    pub fn add_duration(&self, cpu: CpuId, id: TimeoutId, d: Duration) -> bool {
        self.add(cpu, id, self.duration_to_ticks(d))
    }

    pub fn add_secs(&self, cpu: CpuId, id: TimeoutId, secs: u64) -> bool {
        self.add_duration(cpu, id, Duration::from_secs(secs))
    }

    pub fn add_msecs(&self, cpu: CpuId, id: TimeoutId, msecs: u64) -> bool {
        self.add_duration(cpu, id, Duration::from_millis(msecs))
    }

    pub fn add_usecs(&self, cpu: CpuId, id: TimeoutId, usecs: u64) -> bool {
        self.add_duration(cpu, id, Duration::from_micros(usecs))
    }

    pub fn add_nsecs(&self, cpu: CpuId, id: TimeoutId, nsecs: u64) -> bool {
        self.add_duration(cpu, id, Duration::from_nanos(nsecs))
    }

    fn duration_to_ticks(&self, d: Duration) -> i32 {
        let hz = self.hz as u128;
        let ticks =
            d.as_secs() as u128 * hz + d.subsec_nanos() as u128 * hz / 1_000_000_000;
        ticks.min(i32::MAX as u128) as i32
    }

    // --- internal -------------------------------------------------------

    fn locate(&self, id: TimeoutId) -> Option<(CpuId, u32)> {
        let locs = self.locations.lock().unwrap();
        let loc = locs.get(id.index())?;
        loc.live.then_some((loc.cpu, loc.slot))
    }

    fn location_is(&self, id: TimeoutId, cpu: CpuId, slot: u32) -> bool {
        let locs = self.locations.lock().unwrap();
        let loc = &locs[id.index()];
        loc.live && loc.cpu == cpu && loc.slot == slot
    }

    /// Locks the owner's wheel, plus the target's when it differs, in
    /// ascending CPU order. Returns `(owner_guard, target_guard)`.
    #[allow(clippy::type_complexity)]
    fn lock_pair(
        &self,
        owner: CpuId,
        target: CpuId,
    ) -> (MutexGuard<'_, Wheel>, Option<MutexGuard<'_, Wheel>>) {
        if owner == target {
            (self.cpus[owner.index()].lock().unwrap(), None)
        } else if owner < target {
            let o = self.cpus[owner.index()].lock().unwrap();
            let t = self.cpus[target.index()].lock().unwrap();
            (o, Some(t))
        } else {
            let t = self.cpus[target.index()].lock().unwrap();
            let o = self.cpus[owner.index()].lock().unwrap();
            (o, Some(t))
        }
    }
}
