//! The hierarchical timing wheel proper: four levels of 256 buckets plus a
//! todo (due) list, per CPU. See 'Scheme 7' in "Hashed and Hierarchical Timing
//! Wheels" (Varghese & Lauck) for the structure.
//!
//! All methods assume the owning CPU's mutex is held; the wheel itself is a
//! plain single-threaded structure.

use quartz_tick::Tick;

use crate::queue::{Arena, List, QueueTag, Slot};

pub(crate) const WHEEL_BITS: u32 = 8;
pub(crate) const WHEEL_SIZE: usize = 1 << WHEEL_BITS;
pub(crate) const WHEEL_LEVELS: usize = 4;
pub(crate) const BUCKETS: usize = WHEEL_SIZE * WHEEL_LEVELS;

pub(crate) struct Wheel {
    arena: Arena,
    buckets: Vec<List>,
    todo: List,
    /// Completed softclock passes, for introspection.
    pub softclock_runs: u64,
}

impl Wheel {
    pub fn new() -> Self {
        Wheel {
            arena: Arena::new(),
            buckets: vec![List::EMPTY; BUCKETS],
            todo: List::EMPTY,
            softclock_runs: 0,
        }
    }

    #[inline]
    fn mask(level: usize, time: u32) -> usize {
        ((time >> (level as u32 * WHEEL_BITS)) & (WHEEL_SIZE as u32 - 1)) as usize
    }

    /// Bucket for a pending record `rel` ticks away with absolute `deadline`.
    ///
    /// Level 0 covers relative delays up to 2^8 ticks inclusive, level 1 up to
    /// 2^16, level 2 up to 2^24, level 3 the rest. Within a level the index is
    /// the corresponding byte of the absolute deadline.
    pub fn bucket_index(rel: i32, deadline: Tick) -> usize {
        debug_assert!(rel > 0);
        let abs = deadline.raw();
        if rel <= (1 << (2 * WHEEL_BITS)) as i32 {
            if rel <= (1 << WHEEL_BITS) as i32 {
                Self::mask(0, abs)
            } else {
                Self::mask(1, abs) + WHEEL_SIZE
            }
        } else if rel <= (1 << (3 * WHEEL_BITS)) as i32 {
            Self::mask(2, abs) + 2 * WHEEL_SIZE
        } else {
            Self::mask(3, abs) + 3 * WHEEL_SIZE
        }
    }

    /// Moves the bucket `level` currently points at for `now` into the todo
    /// list.
    fn cascade(&mut self, level: usize, now: u32) {
        let bucket = Self::mask(level, now) + level * WHEEL_SIZE;
        self.arena
            .splice(&mut self.todo, &mut self.buckets[bucket], QueueTag::Todo);
    }

    /// Per-tick wheel advance. Cascades level 0 unconditionally and chains to
    /// a higher level only when the next-lower level's index wrapped to 0.
    /// Returns whether the todo list needs draining.
    pub fn hardclock_update(&mut self, now: Tick) -> bool {
        let t = now.raw();
        self.cascade(0, t);
        if Self::mask(0, t) == 0 {
            self.cascade(1, t);
            if Self::mask(1, t) == 0 {
                self.cascade(2, t);
                if Self::mask(2, t) == 0 {
                    self.cascade(3, t);
                }
            }
        }
        !self.todo.is_empty()
    }

    /// Administrative forward clock jump. Every queued record is coerced onto
    /// the todo list; records with remaining time `< delta` get their deadline
    /// clamped to the new now so the next drain fires them, the rest are
    /// re-hashed into their proper bucket by that same drain.
    pub fn adjust_forward(&mut self, now: Tick, delta: i32) {
        debug_assert!(delta > 0);
        let new_now = now.offset(delta);
        for b in 0..BUCKETS {
            while let Some(idx) = self.arena.pop_head(&mut self.buckets[b]) {
                let slot = self.arena.get_mut(idx);
                if slot.deadline.since(now) < delta {
                    slot.deadline = new_now;
                }
                self.arena.push_tail(&mut self.todo, idx, QueueTag::Todo);
            }
        }
    }

    pub fn insert_todo(&mut self, idx: u32) {
        self.arena.push_tail(&mut self.todo, idx, QueueTag::Todo);
    }

    pub fn insert_bucket(&mut self, idx: u32, bucket: usize) {
        self.arena
            .push_tail(&mut self.buckets[bucket], idx, QueueTag::Bucket(bucket as u16));
    }

    /// Unlinks a queued record from whichever queue holds it.
    pub fn unlink(&mut self, idx: u32) {
        match self.arena.get(idx).tag {
            QueueTag::Detached => {}
            QueueTag::Todo => self.arena.unlink(&mut self.todo, idx),
            QueueTag::Bucket(b) => self.arena.unlink(&mut self.buckets[b as usize], idx),
        }
    }

    pub fn pop_todo(&mut self) -> Option<u32> {
        self.arena.pop_head(&mut self.todo)
    }

    pub fn alloc(&mut self, slot: Slot) -> u32 {
        self.arena.alloc(slot)
    }

    /// Removes a record entirely (unlinking it first if queued), e.g. to
    /// migrate it to another CPU's wheel or release it. The returned slot
    /// keeps its original tag so [`Wheel::adopt`] can relink it equivalently.
    pub fn remove_record(&mut self, idx: u32) -> Slot {
        let tag = self.arena.get(idx).tag;
        self.unlink(idx);
        let mut slot = self.arena.free(idx);
        slot.tag = tag;
        slot
    }

    /// Inserts a migrated record, relinking it into the equivalent queue.
    pub fn adopt(&mut self, mut slot: Slot) -> u32 {
        let tag = slot.tag;
        slot.tag = QueueTag::Detached;
        let idx = self.arena.alloc(slot);
        match tag {
            QueueTag::Detached => {}
            QueueTag::Todo => self.insert_todo(idx),
            QueueTag::Bucket(b) => self.insert_bucket(idx, b as usize),
        }
        idx
    }

    #[inline]
    pub fn get(&self, idx: u32) -> &Slot {
        self.arena.get(idx)
    }

    #[inline]
    pub fn get_mut(&mut self, idx: u32) -> &mut Slot {
        self.arena.get_mut(idx)
    }

    pub fn todo_entries(&self) -> Vec<u32> {
        self.arena.collect(&self.todo)
    }

    pub fn bucket_entries(&self, bucket: usize) -> Vec<u32> {
        self.arena.collect(&self.buckets[bucket])
    }
}
