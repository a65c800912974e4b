//! Arena-backed circular queues.
//!
//! Timeout records live in a per-CPU arena and are addressed by stable slot
//! index. Queue membership is an explicit [`QueueTag`] plus index-based
//! prev/next links, so moving a record between queues is index reassignment
//! rather than pointer surgery, and the structural invariants stay checkable.

use std::sync::Arc;

use bitflags::bitflags;
use quartz_tick::Tick;

use crate::scheduler::{TimeoutFn, TimeoutId};

pub(crate) const NIL: u32 = u32::MAX;

bitflags! {
    /// State bits carried by a timeout record.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TimeoutFlags: u8 {
        /// The record has been initialized via `set`.
        const INITIALIZED = 1 << 0;
        /// The record is linked into a bucket or the todo list.
        const ONQUEUE = 1 << 1;
        /// The callback has fired since the last `add`.
        const TRIGGERED = 1 << 2;
        /// Run the callback under the wide serialization lock.
        const SERIALIZED = 1 << 3;
    }
}

/// Which queue a record is currently linked into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QueueTag {
    Detached,
    Bucket(u16),
    Todo,
}

pub(crate) struct Slot {
    pub handle: TimeoutId,
    pub callback: Arc<TimeoutFn>,
    pub name: Option<&'static str>,
    pub deadline: Tick,
    pub flags: TimeoutFlags,
    pub tag: QueueTag,
    prev: u32,
    next: u32,
}

impl Slot {
    pub fn new(
        handle: TimeoutId,
        callback: Arc<TimeoutFn>,
        name: Option<&'static str>,
        flags: TimeoutFlags,
    ) -> Self {
        Slot {
            handle,
            callback,
            name,
            deadline: Tick::ZERO,
            flags,
            tag: QueueTag::Detached,
            prev: NIL,
            next: NIL,
        }
    }
}

/// Head/tail of one doubly-linked index list.
#[derive(Debug, Clone, Copy)]
pub(crate) struct List {
    head: u32,
    tail: u32,
}

impl List {
    pub const EMPTY: List = List {
        head: NIL,
        tail: NIL,
    };

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head == NIL
    }
}

/// Slot storage with a free list. Indices are stable until freed.
pub(crate) struct Arena {
    slots: Vec<Option<Slot>>,
    free: Vec<u32>,
}

impl Arena {
    pub fn new() -> Self {
        Arena {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    pub fn alloc(&mut self, slot: Slot) -> u32 {
        debug_assert_eq!(slot.tag, QueueTag::Detached);
        match self.free.pop() {
            Some(idx) => {
                debug_assert!(self.slots[idx as usize].is_none());
                self.slots[idx as usize] = Some(slot);
                idx
            }
            None => {
                self.slots.push(Some(slot));
                (self.slots.len() - 1) as u32
            }
        }
    }

    /// Frees a slot. The record must already be unlinked.
    pub fn free(&mut self, idx: u32) -> Slot {
        let slot = self.slots[idx as usize]
            .take()
            .expect("freeing a vacant arena slot");
        debug_assert_eq!(slot.tag, QueueTag::Detached);
        self.free.push(idx);
        slot
    }

    #[inline]
    pub fn get(&self, idx: u32) -> &Slot {
        self.slots[idx as usize]
            .as_ref()
            .expect("stale arena index")
    }

    #[inline]
    pub fn get_mut(&mut self, idx: u32) -> &mut Slot {
        self.slots[idx as usize]
            .as_mut()
            .expect("stale arena index")
    }

    /// Appends `idx` at the tail of `list`, tagging it as a member.
    pub fn push_tail(&mut self, list: &mut List, idx: u32, tag: QueueTag) {
        debug_assert_ne!(tag, QueueTag::Detached);
        {
            let slot = self.get_mut(idx);
            debug_assert_eq!(slot.tag, QueueTag::Detached, "record already queued");
            slot.tag = tag;
            slot.prev = list.tail;
            slot.next = NIL;
        }
        if list.tail != NIL {
            self.get_mut(list.tail).next = idx;
        } else {
            list.head = idx;
        }
        list.tail = idx;
    }

    /// Unlinks `idx` from `list` and detaches it.
    pub fn unlink(&mut self, list: &mut List, idx: u32) {
        let (prev, next) = {
            let slot = self.get_mut(idx);
            debug_assert_ne!(slot.tag, QueueTag::Detached, "record not queued");
            let links = (slot.prev, slot.next);
            slot.tag = QueueTag::Detached;
            slot.prev = NIL;
            slot.next = NIL;
            links
        };
        if prev != NIL {
            self.get_mut(prev).next = next;
        } else {
            list.head = next;
        }
        if next != NIL {
            self.get_mut(next).prev = prev;
        } else {
            list.tail = prev;
        }
    }

    /// Pops the head of `list`, detaching it.
    pub fn pop_head(&mut self, list: &mut List) -> Option<u32> {
        let idx = list.head;
        if idx == NIL {
            return None;
        }
        self.unlink(list, idx);
        Some(idx)
    }

    /// Moves the whole of `src` onto the tail of `dst`, retagging each record.
    pub fn splice(&mut self, dst: &mut List, src: &mut List, dst_tag: QueueTag) {
        if src.is_empty() {
            return;
        }
        let mut idx = src.head;
        while idx != NIL {
            let slot = self.get_mut(idx);
            slot.tag = dst_tag;
            idx = slot.next;
        }
        if dst.tail != NIL {
            self.get_mut(dst.tail).next = src.head;
            self.get_mut(src.head).prev = dst.tail;
            dst.tail = src.tail;
        } else {
            *dst = *src;
        }
        *src = List::EMPTY;
    }

    /// Indices of `list` in order, for iteration that may relink entries.
    pub fn collect(&self, list: &List) -> Vec<u32> {
        let mut out = Vec::new();
        let mut idx = list.head;
        while idx != NIL {
            out.push(idx);
            idx = self.get(idx).next;
        }
        out
    }
}
