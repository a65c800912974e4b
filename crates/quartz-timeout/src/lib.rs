//! Deferred callback scheduling on a hierarchical timing wheel.
//!
//! Pending timeouts are kept per CPU in a four-level wheel of 256 buckets
//! each, hashed by deadline, plus a todo list of entries believed due. The
//! per-tick advance ([`TimeoutScheduler::hardclock_update`]) cascades at most
//! a handful of buckets, and the softclock drain fires whatever is actually
//! due, so insert, cancel, and advance are all O(1) amortized regardless of
//! how many timeouts are pending.
//!
//! Deadlines are wrapping tick values; the facility never compares them
//! except through signed subtraction against the current tick, so the tick
//! counter may wrap freely.

#![forbid(unsafe_code)]

mod queue;
mod scheduler;
mod wheel;

pub use queue::TimeoutFlags;
pub use scheduler::{PendingTimeout, TimeoutFn, TimeoutId, TimeoutScheduler};
