//! Shared time vocabulary for the tick/timeout facility.
//!
//! The kernel's notion of time is a **tick**: a counter incremented once per
//! hardware timer interrupt on the primary CPU. Everything that schedules
//! against ticks uses wrapping arithmetic — only *differences* between tick
//! values are meaningful. The dispatch loop additionally tracks high-resolution
//! uptime as signed 32.32 fixed-point seconds ([`SbTime`]), derived from a
//! monotonic clock in production and from a deterministic fake in tests.

#![forbid(unsafe_code)]

mod clock;
mod frame;
mod sbtime;
mod tick;

pub use clock::{FakeUptime, StdUptime, Uptime};
pub use frame::{CpuId, InterruptFrame};
pub use sbtime::SbTime;
pub use tick::{Tick, TickCounter};
