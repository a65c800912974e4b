//! Per-interrupt timer dispatch: the global timer state, the fixed event set
//! (profiling, statistics, hard-clock), and one-shot driver re-arming.
//!
//! Every hardware timer fire enters through [`KernTimer::interrupt`]. The
//! elected primary CPU advances the shared tick and reprograms the driver;
//! every CPU runs the three events against its own wheel and statistics. The
//! re-arm deadline comes from either the minimum offset the events asked for
//! ([`RearmPolicy::MinOffset`], the default) or a fixed periodic grid with
//! drift detection ([`RearmPolicy::DriftCompensating`]).

#![forbid(unsafe_code)]

mod driver;
mod events;
mod kern;

pub use driver::{RegisterError, TimerDriver};
pub use events::{HardClock, ProfClock, StatClock};
pub use kern::{KernTimer, KernTimerConfig, RearmPolicy};
