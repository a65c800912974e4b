use quartz_tick::SbTime;
use thiserror::Error;

/// Hardware timer abstraction consumed by the dispatch loop.
///
/// The loop only ever programs one-shot firings: every interrupt ends with a
/// fresh `start` for the next deadline (or none, if no event wants one).
/// `period` is passed through for hardware that supports autonomous periodic
/// mode; the dispatch loop always passes [`SbTime::ZERO`].
pub trait TimerDriver: Send {
    /// Arms the timer to fire at absolute uptime `first`.
    fn start(&mut self, first: SbTime, period: SbTime);

    /// Disarms any programmed firing.
    fn stop(&mut self);
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegisterError {
    #[error("a timer driver is already registered")]
    AlreadyRegistered,
}
