//! Calibrated busy-wait delays off a free-running cycle counter.
//!
//! [`DelaySource::init`] validates the counter once (constant rate, known
//! frequency); [`DelaySource::delay`] then burns the requested number of
//! microseconds by spinning on counter differences. All counter comparisons
//! are modular (`wrapping_sub`), so the wait stays correct across counter
//! overflow.

#![forbid(unsafe_code)]

mod counter;

use thiserror::Error;

pub use counter::{CycleCounter, FakeCycleCounter, InstantCycleCounter};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DelayError {
    #[error("cycle counter does not run at a constant rate")]
    NotConstantRate,
    #[error("cycle counter frequency is unknown")]
    UnknownFrequency,
}

/// A validated delay source: the counter behind it is known to tick at a
/// fixed, nonzero rate.
pub struct DelaySource {
    counter: Box<dyn CycleCounter>,
    freq_hz: u64,
}

impl DelaySource {
    pub fn init(counter: Box<dyn CycleCounter>) -> Result<Self, DelayError> {
        if !counter.is_constant_rate() {
            return Err(DelayError::NotConstantRate);
        }
        let freq_hz = counter.frequency_hz();
        if freq_hz == 0 {
            return Err(DelayError::UnknownFrequency);
        }
        Ok(DelaySource { counter, freq_hz })
    }

    #[inline]
    pub fn frequency_hz(&self) -> u64 {
        self.freq_hz
    }

    /// Busy-waits for at least `usec` microseconds.
    ///
    /// The budget is counted down by successive counter differences rather
    /// than compared against an end reading, so a counter wrap mid-wait
    /// subtracts the correct elapsed amount instead of stalling.
    pub fn delay(&self, usec: u32) {
        let mut n = (self.freq_hz / 1_000_000) as i64 * usec as i64;
        let mut prev = self.counter.read();
        while n > 0 {
            std::hint::spin_loop();
            let now = self.counter.read();
            n -= now.wrapping_sub(prev) as i64;
            prev = now;
        }
    }

    /// Converts a cycle count to whole microseconds (truncating).
    pub fn cycles_to_usec(&self, n: u64) -> u64 {
        (n as u128 * 1_000_000 / self.freq_hz as u128) as u64
    }
}
