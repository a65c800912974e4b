use std::sync::atomic::{AtomicU32, Ordering};

/// A kernel tick value.
///
/// Ticks wrap. A timeout queued with a non-negative relative delay can never
/// be further than `i32::MAX` ticks in the future, so the only safe way to
/// compare two tick values is the signed wrapping difference returned by
/// [`Tick::since`]: positive means "after", zero or negative means "at or
/// before".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Tick(u32);

impl Tick {
    pub const ZERO: Tick = Tick(0);

    #[inline]
    pub const fn new(raw: u32) -> Self {
        Tick(raw)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Signed distance from `earlier` to `self`, wrapping-safe.
    #[inline]
    pub const fn since(self, earlier: Tick) -> i32 {
        self.0.wrapping_sub(earlier.0) as i32
    }

    /// The tick `ticks` steps away from `self` (wrapping).
    #[inline]
    pub const fn offset(self, ticks: i32) -> Tick {
        Tick(self.0.wrapping_add(ticks as u32))
    }
}

/// The global tick counter.
///
/// Written by exactly one designated CPU (the primary, during its timer
/// interrupt) and read by everyone. The single-writer discipline is upheld by
/// the dispatch loop's construction, not by a lock; the atomic only makes the
/// cross-CPU reads well-defined.
#[derive(Debug)]
pub struct TickCounter(AtomicU32);

impl TickCounter {
    pub const fn new(start: Tick) -> Self {
        TickCounter(AtomicU32::new(start.0))
    }

    #[inline]
    pub fn now(&self) -> Tick {
        Tick(self.0.load(Ordering::Relaxed))
    }

    /// Advances the counter by one tick and returns the new value.
    ///
    /// Must only be called from the single designated writer.
    #[inline]
    pub fn advance(&self) -> Tick {
        self.advance_by(1)
    }

    /// Advances the counter by `ticks` and returns the new value.
    ///
    /// Must only be called from the single designated writer.
    pub fn advance_by(&self, ticks: u32) -> Tick {
        Tick(self.0.fetch_add(ticks, Ordering::Relaxed).wrapping_add(ticks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn since_is_signed_and_wrapping() {
        let a = Tick::new(100);
        let b = Tick::new(105);
        assert_eq!(b.since(a), 5);
        assert_eq!(a.since(b), -5);

        let near_wrap = Tick::new(u32::MAX - 1);
        let wrapped = near_wrap.offset(4);
        assert_eq!(wrapped.raw(), 2);
        assert_eq!(wrapped.since(near_wrap), 4);
        assert_eq!(near_wrap.since(wrapped), -4);
    }

    #[test]
    fn offset_accepts_zero() {
        let t = Tick::new(7);
        assert_eq!(t.offset(0), t);
    }

    #[test]
    fn counter_advances() {
        let c = TickCounter::new(Tick::new(41));
        assert_eq!(c.advance().raw(), 42);
        assert_eq!(c.advance_by(8).raw(), 50);
        assert_eq!(c.now().raw(), 50);
    }
}
