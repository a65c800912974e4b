use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};
use std::time::Duration;

/// Signed 32.32 fixed-point seconds.
///
/// This is the dispatch loop's high-resolution uptime format: 32 integer bits
/// of seconds and 32 fractional bits, giving ~232 picosecond granularity with
/// cheap integer arithmetic. Differences of two uptime values are ordinary
/// signed subtraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SbTime(i64);

impl SbTime {
    pub const ZERO: SbTime = SbTime(0);
    pub const SECOND: SbTime = SbTime(1 << 32);

    #[inline]
    pub const fn from_bits(bits: i64) -> Self {
        SbTime(bits)
    }

    #[inline]
    pub const fn to_bits(self) -> i64 {
        self.0
    }

    #[inline]
    pub const fn from_secs(secs: i32) -> Self {
        SbTime((secs as i64) << 32)
    }

    /// The interval of one tick at `hz` interrupts per second.
    #[inline]
    pub const fn per_hz(hz: u32) -> Self {
        SbTime(Self::SECOND.0 / hz as i64)
    }

    pub fn from_duration(d: Duration) -> Self {
        let secs = (d.as_secs() as i64) << 32;
        let frac = ((d.subsec_nanos() as i64) << 32) / 1_000_000_000;
        SbTime(secs + frac)
    }

    /// Converts to a [`Duration`], saturating negative values to zero.
    pub fn to_duration(self) -> Duration {
        if self.0 <= 0 {
            return Duration::ZERO;
        }
        let secs = (self.0 >> 32) as u64;
        let nanos = (((self.0 & 0xffff_ffff) * 1_000_000_000) >> 32) as u32;
        Duration::new(secs, nanos)
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / (1u64 << 32) as f64
    }

    #[inline]
    pub const fn abs(self) -> Self {
        SbTime(self.0.abs())
    }

    #[inline]
    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }
}

impl Add for SbTime {
    type Output = SbTime;
    #[inline]
    fn add(self, rhs: SbTime) -> SbTime {
        SbTime(self.0 + rhs.0)
    }
}

impl AddAssign for SbTime {
    #[inline]
    fn add_assign(&mut self, rhs: SbTime) {
        self.0 += rhs.0;
    }
}

impl Sub for SbTime {
    type Output = SbTime;
    #[inline]
    fn sub(self, rhs: SbTime) -> SbTime {
        SbTime(self.0 - rhs.0)
    }
}

impl SubAssign for SbTime {
    #[inline]
    fn sub_assign(&mut self, rhs: SbTime) {
        self.0 -= rhs.0;
    }
}

impl Neg for SbTime {
    type Output = SbTime;
    #[inline]
    fn neg(self) -> SbTime {
        SbTime(-self.0)
    }
}

impl Mul<u32> for SbTime {
    type Output = SbTime;
    #[inline]
    fn mul(self, rhs: u32) -> SbTime {
        SbTime(self.0 * rhs as i64)
    }
}

impl Div<u32> for SbTime {
    type Output = SbTime;
    #[inline]
    fn div(self, rhs: u32) -> SbTime {
        SbTime(self.0 / rhs as i64)
    }
}
