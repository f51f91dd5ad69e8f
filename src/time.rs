//! Monotonic microsecond timestamps.

use std::{
    fmt, io, mem,
    ops::{Add, AddAssign, Sub},
    time::Duration,
};

use libc::{CLOCK_MONOTONIC, timespec, timeval};

const USEC_PER_MSEC: u64 = 1_000;
const USEC_PER_SEC: u64 = 1_000_000;

/// A monotonic timestamp or time delta, in microseconds.
///
/// The epoch is whatever `CLOCK_MONOTONIC` uses, which is arbitrary.
///
/// [`Usec::ZERO`] doubles as the "unset" sentinel: it is never a valid timer expiry, and
/// [`TimerSubsystem::now`] returns it when the clock cannot be read.
///
/// Conversions into coarser units truncate.
///
/// [`TimerSubsystem::now`]: crate::timer::TimerSubsystem::now
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(transparent)
)]
#[repr(transparent)]
pub struct Usec(u64);

impl Usec {
    /// The zero sentinel.
    pub const ZERO: Self = Self(0);

    #[inline]
    pub const fn from_micros(us: u64) -> Self {
        Self(us)
    }

    #[inline]
    pub const fn from_millis(millis: u32) -> Self {
        Self(millis as u64 * USEC_PER_MSEC)
    }

    #[inline]
    pub const fn from_seconds(secs: u32) -> Self {
        Self(secs as u64 * USEC_PER_SEC)
    }

    #[inline]
    pub const fn from_hours(hours: u32) -> Self {
        Self(hours as u64 * 3600 * USEC_PER_SEC)
    }

    #[inline]
    pub const fn as_micros(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn as_millis(self) -> u64 {
        self.0 / USEC_PER_MSEC
    }

    #[inline]
    pub const fn as_seconds(self) -> u64 {
        self.0 / USEC_PER_SEC
    }

    #[inline]
    pub const fn as_minutes(self) -> u64 {
        self.as_seconds() / 60
    }

    #[inline]
    pub const fn as_hours(self) -> u64 {
        self.as_minutes() / 60
    }

    /// Returns the value in milliseconds, keeping the sub-millisecond fraction.
    #[inline]
    pub fn as_millis_f64(self) -> f64 {
        self.0 as f64 / USEC_PER_MSEC as f64
    }

    /// Returns the value in seconds, keeping the fraction.
    #[inline]
    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / USEC_PER_SEC as f64
    }

    #[inline]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn add_millis(self, millis: u32) -> Self {
        Self(self.0 + millis as u64 * USEC_PER_MSEC)
    }

    /// Returns `later - earlier`, saturating at zero.
    #[inline]
    pub const fn delta(later: Self, earlier: Self) -> Self {
        Self(later.0.saturating_sub(earlier.0))
    }

    /// Scales a time delta by `factor`.
    #[inline]
    pub fn mul_f64(self, factor: f64) -> Self {
        Self((self.0 as f64 * factor) as u64)
    }

    #[inline]
    pub const fn div(self, divisor: u64) -> Self {
        Self(self.0 / divisor)
    }

    pub const fn from_timeval(tv: &timeval) -> Self {
        Self(tv.tv_sec as u64 * USEC_PER_SEC + tv.tv_usec as u64)
    }

    pub const fn from_timespec(ts: &timespec) -> Self {
        Self(ts.tv_sec as u64 * USEC_PER_SEC + ts.tv_nsec as u64 / 1000)
    }

    pub fn to_timeval(self) -> timeval {
        // Safety: `timeval` is plain data; zeroing also clears any padding fields.
        let mut tv: timeval = unsafe { mem::zeroed() };
        tv.tv_sec = (self.0 / USEC_PER_SEC) as _;
        tv.tv_usec = (self.0 % USEC_PER_SEC) as _;
        tv
    }

    pub fn to_timespec(self) -> timespec {
        // Safety: `timespec` is plain data; zeroing also clears any padding fields.
        let mut ts: timespec = unsafe { mem::zeroed() };
        ts.tv_sec = (self.0 / USEC_PER_SEC) as _;
        ts.tv_nsec = ((self.0 % USEC_PER_SEC) * 1000) as _;
        ts
    }

    /// Reads `CLOCK_MONOTONIC`.
    pub fn now() -> io::Result<Self> {
        // Safety: `timespec` is plain data, and `clock_gettime` only writes through the valid
        // pointer it is given.
        let mut ts: timespec = unsafe { mem::zeroed() };
        let ret = unsafe { libc::clock_gettime(CLOCK_MONOTONIC, &mut ts) };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self::from_timespec(&ts))
    }

    /// Returns a [`Display`][fmt::Display]able, human-readable rendering of this time delta,
    /// like `"12ms"` or `"3h"`.
    pub fn human(self) -> HumanTime {
        HumanTime::from(self)
    }
}

impl Add for Usec {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign for Usec {
    #[inline]
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

/// Saturates at zero, like [`Usec::delta`].
impl Sub for Usec {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Self) -> Self {
        Self::delta(self, rhs)
    }
}

impl From<Usec> for Duration {
    #[inline]
    fn from(us: Usec) -> Self {
        Duration::from_micros(us.0)
    }
}

impl From<Duration> for Usec {
    /// Converts a [`Duration`], saturating at `u64::MAX` microseconds.
    #[inline]
    fn from(d: Duration) -> Self {
        Self(d.as_micros().try_into().unwrap_or(u64::MAX))
    }
}

impl fmt::Debug for Usec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}us", self.0)
    }
}

/// A time delta rounded down to a unit that keeps the number readable.
///
/// Returned by [`Usec::human`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HumanTime {
    value: u64,
    unit: &'static str,
}

impl HumanTime {
    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn unit(&self) -> &'static str {
        self.unit
    }
}

impl From<Usec> for HumanTime {
    fn from(us: Usec) -> Self {
        // (unit, factor from the previous unit, switch to the next unit at this value)
        const CONVERSION: &[(&str, u64, u64)] = &[
            ("us", 1, 5000),
            ("ms", 1000, 5000),
            ("s", 1000, 120),
            ("min", 60, 120),
            ("h", 60, 48),
            ("d", 24, u64::MAX),
        ];

        let mut value = us.0;
        for &(unit, change_from_previous, limit) in CONVERSION {
            value /= change_from_previous;
            if value < limit {
                return Self { value, unit };
            }
        }
        Self { value, unit: "d" }
    }
}

impl fmt::Display for HumanTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.value, self.unit)
    }
}
