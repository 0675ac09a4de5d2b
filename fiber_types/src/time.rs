//! Time abstractions
//!
//! Millisecond-resolution monotonic time. In tests, time can be virtual;
//! on a real host it maps to a monotonic OS clock.

use core::ops::{Add, Sub};
use serde::{Deserialize, Serialize};

/// A point in monotonic time
///
/// Unlike POSIX time (seconds since epoch), this is an opaque type: the
/// origin is whatever the clock that produced it chose, so instants from
/// different clocks must not be compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Instant {
    /// Milliseconds since some arbitrary epoch
    millis: u64,
}

impl Instant {
    /// Creates an instant from milliseconds
    pub const fn from_millis(millis: u64) -> Self {
        Self { millis }
    }

    /// Returns milliseconds since epoch
    pub const fn as_millis(&self) -> u64 {
        self.millis
    }

    /// Returns the duration since another instant
    pub fn duration_since(&self, earlier: Instant) -> Duration {
        Duration::from_millis(self.millis.saturating_sub(earlier.millis))
    }
}

impl Add<Duration> for Instant {
    type Output = Instant;

    fn add(self, duration: Duration) -> Self::Output {
        Instant::from_millis(self.millis + duration.as_millis())
    }
}

impl Sub<Duration> for Instant {
    type Output = Instant;

    fn sub(self, duration: Duration) -> Self::Output {
        Instant::from_millis(self.millis.saturating_sub(duration.as_millis()))
    }
}

/// A span of time
///
/// Explicit and type-safe: durations are never confused with absolute
/// instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Duration {
    /// Milliseconds
    millis: u64,
}

impl Duration {
    /// The zero-length duration
    pub const ZERO: Duration = Duration::from_millis(0);

    /// Creates a duration from milliseconds
    pub const fn from_millis(millis: u64) -> Self {
        Self { millis }
    }

    /// Creates a duration from seconds
    pub const fn from_secs(secs: u64) -> Self {
        Self {
            millis: secs * 1_000,
        }
    }

    /// Returns the duration in milliseconds
    pub const fn as_millis(&self) -> u64 {
        self.millis
    }

    /// Returns the duration in whole seconds
    pub const fn as_secs(&self) -> u64 {
        self.millis / 1_000
    }

    /// Returns whether this is the zero-length duration
    pub const fn is_zero(&self) -> bool {
        self.millis == 0
    }
}

impl Add for Duration {
    type Output = Duration;

    fn add(self, other: Duration) -> Self::Output {
        Duration::from_millis(self.millis + other.millis)
    }
}

impl Sub for Duration {
    type Output = Duration;

    fn sub(self, other: Duration) -> Self::Output {
        Duration::from_millis(self.millis.saturating_sub(other.millis))
    }
}

/// A wait bound: a finite duration or "wait forever"
///
/// The forever sentinel is a distinct variant, not a reserved duration
/// value, so every finite duration (including zero, which means "poll")
/// keeps its ordinary meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Timeout {
    /// Wait until released, with no deadline
    Forever,
    /// Wait at most this long; zero never suspends
    After(Duration),
}

impl Timeout {
    /// Returns whether this is a zero-length (polling) timeout
    pub fn is_zero(&self) -> bool {
        matches!(self, Timeout::After(d) if d.is_zero())
    }

    /// Returns the absolute deadline this timeout reaches from `now`,
    /// or `None` for a forever wait
    pub fn deadline_after(&self, now: Instant) -> Option<Instant> {
        match self {
            Timeout::Forever => None,
            Timeout::After(d) => Some(now + *d),
        }
    }
}

impl From<Duration> for Timeout {
    fn from(duration: Duration) -> Self {
        Timeout::After(duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_creation() {
        let d1 = Duration::from_secs(1);
        let d2 = Duration::from_millis(1000);
        assert_eq!(d1, d2);
    }

    #[test]
    fn test_duration_conversion() {
        let d = Duration::from_secs(2);
        assert_eq!(d.as_secs(), 2);
        assert_eq!(d.as_millis(), 2000);
    }

    #[test]
    fn test_duration_arithmetic() {
        let d1 = Duration::from_millis(500);
        let d2 = Duration::from_millis(300);

        assert_eq!(d1 + d2, Duration::from_millis(800));
        assert_eq!(d1 - d2, Duration::from_millis(200));
        assert_eq!(d2 - d1, Duration::ZERO);
    }

    #[test]
    fn test_duration_zero() {
        assert!(Duration::ZERO.is_zero());
        assert!(!Duration::from_millis(1).is_zero());
    }

    #[test]
    fn test_instant_ordering() {
        let i1 = Instant::from_millis(1000);
        let i2 = Instant::from_millis(2000);
        assert!(i2 > i1);
    }

    #[test]
    fn test_instant_duration_since() {
        let i1 = Instant::from_millis(1000);
        let i2 = Instant::from_millis(2500);
        assert_eq!(i2.duration_since(i1), Duration::from_millis(1500));
        assert_eq!(i1.duration_since(i2), Duration::ZERO);
    }

    #[test]
    fn test_instant_arithmetic() {
        let i = Instant::from_millis(1000);
        let d = Duration::from_millis(500);

        assert_eq!(i + d, Instant::from_millis(1500));
        assert_eq!(i - d, Instant::from_millis(500));
    }

    #[test]
    fn test_timeout_zero_detection() {
        assert!(Timeout::After(Duration::ZERO).is_zero());
        assert!(!Timeout::After(Duration::from_millis(1)).is_zero());
        assert!(!Timeout::Forever.is_zero());
    }

    #[test]
    fn test_timeout_deadline() {
        let now = Instant::from_millis(100);
        assert_eq!(
            Timeout::After(Duration::from_millis(50)).deadline_after(now),
            Some(Instant::from_millis(150))
        );
        assert_eq!(Timeout::Forever.deadline_after(now), None);
    }

    #[test]
    fn test_timeout_from_duration() {
        let t: Timeout = Duration::from_millis(10).into();
        assert_eq!(t, Timeout::After(Duration::from_millis(10)));
    }
}
