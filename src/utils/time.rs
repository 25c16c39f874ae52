//! Rational media time
//!
//! Timestamps and durations are kept as `value / timescale` seconds so that
//! frame-rate and sample-rate derived values stay exact across a session.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, AddAssign, Sub};

/// A point or span on a media timeline, `value / timescale` seconds
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MediaTime {
    /// Number of timescale units
    pub value: i64,

    /// Units per second (never zero)
    pub timescale: u32,
}

impl MediaTime {
    /// Zero time
    pub const ZERO: MediaTime = MediaTime { value: 0, timescale: 1 };

    /// Create a time of `value / timescale` seconds
    ///
    /// A zero timescale is treated as 1.
    pub const fn new(value: i64, timescale: u32) -> Self {
        let timescale = if timescale == 0 { 1 } else { timescale };
        Self { value, timescale }
    }

    /// Create a time from milliseconds
    pub const fn from_millis(ms: i64) -> Self {
        Self::new(ms, 1000)
    }

    /// Create a time from floating point seconds, rounded to `timescale`
    pub fn from_seconds(seconds: f64, timescale: u32) -> Self {
        let timescale = timescale.max(1);
        Self::new((seconds * timescale as f64).round() as i64, timescale)
    }

    /// Time in seconds
    pub fn seconds(&self) -> f64 {
        self.value as f64 / self.timescale as f64
    }

    /// Time in whole milliseconds (rounded)
    pub fn as_millis(&self) -> i64 {
        self.rescale(1000).value
    }

    pub fn is_zero(&self) -> bool {
        self.value == 0
    }

    pub fn is_negative(&self) -> bool {
        self.value < 0
    }

    /// Express this time in another timescale, rounding half away from zero
    pub fn rescale(&self, timescale: u32) -> MediaTime {
        let timescale = timescale.max(1);
        if timescale == self.timescale {
            return *self;
        }
        let scaled = div_round(
            self.value as i128 * timescale as i128,
            self.timescale as i128,
        );
        MediaTime::new(clamp_i64(scaled), timescale)
    }

    /// The larger of two times
    pub fn max(self, other: MediaTime) -> MediaTime {
        if other > self {
            other
        } else {
            self
        }
    }
}

impl Default for MediaTime {
    fn default() -> Self {
        Self::ZERO
    }
}

/// Least common multiple when it fits in a `u32`, otherwise the larger
/// timescale (rescaling into it then rounds).
fn common_timescale(a: u32, b: u32) -> u32 {
    if a == b {
        return a;
    }
    let lcm = (a as u64 / gcd(a as u64, b as u64)) * b as u64;
    if lcm <= u32::MAX as u64 {
        lcm as u32
    } else {
        a.max(b)
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a.max(1)
}

fn div_round(num: i128, den: i128) -> i128 {
    let half = den / 2;
    if num >= 0 {
        (num + half) / den
    } else {
        (num - half) / den
    }
}

fn clamp_i64(value: i128) -> i64 {
    value.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

impl PartialEq for MediaTime {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MediaTime {}

impl PartialOrd for MediaTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MediaTime {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = self.value as i128 * other.timescale as i128;
        let rhs = other.value as i128 * self.timescale as i128;
        lhs.cmp(&rhs)
    }
}

impl Add for MediaTime {
    type Output = MediaTime;

    fn add(self, rhs: MediaTime) -> MediaTime {
        let timescale = common_timescale(self.timescale, rhs.timescale);
        let a = self.rescale(timescale);
        let b = rhs.rescale(timescale);
        MediaTime::new(a.value.saturating_add(b.value), timescale)
    }
}

impl AddAssign for MediaTime {
    fn add_assign(&mut self, rhs: MediaTime) {
        *self = *self + rhs;
    }
}

impl Sub for MediaTime {
    type Output = MediaTime;

    fn sub(self, rhs: MediaTime) -> MediaTime {
        self + MediaTime::new(rhs.value.saturating_neg(), rhs.timescale)
    }
}

impl fmt::Display for MediaTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.seconds())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_across_timescales() {
        assert_eq!(MediaTime::new(1, 30), MediaTime::new(2, 60));
        assert!(MediaTime::from_millis(34) > MediaTime::new(1, 30));
        assert!(MediaTime::new(-1, 1000) < MediaTime::ZERO);
    }

    #[test]
    fn test_add_mixed_timescales_is_exact() {
        let sum = MediaTime::new(1, 30) + MediaTime::new(1, 48_000);
        assert_eq!(sum.timescale, 48_000);
        assert_eq!(sum.value, 1_600 + 1);
    }

    #[test]
    fn test_sub() {
        let gap = MediaTime::from_millis(532) - MediaTime::from_millis(132);
        assert_eq!(gap, MediaTime::from_millis(400));
        assert!((MediaTime::ZERO - gap).is_negative());
    }

    #[test]
    fn test_rescale_rounds() {
        let t = MediaTime::new(1, 30).rescale(1000);
        assert_eq!(t.value, 33);
        let t = MediaTime::new(2, 30).rescale(1000);
        assert_eq!(t.value, 67);
        assert_eq!(MediaTime::new(-2, 30).rescale(1000).value, -67);
    }

    #[test]
    fn test_zero_timescale_is_coerced() {
        let t = MediaTime::new(5, 0);
        assert_eq!(t.timescale, 1);
        assert_eq!(t.seconds(), 5.0);
    }

    #[test]
    fn test_serde_round_trip_shape() {
        let json = serde_json::to_string(&MediaTime::from_millis(250)).unwrap();
        assert_eq!(json, r#"{"value":250,"timescale":1000}"#);
    }
}
