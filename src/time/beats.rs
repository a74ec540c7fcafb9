//! Musical time as whole beats plus sub-beat ticks.
//!
//! `Beats` is the timebase handed to the MIDI side of the engine. It is a
//! pure value type; conversion to and from wall-clock time goes through a
//! [`TempoMap`](crate::time::TempoMap).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Pulses (ticks) per quarter note.
pub const PPQN: i32 = 1920;

/// A position or duration in musical time: whole beats plus ticks.
///
/// Always kept normalized: `|ticks| < PPQN` and the signs of `beats` and
/// `ticks` agree (or either is zero). Arithmetic is done on the combined
/// tick count in 64 bits, so intermediate results cannot overflow for any
/// pair of in-range values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Beats {
    beats: i32,
    ticks: i32,
}

impl Beats {
    /// Largest representable value.
    pub const MAX: Beats = Beats {
        beats: i32::MAX,
        ticks: PPQN - 1,
    };

    /// Smallest (most negative) representable value.
    ///
    /// No `MIN` is defined; "minimum" is ambiguous for a value type that is
    /// both a position and a distance.
    pub const LOWEST: Beats = Beats {
        beats: i32::MIN,
        ticks: -(PPQN - 1),
    };

    #[inline]
    pub fn new(beats: i32, ticks: i32) -> Self {
        Self::from_ticks(beats as i64 * PPQN as i64 + ticks as i64)
    }

    #[inline]
    pub const fn from_beats(beats: i32) -> Self {
        Self { beats, ticks: 0 }
    }

    /// Re-canonicalize from a raw tick total.
    ///
    /// Truncating division gives `|ticks| < PPQN` with the remainder taking
    /// the sign of the total, which is exactly the normalization invariant.
    #[inline]
    pub fn from_ticks(total: i64) -> Self {
        Self {
            beats: (total / PPQN as i64) as i32,
            ticks: (total % PPQN as i64) as i32,
        }
    }

    /// Construct from a real beat count; the fractional part is rounded to
    /// the nearest tick.
    pub fn from_double(beats: f64) -> Self {
        let whole = beats.trunc() as i64;
        let frac = beats.fract();
        Self::from_ticks(whole * PPQN as i64 + (frac * PPQN as f64).round() as i64)
    }

    #[inline]
    pub fn get_beats(&self) -> i32 {
        self.beats
    }

    #[inline]
    pub fn get_ticks(&self) -> i32 {
        self.ticks
    }

    #[inline]
    pub fn to_ticks(&self) -> i64 {
        self.beats as i64 * PPQN as i64 + self.ticks as i64
    }

    #[inline]
    pub fn to_double(&self) -> f64 {
        self.to_ticks() as f64 / PPQN as f64
    }

    /// Round to the nearest beat boundary; ties (half a beat) round away
    /// from zero.
    pub fn round_to_beat(&self) -> Self {
        if self.ticks.abs() >= PPQN / 2 {
            Self::from_beats(self.beats + self.ticks.signum())
        } else {
            Self::from_beats(self.beats)
        }
    }

    /// Next beat boundary, unless already exactly on one.
    pub fn round_up_to_beat(&self) -> Self {
        if self.ticks > 0 {
            Self::from_beats(self.beats + 1)
        } else {
            Self::from_beats(self.beats)
        }
    }

    /// Truncate the ticks.
    pub fn round_down_to_beat(&self) -> Self {
        Self::from_beats(self.beats)
    }

    /// Smallest multiple of `step` at or above `self`, computed in real
    /// arithmetic at tick precision.
    pub fn snap_to(&self, step: Beats) -> Self {
        let s = step.to_double();
        if s == 0.0 {
            return *self;
        }
        Self::from_double((self.to_double() / s).ceil() * s)
    }

    /// True when `self` and the real beat count `other` differ by at most
    /// one tick.
    #[inline]
    pub fn matches_double(&self, other: f64) -> bool {
        (self.to_double() - other).abs() <= 1.0 / PPQN as f64
    }
}

impl PartialOrd for Beats {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Beats {
    #[inline]
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.to_ticks().cmp(&other.to_ticks())
    }
}

impl PartialEq<f64> for Beats {
    #[inline]
    fn eq(&self, other: &f64) -> bool {
        self.matches_double(*other)
    }
}

impl PartialOrd<f64> for Beats {
    /// One-tick differences compare equal, so strict `<` and `>` are false
    /// for such pairs.
    fn partial_cmp(&self, other: &f64) -> Option<std::cmp::Ordering> {
        if self.matches_double(*other) {
            Some(std::cmp::Ordering::Equal)
        } else {
            self.to_double().partial_cmp(other)
        }
    }
}

impl std::ops::Add for Beats {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self {
        Self::from_ticks(self.to_ticks() + rhs.to_ticks())
    }
}

impl std::ops::Sub for Beats {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Self) -> Self {
        Self::from_ticks(self.to_ticks() - rhs.to_ticks())
    }
}

impl std::ops::Neg for Beats {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        Self::from_ticks(-self.to_ticks())
    }
}

impl std::ops::Mul<i32> for Beats {
    type Output = Self;

    #[inline]
    fn mul(self, rhs: i32) -> Self {
        Self::from_ticks(self.to_ticks() * rhs as i64)
    }
}

impl std::ops::Div<i32> for Beats {
    type Output = Self;

    /// Tick-precision division.
    #[inline]
    fn div(self, rhs: i32) -> Self {
        Self::from_ticks(self.to_ticks() / rhs as i64)
    }
}

impl std::ops::AddAssign for Beats {
    #[inline]
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl std::ops::SubAssign for Beats {
    #[inline]
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl fmt::Display for Beats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.beats, self.ticks)
    }
}

impl FromStr for Beats {
    type Err = std::num::ParseFloatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_double(s.trim().parse::<f64>()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_normalization() {
        let b = Beats::new(1, 1920);
        assert_eq!(b.get_beats(), 2);
        assert_eq!(b.get_ticks(), 0);

        let b = Beats::new(0, -1921);
        assert_eq!(b.get_beats(), -1);
        assert_eq!(b.get_ticks(), -1);

        let b = Beats::new(2, -960);
        assert_eq!(b.get_beats(), 1);
        assert_eq!(b.get_ticks(), 960);
    }

    #[test]
    fn test_from_double() {
        let b = Beats::from_double(2.5);
        assert_eq!(b.get_beats(), 2);
        assert_eq!(b.get_ticks(), 960);

        let b = Beats::from_double(-0.25);
        assert_eq!(b.get_beats(), 0);
        assert_eq!(b.get_ticks(), -480);
    }

    #[test]
    fn test_arithmetic() {
        let a = Beats::new(1, 1000);
        let b = Beats::new(0, 1000);
        assert_eq!(a + b, Beats::new(2, 80));
        assert_eq!(a - b, Beats::from_beats(1));
        assert_eq!(-a, Beats::new(-1, -1000));
        assert_eq!(b * 2, Beats::new(1, 80));
        assert_eq!(a / 2, Beats::new(0, 1460));
    }

    #[test]
    fn test_rounding() {
        assert_eq!(Beats::new(1, 960).round_to_beat(), Beats::from_beats(2));
        assert_eq!(Beats::new(1, 959).round_to_beat(), Beats::from_beats(1));
        assert_eq!(Beats::new(1, 1).round_up_to_beat(), Beats::from_beats(2));
        assert_eq!(Beats::new(1, 0).round_up_to_beat(), Beats::from_beats(1));
        assert_eq!(Beats::new(1, 1919).round_down_to_beat(), Beats::from_beats(1));
    }

    #[test]
    fn test_snap_to() {
        let quarter = Beats::from_beats(1);
        assert_eq!(Beats::new(2, 1).snap_to(quarter), Beats::from_beats(3));
        assert_eq!(Beats::from_beats(3).snap_to(quarter), Beats::from_beats(3));

        let half = Beats::new(0, 960);
        assert_eq!(Beats::new(1, 1).snap_to(half), Beats::new(1, 960));
    }

    #[test]
    fn test_real_comparison_tolerance() {
        let b = Beats::new(1, 1);
        let one = 1.0 + 1.0 / PPQN as f64;
        assert!(b == one);
        // Within a tick: neither strictly less nor greater
        assert!(!(b < 1.0 + 0.5 / PPQN as f64));
        assert!(!(b > 1.0 + 0.5 / PPQN as f64));
        assert!(b < 2.0);
        assert!(b > 0.5);
    }

    #[test]
    fn test_display_and_parse() {
        assert_eq!(Beats::new(3, 960).to_string(), "3.960");
        let parsed: Beats = "2.5".parse().unwrap();
        assert_eq!(parsed, Beats::new(2, 960));
    }

    #[test]
    fn test_limits() {
        assert!(Beats::LOWEST < Beats::from_beats(0));
        assert!(Beats::MAX > Beats::from_beats(i32::MAX - 1));
    }

    #[test]
    fn test_serde_round_trip() {
        let b = Beats::new(7, 480);
        let json = serde_json::to_string(&b).unwrap();
        let back: Beats = serde_json::from_str(&json).unwrap();
        assert_eq!(back, b);
    }

    proptest! {
        #[test]
        fn prop_normalize_preserves_total(beats in -1_000_000i32..1_000_000, ticks in i32::MIN / 4..i32::MAX / 4) {
            let b = Beats::new(beats, ticks);
            prop_assert!(b.get_ticks().abs() < PPQN);
            if b.get_beats() != 0 && b.get_ticks() != 0 {
                prop_assert_eq!(b.get_beats().signum(), b.get_ticks().signum());
            }
            prop_assert_eq!(b.to_ticks(), beats as i64 * PPQN as i64 + ticks as i64);
        }

        #[test]
        fn prop_double_round_trip(x in -1_073_741_824.0f64..1_073_741_824.0) {
            let b = Beats::from_double(x);
            prop_assert!((b.to_double() - x).abs() <= 1.0 / PPQN as f64);
        }

        #[test]
        fn prop_add_sub_inverse(a in -1_000_000i64..1_000_000, b in -1_000_000i64..1_000_000) {
            let x = Beats::from_ticks(a);
            let y = Beats::from_ticks(b);
            prop_assert_eq!((x + y) - y, x);
        }
    }
}
