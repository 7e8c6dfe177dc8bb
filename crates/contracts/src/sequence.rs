//! 16-bit wrapping sequence numbers.
//!
//! There is no absolute order once the counter wraps, so the only questions
//! this type answers are relative ones: "is this the very next value" and
//! "how far ahead is that value".

use std::fmt;

use serde::{Deserialize, Serialize};

/// Half the sequence space. Forward distances below this count as "newer".
const HALF_RANGE: u16 = 0x8000;

/// Wrapping packet sequence number
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Seq(pub u16);

impl Seq {
    /// The value immediately following this one (`+1 mod 65536`)
    #[inline]
    pub fn next(self) -> Self {
        Seq(self.0.wrapping_add(1))
    }

    /// The value immediately preceding this one
    #[inline]
    pub fn prev(self) -> Self {
        Seq(self.0.wrapping_sub(1))
    }

    /// Whether `self` directly follows `other`
    #[inline]
    pub fn follows(self, other: Seq) -> bool {
        other.next() == self
    }

    /// Forward distance from `self` to `other`, modulo 65536
    #[inline]
    pub fn distance_to(self, other: Seq) -> u16 {
        other.0.wrapping_sub(self.0)
    }

    /// Whether `self` is strictly ahead of `other` within half the sequence space
    #[inline]
    pub fn is_newer_than(self, other: Seq) -> bool {
        let d = other.distance_to(self);
        d != 0 && d < HALF_RANGE
    }

    /// The newer of two sequence numbers
    #[inline]
    pub fn newest(self, other: Seq) -> Seq {
        if other.is_newer_than(self) {
            other
        } else {
            self
        }
    }
}

impl From<u16> for Seq {
    fn from(value: u16) -> Self {
        Seq(value)
    }
}

impl fmt::Display for Seq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_wraps() {
        assert_eq!(Seq(65535).next(), Seq(0));
        assert_eq!(Seq(0).prev(), Seq(65535));
        assert!(Seq(0).follows(Seq(65535)));
        assert!(!Seq(2).follows(Seq(0)));
    }

    #[test]
    fn test_newer_across_wrap() {
        assert!(Seq(3).is_newer_than(Seq(65530)));
        assert!(!Seq(65530).is_newer_than(Seq(3)));
        assert!(!Seq(7).is_newer_than(Seq(7)));
        assert_eq!(Seq(65534).newest(Seq(1)), Seq(1));
    }

    #[test]
    fn test_distance() {
        assert_eq!(Seq(65535).distance_to(Seq(1)), 2);
        assert_eq!(Seq(10).distance_to(Seq(10)), 0);
    }
}
