//! Zone serial numbers.
//!
//! SOA serials live in a 32 bit sequence space (RFC 1982): they wrap, and
//! two serials compare by the distance between them rather than by their
//! integer value. [`Serial`] implements those rules atop a `u32`.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

const HALF_SPACE: u32 = 0x8000_0000;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Serial(pub u32);

impl Serial {
    /// Sequence-space addition. `amount` must be below `2^31`; larger values
    /// are clamped so the result is always newer than `self`.
    pub fn add(self, amount: u32) -> Self {
        let amount = amount.min(HALF_SPACE - 1);
        Serial(self.0.wrapping_add(amount))
    }

    /// Whether `other` is strictly newer than `self`, i.e.
    /// `(other - self) mod 2^32` lies in `(0, 2^31)`.
    pub fn is_older_than(self, other: Serial) -> bool {
        let distance = other.0.wrapping_sub(self.0);
        distance != 0 && distance < HALF_SPACE
    }
}

impl PartialOrd for Serial {
    fn partial_cmp(&self, other: &Serial) -> Option<Ordering> {
        if self.0 == other.0 {
            Some(Ordering::Equal)
        } else if self.is_older_than(*other) {
            Some(Ordering::Less)
        } else if other.is_older_than(*self) {
            Some(Ordering::Greater)
        } else {
            // Exactly 2^31 apart: undefined by RFC 1982.
            None
        }
    }
}

impl From<u32> for Serial {
    fn from(value: u32) -> Self {
        Serial(value)
    }
}

impl fmt::Display for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
