//! Fixed-point credit amounts.
//!
//! Balances mix whole-credit costs with half-credit costs, so every amount is held
//! as integer milli-credits. Floating point only appears at the JSON boundary.

use std::fmt;
use std::ops::Neg;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Milli-credits per credit.
pub const MILLIS_PER_CREDIT: i64 = 1_000;

/// An amount of credits, stored as milli-credits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Credits(i64);

impl Credits {
    pub const ZERO: Credits = Credits(0);

    pub const fn from_millis(millis: i64) -> Self {
        Credits(millis)
    }

    pub const fn from_whole(credits: i64) -> Self {
        Credits(credits * MILLIS_PER_CREDIT)
    }

    pub const fn millis(self) -> i64 {
        self.0
    }

    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn checked_add(self, other: Credits) -> Option<Credits> {
        self.0.checked_add(other.0).map(Credits)
    }

    pub fn checked_sub(self, other: Credits) -> Option<Credits> {
        self.0.checked_sub(other.0).map(Credits)
    }

    pub fn as_f64(self) -> f64 {
        self.0 as f64 / MILLIS_PER_CREDIT as f64
    }

    /// Rounds to the nearest milli-credit. Non-finite input yields `None`.
    pub fn from_f64(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        let millis = (value * MILLIS_PER_CREDIT as f64).round();
        if millis > i64::MAX as f64 || millis < i64::MIN as f64 {
            return None;
        }
        Some(Credits(millis as i64))
    }
}

impl Neg for Credits {
    type Output = Credits;

    fn neg(self) -> Credits {
        Credits(-self.0)
    }
}

impl fmt::Display for Credits {
    /// Renders without trailing zeros: `1`, `0.5`, `12.125`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let whole = abs / MILLIS_PER_CREDIT as u64;
        let frac = abs % MILLIS_PER_CREDIT as u64;
        if frac == 0 {
            return write!(f, "{sign}{whole}");
        }
        let frac = format!("{frac:03}");
        write!(f, "{sign}{whole}.{}", frac.trim_end_matches('0'))
    }
}

impl Serialize for Credits {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_f64())
    }
}

impl<'de> Deserialize<'de> for Credits {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = f64::deserialize(deserializer)?;
        Credits::from_f64(value)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid credit amount: {value}")))
    }
}
