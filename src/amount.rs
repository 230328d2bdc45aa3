use std::fmt;
use std::str::FromStr;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

const SCALE: i64 = 10_000;

/// Fixed-point decimal with 4 decimal places, stored as a scaled integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(i64);

/// Decimal odds with 4 decimal places, stored as a scaled integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Odds(i64);

/// Error while parsing a decimal string into [`Amount`] or [`Odds`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseDecimalError {
    #[error("empty decimal")]
    Empty,
    #[error("invalid decimal '{0}'")]
    Invalid(String),
    #[error("decimal '{0}' has more than 4 fractional digits")]
    TooPrecise(String),
    #[error("decimal '{0}' is out of range")]
    Overflow(String),
}

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub fn from_float(value: f64) -> Self {
        Amount((value * SCALE as f64).round() as i64)
    }

    pub fn from_scaled(value: i64) -> Self {
        Amount(value)
    }

    pub fn whole(value: i64) -> Self {
        Amount(value * SCALE)
    }

    pub fn scaled(self) -> i64 {
        self.0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Amount)
    }

    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Amount)
    }

    /// Multiply by decimal odds, rounding half away from zero at the 4th place.
    pub fn checked_mul_odds(self, odds: Odds) -> Option<Self> {
        let product = i128::from(self.0) * i128::from(odds.0);
        let scale = i128::from(SCALE);
        let half = scale / 2;
        let rounded = if product >= 0 {
            (product + half) / scale
        } else {
            (product - half) / scale
        };
        i64::try_from(rounded).ok().map(Amount)
    }
}

impl Odds {
    pub fn from_float(value: f64) -> Self {
        Odds((value * SCALE as f64).round() as i64)
    }

    pub fn from_scaled(value: i64) -> Self {
        Odds(value)
    }

    pub fn scaled(self) -> i64 {
        self.0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }
}

fn parse_scaled(input: &str) -> Result<i64, ParseDecimalError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(ParseDecimalError::Empty);
    }
    let invalid = || ParseDecimalError::Invalid(s.to_string());
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let (whole, frac) = digits.split_once('.').unwrap_or((digits, ""));
    if whole.is_empty() && frac.is_empty() {
        return Err(invalid());
    }
    if !whole.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    if frac.len() > 4 {
        return Err(ParseDecimalError::TooPrecise(s.to_string()));
    }

    let overflow = || ParseDecimalError::Overflow(s.to_string());
    let whole: i64 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| overflow())?
    };
    let frac: i64 = if frac.is_empty() {
        0
    } else {
        format!("{frac:0<4}").parse().map_err(|_| invalid())?
    };
    let value = whole
        .checked_mul(SCALE)
        .and_then(|w| w.checked_add(frac))
        .ok_or_else(overflow)?;
    Ok(if negative { -value } else { value })
}

fn fmt_scaled(value: i64, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let sign = if value < 0 { "-" } else { "" };
    let abs = value.unsigned_abs();
    let scale = SCALE as u64;
    let whole = abs / scale;
    let frac = abs % scale;
    write!(f, "{sign}{whole}.{frac:04}")
}

impl FromStr for Amount {
    type Err = ParseDecimalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_scaled(s).map(Amount)
    }
}

impl FromStr for Odds {
    type Err = ParseDecimalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_scaled(s).map(Odds)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_scaled(self.0, f)
    }
}

impl fmt::Display for Odds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_scaled(self.0, f)
    }
}

// The operators panic on overflow in debug builds like the integer ops do.
// Sums over untrusted ledger data go through `checked_add`/`checked_sub` or
// a wider accumulator instead.
impl std::ops::Add for Amount {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Amount(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Amount {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Amount(self.0 - rhs.0)
    }
}

impl std::ops::AddAssign for Amount {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl std::ops::SubAssign for Amount {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

macro_rules! decimal_serde {
    ($name:ident) => {
        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(de::Error::custom)
            }
        }
    };
}

decimal_serde!(Amount);
decimal_serde!(Odds);
