//! Fixed-point money.

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub};
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// An amount held in integer cents.
///
/// On the wire it is a decimal in currency units: it serializes as the
/// string `"49.99"` and deserializes from that string, from a whole number
/// (`50` is 50.00) or from a JSON number with at most two fraction digits.
/// Arithmetic saturates at the `i64` bounds; a cart total never wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Money {
    cents: i64,
}

impl Money {
    pub const fn from_cents(cents: i64) -> Self {
        Self { cents }
    }

    pub const fn from_dollars(dollars: i64) -> Self {
        Self {
            cents: dollars.saturating_mul(100),
        }
    }

    pub const fn zero() -> Self {
        Self { cents: 0 }
    }

    pub const fn cents(&self) -> i64 {
        self.cents
    }

    pub fn is_positive(&self) -> bool {
        self.cents > 0
    }

    pub fn is_negative(&self) -> bool {
        self.cents < 0
    }

    /// Price of `quantity` units at this unit price.
    pub fn times(&self, quantity: u32) -> Money {
        Money {
            cents: self.cents.saturating_mul(i64::from(quantity)),
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.cents < 0 { "-" } else { "" };
        let abs = self.cents.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

/// A decimal amount that is malformed, finer than a cent or out of range.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid amount {0:?}: expected a decimal with at most two fraction digits")]
pub struct ParseMoneyError(String);

impl FromStr for Money {
    type Err = ParseMoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseMoneyError(s.to_string());
        let text = s.trim();
        let (negative, digits) = match text.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, text),
        };
        let (whole, fraction) = match digits.split_once('.') {
            Some((whole, fraction)) if !fraction.is_empty() => (whole, fraction),
            Some(_) => return Err(invalid()),
            None => (digits, ""),
        };
        let all_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        if whole.is_empty() || !all_digits(whole) || !all_digits(fraction) || fraction.len() > 2 {
            return Err(invalid());
        }

        let whole: i64 = whole.parse().map_err(|_| invalid())?;
        let fraction_cents = match fraction.len() {
            0 => 0,
            1 => i64::from(fraction.as_bytes()[0] - b'0') * 10,
            _ => fraction.parse::<i64>().map_err(|_| invalid())?,
        };
        let cents = whole
            .checked_mul(100)
            .and_then(|c| c.checked_add(fraction_cents))
            .ok_or_else(invalid)?;
        Ok(Money::from_cents(if negative { -cents } else { cents }))
    }
}

impl Serialize for Money {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

struct MoneyVisitor;

impl Visitor<'_> for MoneyVisitor {
    type Value = Money;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a decimal amount such as \"49.99\" or 49.99")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Money, E> {
        v.parse().map_err(E::custom)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Money, E> {
        v.checked_mul(100)
            .map(Money::from_cents)
            .ok_or_else(|| E::custom(ParseMoneyError(v.to_string())))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Money, E> {
        i64::try_from(v)
            .map_err(|_| E::custom(ParseMoneyError(v.to_string())))
            .and_then(|v| self.visit_i64(v))
    }

    // Display of an f64 is its shortest round-trip form, so `49.99` is read
    // back as the text the client sent and parsed exactly.
    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Money, E> {
        if !v.is_finite() {
            return Err(E::custom(ParseMoneyError(v.to_string())));
        }
        self.visit_str(&v.to_string())
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(MoneyVisitor)
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Self) -> Money {
        Money {
            cents: self.cents.saturating_add(rhs.cents),
        }
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Self) -> Money {
        Money {
            cents: self.cents.saturating_sub(rhs.cents),
        }
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), Add::add)
    }
}
