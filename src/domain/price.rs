use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Fixed-point money amount with two decimal places, stored as minor units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Price {
    cents: i64,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid price literal: {0}")]
pub struct PriceParseError(String);

impl Price {
    pub const fn from_cents(cents: i64) -> Self {
        Self { cents }
    }

    /// Builds a price from a whole part and a two-digit fraction, `None` on overflow.
    pub fn from_parts(whole: i64, fraction: u8) -> Option<Self> {
        if fraction > 99 {
            return None;
        }
        whole
            .checked_mul(100)
            .and_then(|c| c.checked_add(i64::from(fraction)))
            .map(Self::from_cents)
    }

    pub const fn cents(self) -> i64 {
        self.cents
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.cents < 0 { "-" } else { "" };
        let abs = self.cents.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl FromStr for Price {
    type Err = PriceParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || PriceParseError(s.to_string());
        let trimmed = s.trim();
        let (negative, digits) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };
        let (whole, fraction) = digits.split_once('.').unwrap_or((digits, "0"));
        if whole.is_empty() || fraction.len() > 2 {
            return Err(err());
        }
        let whole: i64 = whole.parse().map_err(|_| err())?;
        let mut fraction: u8 = fraction.parse().map_err(|_| err())?;
        if digits.split_once('.').is_some_and(|(_, f)| f.len() == 1) {
            fraction *= 10;
        }
        let price = Self::from_parts(whole, fraction).ok_or_else(err)?;
        Ok(if negative {
            Self::from_cents(-price.cents)
        } else {
            price
        })
    }
}

impl Serialize for Price {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Price {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
