//! Human-readable byte sizes for configuration values ("64MB", "512KiB")

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Invalid size format: {0}")]
    InvalidFormat(String),

    #[error("Invalid number: {0}")]
    InvalidNumber(#[from] std::num::ParseIntError),

    #[error("Invalid unit: {0}")]
    InvalidUnit(String),

    #[error("Size out of range: {0}")]
    Overflow(String),
}

const KIB: u64 = 1024;

/// Binary units, largest first
const UNITS: &[(&str, u64)] = &[
    ("TB", KIB * KIB * KIB * KIB),
    ("GB", KIB * KIB * KIB),
    ("MB", KIB * KIB),
    ("KB", KIB),
];

/// Byte count that (de)serializes from either an integer or a "5MB" string
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ByteSize(pub u64);

impl ByteSize {
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Saturates on 32-bit targets
    pub fn as_usize(&self) -> usize {
        usize::try_from(self.0).unwrap_or(usize::MAX)
    }

    /// Largest unit that keeps at least one whole digit, with one decimal
    /// place when it is non-zero ("1.5MB", "2GB", "900B").
    pub fn to_human_readable(&self) -> String {
        for &(unit, divisor) in UNITS {
            if self.0 >= divisor {
                let whole = self.0 / divisor;
                let tenth = (self.0 % divisor) * 10 / divisor;
                return if tenth == 0 {
                    format!("{}{}", whole, unit)
                } else {
                    format!("{}.{}{}", whole, tenth, unit)
                };
            }
        }
        format!("{}B", self.0)
    }
}

fn unit_multiplier(unit: &str) -> Option<u64> {
    let multiplier = match unit {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => KIB,
        "M" | "MB" | "MIB" => KIB * KIB,
        "G" | "GB" | "GIB" => KIB * KIB * KIB,
        "T" | "TB" | "TIB" => KIB * KIB * KIB * KIB,
        _ => return None,
    };
    Some(multiplier)
}

impl FromStr for ByteSize {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase();
        let split = normalized
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(normalized.len());
        let (digits, unit) = normalized.split_at(split);

        if digits.is_empty() {
            return Err(ParseError::InvalidFormat(s.to_string()));
        }

        let value: u64 = digits.parse()?;
        let multiplier =
            unit_multiplier(unit.trim()).ok_or_else(|| ParseError::InvalidUnit(unit.to_string()))?;

        value
            .checked_mul(multiplier)
            .map(ByteSize)
            .ok_or_else(|| ParseError::Overflow(s.to_string()))
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_human_readable())
    }
}

impl<'de> Deserialize<'de> for ByteSize {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct ByteSizeVisitor;

        impl serde::de::Visitor<'_> for ByteSizeVisitor {
            type Value = ByteSize;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a byte count or a size string such as \"64MB\"")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(ByteSize(v))
            }

            // Environment overrides arrive as signed integers.
            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                u64::try_from(v)
                    .map(ByteSize)
                    .map_err(|_| E::custom(format!("byte size must not be negative: {}", v)))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                v.parse::<ByteSize>().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(ByteSizeVisitor)
    }
}
