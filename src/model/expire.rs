// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Signed expiration specs.
//!
//! Every record carries an expire spec string that decides what happens to
//! its distributed marker:
//!
//! | Spec | Variant | Marker behaviour |
//! |------|---------|------------------|
//! | `X`  | [`ExpireSpec::Once`] | arm in X seconds unless a marker already exists |
//! | `+X` | [`ExpireSpec::Force`] | (re)arm in X seconds, replacing any marker |
//! | `-X` | [`ExpireSpec::Recurring`] | heartbeat: reload from the database every X seconds |
//! | `0`  | [`ExpireSpec::Clear`] | remove any marker, arm nothing |
//!
//! ```
//! use cache_sync::ExpireSpec;
//!
//! let spec: ExpireSpec = "+30".parse().unwrap();
//! assert_eq!(spec, ExpireSpec::Force(30));
//! assert_eq!(spec.ttl_secs(), 30);
//! assert_eq!(spec.to_string(), "+30");
//! ```

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExpireSpecError {
    #[error("expire spec is empty")]
    Empty,
    #[error("invalid expire spec '{0}'")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpireSpec {
    /// `X`: first-wins one-shot marker.
    Once(u64),
    /// `+X`: one-shot marker that always replaces the existing one.
    Force(u64),
    /// `-X`: recurring refresh heartbeat.
    Recurring(u64),
    /// `0`: no marker.
    Clear,
}

impl ExpireSpec {
    pub fn parse(raw: &str) -> Result<Self, ExpireSpecError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ExpireSpecError::Empty);
        }

        let (sign, digits) = match raw.as_bytes()[0] {
            b'+' => (Some('+'), &raw[1..]),
            b'-' => (Some('-'), &raw[1..]),
            _ => (None, raw),
        };

        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ExpireSpecError::Invalid(raw.to_string()));
        }
        let secs: u64 = digits
            .parse()
            .map_err(|_| ExpireSpecError::Invalid(raw.to_string()))?;

        Ok(match (sign, secs) {
            (_, 0) => Self::Clear,
            (Some('+'), secs) => Self::Force(secs),
            (Some('-'), secs) => Self::Recurring(secs),
            (_, secs) => Self::Once(secs),
        })
    }

    /// Marker lifetime in seconds (the magnitude of the spec).
    #[must_use]
    pub fn ttl_secs(&self) -> u64 {
        match self {
            Self::Once(s) | Self::Force(s) | Self::Recurring(s) => *s,
            Self::Clear => 0,
        }
    }

    /// Signed value: positive for write-back, negative for refresh, zero for none.
    #[must_use]
    pub fn value(&self) -> i64 {
        let magnitude = i64::try_from(self.ttl_secs()).unwrap_or(i64::MAX);
        match self {
            Self::Once(_) | Self::Force(_) => magnitude,
            Self::Recurring(_) => -magnitude,
            Self::Clear => 0,
        }
    }

    #[must_use]
    pub fn is_write_back(&self) -> bool {
        matches!(self, Self::Once(_) | Self::Force(_))
    }

    #[must_use]
    pub fn is_refresh(&self) -> bool {
        matches!(self, Self::Recurring(_))
    }
}

impl FromStr for ExpireSpec {
    type Err = ExpireSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ExpireSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Once(s) => write!(f, "{}", s),
            Self::Force(s) => write!(f, "+{}", s),
            Self::Recurring(s) => write!(f, "-{}", s),
            Self::Clear => write!(f, "0"),
        }
    }
}
