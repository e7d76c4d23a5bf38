//! Firmware version ordering.
//!
//! Device firmware strings are not fixed-width, so plain string comparison
//! puts `1.10.0` before `1.9.0`. `FirmwareVersion` orders them instead by
//! dotted segments:
//!
//! - numeric segments compare by value (`1.10` > `1.9`, `01` == `1`)
//! - a numeric segment sorts before a non-numeric one; non-numeric segments
//!   compare as plain strings
//! - missing trailing segments count as `0`, so `1.0` == `1.0.0`
//! - a pre-release suffix after `-` sorts before the release it belongs to
//!   (`1.0.0-rc1` < `1.0.0`)
//! - a leading `v` is ignored and `+build` metadata does not take part
//!
//! The result is a total order, so a range `[min, max]` is well defined for
//! any pair of strings. A blank bound leaves that side of the range open.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One dotted component of a version string.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    /// Digits with leading zeros stripped (`"0"` for zero).
    Numeric(String),
    Text(String),
}

impl Segment {
    fn parse(raw: &str) -> Self {
        if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) {
            let trimmed = raw.trim_start_matches('0');
            let digits = if trimmed.is_empty() { "0" } else { trimmed };
            Segment::Numeric(digits.to_string())
        } else {
            Segment::Text(raw.to_string())
        }
    }

    fn zero() -> Self {
        Segment::Numeric("0".to_string())
    }
}

impl Ord for Segment {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            // Without leading zeros, more digits means a larger number.
            (Segment::Numeric(a), Segment::Numeric(b)) => {
                a.len().cmp(&b.len()).then_with(|| a.cmp(b))
            }
            (Segment::Numeric(_), Segment::Text(_)) => Ordering::Less,
            (Segment::Text(_), Segment::Numeric(_)) => Ordering::Greater,
            (Segment::Text(a), Segment::Text(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for Segment {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A firmware version string with a total order.
///
/// Equality follows the ordering, so two spellings of the same version
/// (`1.0` and `1.0.0`) are equal while `as_str` keeps the original text.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct FirmwareVersion {
    raw: String,
    release: Vec<Segment>,
    pre_release: Option<Vec<Segment>>,
}

impl FirmwareVersion {
    /// Parse a version string. Every string is accepted.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        let body = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);
        let body = body.split_once('+').map_or(body, |(version, _build)| version);

        let (release, pre_release) = match body.split_once('-') {
            Some((release, pre)) => (release, Some(pre)),
            None => (body, None),
        };

        Self {
            raw: raw.to_string(),
            release: release.split('.').map(Segment::parse).collect(),
            pre_release: pre_release.map(|pre| pre.split('.').map(Segment::parse).collect()),
        }
    }

    /// The version exactly as it was supplied.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    fn cmp_release(&self, other: &Self) -> Ordering {
        let len = self.release.len().max(other.release.len());
        let zero = Segment::zero();
        for i in 0..len {
            let a = self.release.get(i).unwrap_or(&zero);
            let b = other.release.get(i).unwrap_or(&zero);
            match a.cmp(b) {
                Ordering::Equal => continue,
                unequal => return unequal,
            }
        }
        Ordering::Equal
    }
}

impl Ord for FirmwareVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_release(other)
            .then_with(|| match (&self.pre_release, &other.pre_release) {
                (None, None) => Ordering::Equal,
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some(a), Some(b)) => a.cmp(b),
            })
    }
}

impl PartialOrd for FirmwareVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for FirmwareVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FirmwareVersion {}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl From<&str> for FirmwareVersion {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

impl From<String> for FirmwareVersion {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<FirmwareVersion> for String {
    fn from(version: FirmwareVersion) -> Self {
        version.raw
    }
}

/// The range was supplied upside down.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("firmware range is empty: min {min} is above max {max}")]
pub struct FirmwareRangeError {
    pub min: String,
    pub max: String,
}

/// Inclusive firmware range `[min, max]`; `None` is an open side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareRange {
    min: Option<FirmwareVersion>,
    max: Option<FirmwareVersion>,
}

fn bound(raw: &str) -> Option<FirmwareVersion> {
    if raw.trim().is_empty() {
        None
    } else {
        Some(FirmwareVersion::parse(raw))
    }
}

fn bound_str(bound: &Option<FirmwareVersion>) -> &str {
    bound.as_ref().map_or("*", |v| v.as_str())
}

impl FirmwareRange {
    /// Build a range, rejecting `min > max`. A blank bound is open.
    pub fn new(min: &str, max: &str) -> Result<Self, FirmwareRangeError> {
        let min = bound(min);
        let max = bound(max);
        if let (Some(lo), Some(hi)) = (&min, &max) {
            if lo > hi {
                return Err(FirmwareRangeError {
                    min: lo.raw.clone(),
                    max: hi.raw.clone(),
                });
            }
        }
        Ok(Self { min, max })
    }

    /// Lower bound, if any.
    pub fn min(&self) -> Option<&FirmwareVersion> {
        self.min.as_ref()
    }

    /// Upper bound, if any.
    pub fn max(&self) -> Option<&FirmwareVersion> {
        self.max.as_ref()
    }

    /// True if `version` lies within the range, bounds included.
    pub fn contains(&self, version: &FirmwareVersion) -> bool {
        self.min.as_ref().map_or(true, |min| version >= min)
            && self.max.as_ref().map_or(true, |max| version <= max)
    }
}

impl fmt::Display for FirmwareRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}–{}", bound_str(&self.min), bound_str(&self.max))
    }
}
