//! Version tokens.
//!
//! Dotted-numeric versions with an optional pre-release suffix, e.g.
//! `1.2.13` or `2.0.0-rc.1`. Ordering is componentwise numeric; a release
//! orders after any pre-release of the same numeric core.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("empty version string")]
    Empty,

    #[error("invalid version component {0:?}")]
    InvalidComponent(String),
}

/// A parsed version: numeric components plus an optional pre-release tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    parts: Vec<u64>,
    pre: Option<String>,
}

impl Version {
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(VersionError::Empty);
        }

        let (core, pre) = match s.split_once('-') {
            Some((core, pre)) => (core, Some(pre.to_string())),
            None => (s, None),
        };

        let mut parts = Vec::new();
        for piece in core.split('.') {
            let n: u64 = piece
                .parse()
                .map_err(|_| VersionError::InvalidComponent(piece.to_string()))?;
            parts.push(n);
        }

        Ok(Self { parts, pre })
    }

    /// Numeric component at `idx`, treating missing components as zero.
    pub fn part(&self, idx: usize) -> u64 {
        self.parts.get(idx).copied().unwrap_or(0)
    }

    /// Number of components actually written (`1.2` has two).
    pub fn precision(&self) -> usize {
        self.parts.len()
    }

    pub fn pre_release(&self) -> Option<&str> {
        self.pre.as_deref()
    }

    pub fn is_pre_release(&self) -> bool {
        self.pre.is_some()
    }

    /// The smallest version greater than every `self.x.y...` with the
    /// component at `idx` bumped and the rest dropped: `1.2.3`.bump(1) = `1.3`.
    pub fn bumped(&self, idx: usize) -> Version {
        let mut parts: Vec<u64> = (0..=idx).map(|i| self.part(i)).collect();
        *parts.last_mut().expect("0..=idx is never empty") += 1;
        Version { parts, pre: None }
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.parts.len().max(other.parts.len());
        for i in 0..len {
            match self.part(i).cmp(&other.part(i)) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }

        // Same numeric core: release > pre-release, then suffix segments.
        match (&self.pre, &other.pre) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => compare_pre(a, b),
        }
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Dot-split pre-release comparison: numeric segments compare numerically,
/// numeric orders before alphanumeric, otherwise byte order.
fn compare_pre(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) => {
                let ord = match (l.parse::<u64>(), r.parse::<u64>()) {
                    (Ok(ln), Ok(rn)) => ln.cmp(&rn),
                    (Ok(_), Err(_)) => Ordering::Less,
                    (Err(_), Ok(_)) => Ordering::Greater,
                    (Err(_), Err(_)) => l.cmp(r),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self
            .parts
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(".");
        match &self.pre {
            Some(pre) => write!(f, "{core}-{pre}"),
            None => write!(f, "{core}"),
        }
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Version {
    type Error = VersionError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Version> for String {
    fn from(v: Version) -> Self {
        v.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_parse_roundtrip() {
        assert_eq!(v("1.2.13").to_string(), "1.2.13");
        assert_eq!(v("2.0.0-rc.1").to_string(), "2.0.0-rc.1");
        assert_eq!(v("7").to_string(), "7");
    }

    #[test]
    fn test_parse_invalid() {
        assert!(Version::parse("").is_err());
        assert!(Version::parse("1.x.3").is_err());
        assert!(Version::parse("abc").is_err());
    }

    #[test]
    fn test_numeric_ordering() {
        assert!(v("1.2.13") > v("1.2.11"));
        assert!(v("1.10") > v("1.9"));
        assert!(v("2") > v("1.99.99"));
        assert_eq!(v("1.2"), v("1.2"));
    }

    #[test]
    fn test_missing_components_are_zero() {
        assert_eq!(v("1.2").cmp(&v("1.2.0")), Ordering::Equal);
        assert!(v("1.2.1") > v("1.2"));
    }

    #[test]
    fn test_pre_release_orders_before_release() {
        assert!(v("1.0.0-rc.1") < v("1.0.0"));
        assert!(v("1.0.0-alpha") < v("1.0.0-beta"));
        assert!(v("1.0.0-rc.2") > v("1.0.0-rc.1"));
        assert!(v("1.0.0-rc.10") > v("1.0.0-rc.9"));
    }

    #[test]
    fn test_bumped() {
        assert_eq!(v("1.2.3").bumped(1), v("1.3"));
        assert_eq!(v("1.2.3").bumped(2), v("1.2.4"));
        assert_eq!(v("1").bumped(0), v("2"));
    }
}
