//! Component versions and their ordering.
//!
//! A [`Version`] keeps the string it was parsed from and a sort key derived
//! from it. The key splits the string on `.`, `-`, `+` and `_`; numeric
//! pieces compare as numbers, everything else compares as text, and a
//! numeric piece sorts before a textual one at the same position.
//!
//! | Versions             | Order                       |
//! |----------------------|-----------------------------|
//! | `1.9` / `1.10`       | `1.9 < 1.10`                |
//! | `2.0` / `2.0.1`      | `2.0 < 2.0.1`               |
//! | `1.0.0` / `1.0.rc1`  | `1.0.0 < 1.0.rc1`           |

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors from parsing a version string.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("version string is empty")]
    Empty,

    #[error("version {0:?} contains whitespace")]
    Whitespace(String),
}

/// One piece of a version's sort key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum Segment {
    Number(u64),
    Text(String),
}

/// A single component version, totally ordered within its component.
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    raw: String,
    key: Vec<Segment>,
}

impl Version {
    /// Parse a version string.
    pub fn parse(raw: &str) -> Result<Self, VersionError> {
        if raw.is_empty() {
            return Err(VersionError::Empty);
        }
        if raw.chars().any(char::is_whitespace) {
            return Err(VersionError::Whitespace(raw.to_string()));
        }

        let key = raw
            .split(['.', '-', '+', '_'])
            .filter(|piece| !piece.is_empty())
            .map(|piece| match piece.parse::<u64>() {
                Ok(n) => Segment::Number(n),
                Err(_) => Segment::Text(piece.to_string()),
            })
            .collect();

        Ok(Self {
            raw: raw.to_string(),
            key,
        })
    }

    /// The string this version was parsed from.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for Version {}

impl std::hash::Hash for Version {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        // Raw tie-break keeps Ord consistent with Eq ("1.0" vs "1.00").
        self.key
            .cmp(&other.key)
            .then_with(|| self.raw.cmp(&other.raw))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
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

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Version> for String {
    fn from(version: Version) -> Self {
        version.raw
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Version({})", self.raw)
    }
}

/// Render an axis value, where `None` means the component is absent.
pub fn display_pin(pin: Option<&Version>) -> String {
    match pin {
        Some(version) => version.to_string(),
        None => "<absent>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_numeric_segments_compare_numerically() {
        assert!(v("1.9") < v("1.10"));
        assert!(v("1.10") < v("2"));
        assert!(v("0.9.9") < v("0.10.0"));
    }

    #[test]
    fn test_longer_version_sorts_after_prefix() {
        assert!(v("2.0") < v("2.0.1"));
    }

    #[test]
    fn test_number_sorts_before_text() {
        assert!(v("1.0.0") < v("1.0.rc1"));
    }

    #[test]
    fn test_ord_consistent_with_eq() {
        let a = v("1.0");
        let b = v("1.00");
        assert_ne!(a, b);
        assert_ne!(a.cmp(&b), Ordering::Equal);
        assert_eq!(a.cmp(&a.clone()), Ordering::Equal);
    }

    #[test]
    fn test_rejects_empty_and_whitespace() {
        assert_eq!(Version::parse(""), Err(VersionError::Empty));
        assert!(matches!(
            Version::parse("1.0 beta"),
            Err(VersionError::Whitespace(_))
        ));
    }

    #[test]
    fn test_serde_as_plain_string() {
        let json = serde_json::to_string(&v("3.2.1")).unwrap();
        assert_eq!(json, "\"3.2.1\"");
        let back: Version = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v("3.2.1"));
        assert!(serde_json::from_str::<Version>("\"\"").is_err());
    }

    #[test]
    fn test_display_pin() {
        assert_eq!(display_pin(Some(&v("1.2"))), "1.2");
        assert_eq!(display_pin(None), "<absent>");
    }
}
