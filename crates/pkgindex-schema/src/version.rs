//! Schema versions and package version ordering.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid schema version '{0}', expected '<major>.<minor>'")]
pub struct ParseSchemaVersionError(pub String);

/// Feature level of an index file or a REST contract.
///
/// Ordered by `(major, minor)`. Each minor version within a major is an
/// additive step over the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SchemaVersion {
    pub major: u32,
    pub minor: u32,
}

impl SchemaVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for SchemaVersion {
    type Err = ParseSchemaVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseSchemaVersionError(s.to_owned());
        let (major, minor) = s.trim().split_once('.').ok_or_else(err)?;
        Ok(Self {
            major: major.parse().map_err(|_| err())?,
            minor: minor.parse().map_err(|_| err())?,
        })
    }
}

/// One dot-separated component of a package version: a leading integer and
/// whatever text follows it (`"3rc1"` is `(3, "rc1")`).
#[derive(Debug, Clone, PartialEq, Eq)]
struct Part {
    integer: u64,
    other: String,
}

impl Part {
    fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        let split = raw
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(raw.len());
        let (digits, other) = raw.split_at(split);
        Self {
            integer: digits.parse().unwrap_or(0),
            other: other.to_lowercase(),
        }
    }

    fn is_zero(&self) -> bool {
        self.integer == 0 && self.other.is_empty()
    }
}

impl Ord for Part {
    fn cmp(&self, other: &Self) -> Ordering {
        self.integer.cmp(&other.integer).then_with(|| {
            // A bare number sorts after the same number with a suffix: 1.0 > 1.0-beta
            match (self.other.is_empty(), other.other.is_empty()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => self.other.cmp(&other.other),
            }
        })
    }
}

impl PartialOrd for Part {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A package version string with dotted, numeric-aware ordering.
///
/// `1.0 == 1.0.0 < 1.0.1 < 1.2 < 1.10`. The original text is preserved for
/// display and storage; comparisons use the parsed parts.
#[derive(Debug, Clone)]
pub struct Version {
    raw: String,
    parts: Vec<Part>,
}

impl Version {
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let mut parts: Vec<Part> = raw.split('.').map(Part::parse).collect();
        while parts.last().is_some_and(Part::is_zero) {
            parts.pop();
        }
        Self { raw, parts }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_empty(&self) -> bool {
        self.raw.trim().is_empty()
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let zero = Part {
            integer: 0,
            other: String::new(),
        };
        let len = self.parts.len().max(other.parts.len());
        for i in 0..len {
            let a = self.parts.get(i).unwrap_or(&zero);
            let b = other.parts.get(i).unwrap_or(&zero);
            match a.cmp(b) {
                Ordering::Equal => {}
                unequal => return unequal,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for part in &self.parts {
            part.integer.hash(state);
            part.other.hash(state);
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl From<&str> for Version {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Version {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::new(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_version_orders_by_major_then_minor() {
        assert!(SchemaVersion::new(1, 0) < SchemaVersion::new(1, 3));
        assert!(SchemaVersion::new(1, 9) < SchemaVersion::new(2, 0));
        assert_eq!(SchemaVersion::new(1, 2), SchemaVersion::new(1, 2));
    }

    #[test]
    fn schema_version_parse_and_display() {
        let v: SchemaVersion = "1.3".parse().unwrap();
        assert_eq!(v, SchemaVersion::new(1, 3));
        assert_eq!(v.to_string(), "1.3");
        assert!("1".parse::<SchemaVersion>().is_err());
        assert!("a.b".parse::<SchemaVersion>().is_err());
    }

    #[test]
    fn version_numeric_parts_compare_numerically() {
        assert!(Version::new("1.2") < Version::new("1.10"));
        assert!(Version::new("1.0.1") > Version::new("1.0"));
        assert!(Version::new("2") > Version::new("1.99.99"));
    }

    #[test]
    fn version_trailing_zeros_are_equal() {
        assert_eq!(Version::new("1.0"), Version::new("1.0.0"));
        assert_eq!(Version::new("1"), Version::new("1.0.0.0"));
    }

    #[test]
    fn version_suffix_sorts_before_release() {
        assert!(Version::new("1.0-beta") < Version::new("1.0"));
        assert!(Version::new("1.0alpha") < Version::new("1.0beta"));
        assert_eq!(Version::new("1.0RC"), Version::new("1.0rc"));
    }

    #[test]
    fn version_keeps_raw_text() {
        let v = Version::new("1.0.0");
        assert_eq!(v.to_string(), "1.0.0");
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, "\"1.0.0\"");
    }
}
