//! Dotted `major.minor.patch` versions.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VersionError {
    #[error("not a version: {0:?}")]
    NotAVersion(String),
    #[error("no comparable version in set")]
    NoComparableVersion,
}

/// A parsed version. Ordering is lexicographic over `(major, minor, patch)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl Version {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse exactly three dot-separated non-negative integers.
    ///
    /// Prefixes (`v1.2.3`), suffixes (`1.2.3-beta`), signs and missing
    /// components all yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.split('.');
        let major = parse_component(parts.next()?)?;
        let minor = parse_component(parts.next()?)?;
        let patch = parse_component(parts.next()?)?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self::new(major, minor, patch))
    }
}

fn parse_component(s: &str) -> Option<u64> {
    // u64::from_str accepts a leading '+', so check digits first.
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| VersionError::NotAVersion(s.to_string()))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Greatest parseable version in `versions`.
///
/// Unparseable entries are ignored. An input with no parseable entry is
/// reported as [`VersionError::NoComparableVersion`] and left to the caller.
pub fn max_version<I, S>(versions: I) -> Result<Version, VersionError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    versions
        .into_iter()
        .filter_map(|v| Version::parse(v.as_ref()))
        .max()
        .ok_or(VersionError::NoComparableVersion)
}
