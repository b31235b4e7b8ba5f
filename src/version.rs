// Copyright 2025 Cowboy AI, LLC.

//! Semantic schema versions for event payload evolution
//!
//! Every event payload shape is identified by a `major.minor.patch` version.
//! Versions order lexicographically over (major, minor, patch); two versions
//! are compatible when their majors match.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors produced while parsing a schema version string
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionParseError {
    /// The string did not have the `major.minor.patch` shape
    #[error("invalid version format: {0:?} (expected \"major.minor.patch\")")]
    InvalidFormat(String),

    /// One of the dotted parts was not a non-negative integer
    #[error("invalid {part} component in version {input:?}")]
    InvalidComponent {
        /// Which component failed to parse
        part: &'static str,
        /// The full input string
        input: String,
    },
}

/// A semantic version identifying an event payload schema
///
/// Ordering is lexicographic over (major, minor, patch), so the derived
/// [`Ord`] is exactly the comparison contract the registry relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SchemaVersion {
    /// Breaking-change counter; equal majors are wire-compatible
    pub major: u32,
    /// Additive-change counter
    pub minor: u32,
    /// Fix counter, no payload shape change
    pub patch: u32,
}

impl SchemaVersion {
    /// Create a version from its components
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// The default version stamped on events whose type has no registered schema
    pub const fn initial() -> Self {
        Self::new(1, 0, 0)
    }

    /// Two versions are compatible iff their major components match
    pub fn is_compatible_with(&self, other: &SchemaVersion) -> bool {
        self.major == other.major
    }
}

impl Default for SchemaVersion {
    fn default() -> Self {
        Self::initial()
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for SchemaVersion {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('.');
        let (major, minor, patch) = match (parts.next(), parts.next(), parts.next(), parts.next())
        {
            (Some(major), Some(minor), Some(patch), None) => (major, minor, patch),
            _ => return Err(VersionParseError::InvalidFormat(s.to_string())),
        };

        let parse = |part: &'static str, raw: &str| {
            raw.parse::<u32>()
                .map_err(|_| VersionParseError::InvalidComponent {
                    part,
                    input: s.to_string(),
                })
        };

        Ok(Self {
            major: parse("major", major)?,
            minor: parse("minor", minor)?,
            patch: parse("patch", patch)?,
        })
    }
}

impl Serialize for SchemaVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SchemaVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
