//! Semantic versions with SemVer 2.0 precedence.
//!
//! Parsing is delegated to the `semver` crate. Equality, ordering and hashing
//! are redefined here so that build metadata never takes part in them;
//! `semver::Version` itself breaks ties on build metadata.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use thiserror::Error;

/// A version string that does not match `MAJOR.MINOR.PATCH[-PRE][+BUILD]`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid version '{input}': {reason}")]
pub struct InvalidVersionError {
    pub input: String,
    pub reason: String,
}

/// A parsed semantic version.
#[derive(Debug, Clone)]
pub struct Version {
    inner: semver::Version,
}

impl Version {
    /// Parse a version string.
    pub fn parse(text: &str) -> Result<Self, InvalidVersionError> {
        semver::Version::parse(text)
            .map(|inner| Self { inner })
            .map_err(|e| InvalidVersionError {
                input: text.to_string(),
                reason: e.to_string(),
            })
    }

    #[must_use]
    pub fn major(&self) -> u64 {
        self.inner.major
    }

    #[must_use]
    pub fn minor(&self) -> u64 {
        self.inner.minor
    }

    #[must_use]
    pub fn patch(&self) -> u64 {
        self.inner.patch
    }

    #[must_use]
    pub fn is_prerelease(&self) -> bool {
        !self.inner.pre.is_empty()
    }

    /// Prerelease identifiers, empty for a release.
    #[must_use]
    pub fn prerelease(&self) -> &str {
        self.inner.pre.as_str()
    }

    /// Build metadata, empty when absent.
    #[must_use]
    pub fn build(&self) -> &str {
        self.inner.build.as_str()
    }

    fn precedence_key(&self) -> (u64, u64, u64, &semver::Prerelease) {
        (
            self.inner.major,
            self.inner.minor,
            self.inner.patch,
            &self.inner.pre,
        )
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.precedence_key() == other.precedence_key()
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        // `Prerelease` orders the empty prerelease above any non-empty one and
        // compares identifiers numerically or lexically as SemVer requires.
        self.precedence_key().cmp(&other.precedence_key())
    }
}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.precedence_key().hash(state);
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.fmt(f)
    }
}

impl FromStr for Version {
    type Err = InvalidVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
