//! Error types shared across lockreplay.
//!
//! Each concern has its own error type living next to the code that raises
//! it. [`Error`] aggregates them so a whole generation run can be driven with
//! `?` and reported with a stable code.

use crate::git_repo::GitRepoError;
use crate::integrity::{Integrity, MalformedIntegrityError};
use crate::lockfile::LockfileParseError;
use crate::manifest::ManifestError;
use crate::transport::TransportError;
use crate::version::InvalidVersionError;
use std::path::PathBuf;
use thiserror::Error;

/// Stable error codes, printed by the CLI and matched on by callers.
pub mod codes {
    pub const INTEGRITY_MALFORMED: &str = "INTEGRITY_MALFORMED";
    pub const INTEGRITY_MISMATCH: &str = "INTEGRITY_MISMATCH";
    pub const VERSION_INVALID: &str = "VERSION_INVALID";
    pub const TRANSPORT_FAILED: &str = "TRANSPORT_FAILED";
    pub const REGISTRY_LOOKUP_FAILED: &str = "REGISTRY_LOOKUP_FAILED";
    pub const LOCKFILE_PARSE: &str = "LOCKFILE_PARSE";
    pub const MANIFEST_DUPLICATE_DEST: &str = "MANIFEST_DUPLICATE_DEST";
    pub const MANIFEST_INVALID_PIN: &str = "MANIFEST_INVALID_PIN";
    pub const MANIFEST_INVALID_DEST: &str = "MANIFEST_INVALID_DEST";
    pub const MANIFEST_MISSING_FILE: &str = "MANIFEST_MISSING_FILE";
    pub const GIT_REPO_FAILED: &str = "GIT_REPO_FAILED";
    pub const IO_ERROR: &str = "IO_ERROR";
}

/// Core error type for lockreplay operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Integrity(#[from] MalformedIntegrityError),

    #[error(transparent)]
    Version(#[from] InvalidVersionError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Lockfile(#[from] LockfileParseError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    GitRepo(#[from] GitRepoError),

    #[error("Registry lookup of '{name}@{version}' at {url} failed: {reason}")]
    RegistryLookup {
        name: String,
        version: String,
        url: String,
        reason: String,
    },

    #[error("Integrity of '{name}' from {origin} is {found}, but the lockfile records {recorded}")]
    IntegrityMismatch {
        name: String,
        origin: String,
        recorded: Integrity,
        found: Integrity,
    },

    #[error("Failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get the stable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Integrity(_) => codes::INTEGRITY_MALFORMED,
            Self::Version(_) => codes::VERSION_INVALID,
            Self::Transport(_) => codes::TRANSPORT_FAILED,
            Self::Lockfile(_) => codes::LOCKFILE_PARSE,
            Self::Manifest(e) => e.code(),
            Self::GitRepo(_) => codes::GIT_REPO_FAILED,
            Self::IntegrityMismatch { .. } => codes::INTEGRITY_MISMATCH,
            Self::RegistryLookup { .. } => codes::REGISTRY_LOOKUP_FAILED,
            Self::Write { .. } | Self::Io(_) => codes::IO_ERROR,
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::DuplicateDestinationError;

    #[test]
    fn test_error_codes_uppercase() {
        let all_codes = [
            codes::INTEGRITY_MALFORMED,
            codes::INTEGRITY_MISMATCH,
            codes::VERSION_INVALID,
            codes::TRANSPORT_FAILED,
            codes::REGISTRY_LOOKUP_FAILED,
            codes::LOCKFILE_PARSE,
            codes::MANIFEST_DUPLICATE_DEST,
            codes::MANIFEST_INVALID_PIN,
            codes::MANIFEST_INVALID_DEST,
            codes::MANIFEST_MISSING_FILE,
            codes::GIT_REPO_FAILED,
            codes::IO_ERROR,
        ];

        for code in all_codes {
            assert!(
                code.chars().all(|c| c.is_uppercase() || c == '_'),
                "Error code '{code}' should be SCREAMING_SNAKE_CASE"
            );
        }
    }

    #[test]
    fn test_code_follows_source() {
        let err: Error = crate::Integrity::parse("md5-AAAA").unwrap_err().into();
        assert_eq!(err.code(), codes::INTEGRITY_MALFORMED);

        let err: Error = ManifestError::from(DuplicateDestinationError {
            destination: "a/b".to_string(),
        })
        .into();
        assert_eq!(err.code(), codes::MANIFEST_DUPLICATE_DEST);
        assert!(err.to_string().contains("a/b"));
    }
}
