//! Lockfile providers.
//!
//! Every supported lockfile dialect is parsed into the same [`Package`]
//! records. The set of dialects is closed: callers pick one through
//! [`LockfileKind`] and drive it through [`LockfileProvider`].
//!
//! - Yarn v1 `yarn.lock` (indented text)
//! - npm `package-lock.json` / `npm-shrinkwrap.json`, lockfile versions 1-3
//! - Cargo `Cargo.lock`

pub mod cargo;
pub mod git;
pub mod npm;
pub mod npmrc;
pub mod scan;
pub mod yarn;

pub use cargo::CargoLockfileProvider;
pub use npm::NpmLockfileProvider;
pub use npmrc::Npmrc;
pub use scan::LockfileSet;
pub use yarn::YarnLockfileProvider;

use crate::integrity::{Integrity, MalformedIntegrityError};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Structurally invalid lockfile input.
#[derive(Error, Debug)]
pub enum LockfileParseError {
    #[error("Failed to read lockfile {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}:{line}: {message}", path.display())]
    Syntax {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("{}: invalid JSON: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{}: invalid TOML: {source}", path.display())]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("{}: {message}", path.display())]
    Structure { path: PathBuf, message: String },

    #[error("Invalid lockfile pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("{}: bad integrity for '{name}': {source}", path.display())]
    Integrity {
        path: PathBuf,
        name: String,
        #[source]
        source: MalformedIntegrityError,
    },
}

impl LockfileParseError {
    pub(crate) fn structure(path: &Path, message: impl Into<String>) -> Self {
        Self::Structure {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }
}

/// A dependency fetched from a resolved URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvedSource {
    /// Download URL, kept verbatim (including any `#fragment`).
    pub resolved: String,
    /// Recorded digest; absent when the dialect did not record one.
    pub integrity: Option<Integrity>,
}

/// A dependency pinned to a version-control commit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GitSource {
    /// The spec exactly as written in the lockfile.
    pub original: String,
    /// Clone URL without the `git+` discriminator or commit fragment.
    pub url: String,
    pub commit: String,
    /// The dependent's requested spec, when the dialect records it.
    pub from: Option<String>,
}

/// A dependency the lockfile pins only by name and version.
///
/// The download URL has to be looked up in the package registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegistrySource {
    /// Recorded digest, cross-checked against the registry's.
    pub integrity: Option<Integrity>,
}

/// A dependency that lives in the source tree (`file:` / `link:`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocalSource {
    pub path: String,
}

/// Where a package comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PackageSource {
    Resolved(ResolvedSource),
    Registry(RegistrySource),
    Git(GitSource),
    Local(LocalSource),
}

/// One node of the locked dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Package {
    /// Lockfile this package was read from.
    pub lockfile: PathBuf,
    pub name: String,
    pub version: String,
    pub source: PackageSource,
}

/// Supported lockfile dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockfileKind {
    Yarn,
    Npm,
    Cargo,
}

impl LockfileKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Yarn => "yarn",
            Self::Npm => "npm",
            Self::Cargo => "cargo",
        }
    }

    /// Guess the dialect from the lockfile's file name.
    #[must_use]
    pub fn detect(path: &Path) -> Option<Self> {
        match path.file_name()?.to_str()? {
            "yarn.lock" => Some(Self::Yarn),
            "package-lock.json" | "npm-shrinkwrap.json" => Some(Self::Npm),
            "Cargo.lock" => Some(Self::Cargo),
            _ => None,
        }
    }
}

impl fmt::Display for LockfileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LockfileKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "yarn" => Ok(Self::Yarn),
            "npm" => Ok(Self::Npm),
            "cargo" => Ok(Self::Cargo),
            other => Err(format!(
                "unknown lockfile kind '{other}' (expected yarn, npm or cargo)"
            )),
        }
    }
}

/// Options shared by the providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderOptions {
    /// Keep packages only needed for development (npm `dev: true`).
    pub include_dev: bool,
}

impl Default for ProviderOptions {
    fn default() -> Self {
        Self { include_dev: true }
    }
}

/// A lockfile parser for one dialect.
#[derive(Debug, Clone)]
pub enum LockfileProvider {
    Yarn(YarnLockfileProvider),
    Npm(NpmLockfileProvider),
    Cargo(CargoLockfileProvider),
}

impl LockfileProvider {
    /// Provider for `kind`.
    #[must_use]
    pub fn new(kind: LockfileKind, options: ProviderOptions) -> Self {
        match kind {
            LockfileKind::Yarn => Self::Yarn(YarnLockfileProvider),
            LockfileKind::Npm => Self::Npm(NpmLockfileProvider::new(options.include_dev)),
            LockfileKind::Cargo => Self::Cargo(CargoLockfileProvider),
        }
    }

    #[must_use]
    pub fn kind(&self) -> LockfileKind {
        match self {
            Self::Yarn(_) => LockfileKind::Yarn,
            Self::Npm(_) => LockfileKind::Npm,
            Self::Cargo(_) => LockfileKind::Cargo,
        }
    }

    /// Read and parse the lockfile at `path`.
    ///
    /// Packages come back in first-appearance order. The whole file is parsed
    /// before anything is returned, so a syntax error anywhere yields no
    /// packages at all.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is not valid for this
    /// dialect.
    pub fn process_lockfile(&self, path: &Path) -> Result<Vec<Package>, LockfileParseError> {
        let content = fs::read_to_string(path).map_err(|e| LockfileParseError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;

        let packages = self.parse(path, &content)?;
        tracing::info!(
            lockfile = %path.display(),
            kind = %self.kind(),
            packages = packages.len(),
            "parsed lockfile"
        );
        Ok(packages)
    }

    /// Parse lockfile `content` that was read from `path`.
    ///
    /// # Errors
    /// Returns an error if the content is not valid for this dialect.
    pub fn parse(&self, path: &Path, content: &str) -> Result<Vec<Package>, LockfileParseError> {
        match self {
            Self::Yarn(p) => p.parse(path, content),
            Self::Npm(p) => p.parse(path, content),
            Self::Cargo(p) => p.parse(path, content),
        }
    }
}

/// Parse an SRI string that may list several digests separated by spaces.
///
/// The first entry is used.
pub(crate) fn parse_integrity_field(
    path: &Path,
    name: &str,
    value: &str,
) -> Result<Integrity, LockfileParseError> {
    let first = value.split_whitespace().next().unwrap_or_default();
    Integrity::parse(first).map_err(|source| LockfileParseError::Integrity {
        path: path.to_path_buf(),
        name: name.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_kind_detect() {
        assert_eq!(LockfileKind::detect(Path::new("a/yarn.lock")), Some(LockfileKind::Yarn));
        assert_eq!(
            LockfileKind::detect(Path::new("package-lock.json")),
            Some(LockfileKind::Npm)
        );
        assert_eq!(
            LockfileKind::detect(Path::new("npm-shrinkwrap.json")),
            Some(LockfileKind::Npm)
        );
        assert_eq!(LockfileKind::detect(Path::new("Cargo.lock")), Some(LockfileKind::Cargo));
        assert_eq!(LockfileKind::detect(Path::new("pnpm-lock.yaml")), None);
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("npm".parse::<LockfileKind>().unwrap(), LockfileKind::Npm);
        assert!("pnpm".parse::<LockfileKind>().is_err());
        assert_eq!(LockfileKind::Cargo.to_string(), "cargo");
    }

    #[test]
    fn test_process_missing_file() {
        let provider = LockfileProvider::new(LockfileKind::Yarn, ProviderOptions::default());
        let err = provider
            .process_lockfile(Path::new("/nonexistent/yarn.lock"))
            .unwrap_err();
        assert!(matches!(err, LockfileParseError::Read { .. }));
    }

    #[test]
    fn test_process_reads_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "left-pad@^1.3.0:\n  version \"1.3.0\"\n  resolved \"https://registry.yarnpkg.com/left-pad/-/left-pad-1.3.0.tgz\"\n"
        )
        .unwrap();
        file.flush().unwrap();

        let provider = LockfileProvider::new(LockfileKind::Yarn, ProviderOptions::default());
        let packages = provider.process_lockfile(file.path()).unwrap();

        assert_eq!(packages.len(), 1);
        assert_eq!(packages[0].name, "left-pad");
        assert_eq!(packages[0].lockfile, file.path());
        assert_eq!(provider.kind(), LockfileKind::Yarn);
    }

    #[test]
    fn test_multi_hash_integrity_field_uses_first() {
        let sha512 = Integrity::generate(b"x", crate::Algorithm::Sha512);
        let sha1 = Integrity::generate(b"x", crate::Algorithm::Sha1);
        let field = format!("{sha512} {sha1}");

        let parsed = parse_integrity_field(Path::new("l"), "x", &field).unwrap();
        assert_eq!(parsed, sha512);
    }
}
