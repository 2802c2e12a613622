//! `Cargo.lock` parser.

use super::git::repo_name;
use super::{GitSource, LockfileParseError, Package, PackageSource, ResolvedSource};
use crate::integrity::{Algorithm, Integrity};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Download endpoint for crates.io crates.
pub const CRATES_IO_DOWNLOAD: &str = "https://static.crates.io/crates";

const CRATES_IO_SOURCES: &[&str] = &[
    "registry+https://github.com/rust-lang/crates.io-index",
    "sparse+https://index.crates.io/",
];

#[derive(Debug, Deserialize)]
struct CargoLock {
    #[serde(default)]
    package: Vec<LockedCrate>,
    /// Checksums of lockfile format v1, keyed `checksum <name> <version> (<source>)`.
    #[serde(default)]
    metadata: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct LockedCrate {
    name: String,
    version: String,
    source: Option<String>,
    checksum: Option<String>,
}

/// Parser for Cargo lockfiles.
#[derive(Debug, Clone, Copy, Default)]
pub struct CargoLockfileProvider;

impl CargoLockfileProvider {
    /// Parse `content`, reporting errors against `path`.
    ///
    /// Path dependencies (no `source`) are part of the workspace and are
    /// skipped.
    ///
    /// # Errors
    /// Returns an error if the content is not TOML, names an unsupported
    /// registry, or carries a malformed checksum.
    pub fn parse(&self, path: &Path, content: &str) -> Result<Vec<Package>, LockfileParseError> {
        let lock: CargoLock = toml::from_str(content).map_err(|e| LockfileParseError::Toml {
            path: path.to_path_buf(),
            source: e,
        })?;

        let mut packages = Vec::new();
        for krate in &lock.package {
            let Some(source) = &krate.source else {
                tracing::debug!(name = %krate.name, "skipping path crate");
                continue;
            };

            let source = if source.starts_with("git+") {
                PackageSource::Git(parse_git_source(path, &krate.name, source)?)
            } else if CRATES_IO_SOURCES.contains(&source.as_str()) {
                let checksum = krate.checksum.clone().or_else(|| {
                    let key = format!("checksum {} {} ({source})", krate.name, krate.version);
                    lock.metadata.get(&key).cloned()
                });
                let integrity = checksum
                    .map(|hex| {
                        Integrity::from_hex(Algorithm::Sha256, &hex).map_err(|e| {
                            LockfileParseError::Integrity {
                                path: path.to_path_buf(),
                                name: krate.name.clone(),
                                source: e,
                            }
                        })
                    })
                    .transpose()?;

                PackageSource::Resolved(ResolvedSource {
                    resolved: crate_download_url(&krate.name, &krate.version),
                    integrity,
                })
            } else {
                return Err(LockfileParseError::structure(
                    path,
                    format!("crate '{}' uses unsupported registry {source}", krate.name),
                ));
            };

            tracing::debug!(name = %krate.name, version = %krate.version, "cargo package");
            packages.push(Package {
                lockfile: path.to_path_buf(),
                name: krate.name.clone(),
                version: krate.version.clone(),
                source,
            });
        }

        Ok(packages)
    }
}

/// crates.io download URL for one crate version.
#[must_use]
pub fn crate_download_url(name: &str, version: &str) -> String {
    format!("{CRATES_IO_DOWNLOAD}/{name}/{name}-{version}.crate")
}

/// `git+<url>?<query>#<commit>` with the query and fragment removed from the URL.
fn parse_git_source(path: &Path, name: &str, source: &str) -> Result<GitSource, LockfileParseError> {
    let unpinned = || {
        LockfileParseError::structure(path, format!("crate '{name}' has an unpinned git source"))
    };

    let rest = source.strip_prefix("git+").ok_or_else(unpinned)?;
    let (location, commit) = rest.rsplit_once('#').ok_or_else(unpinned)?;
    if commit.is_empty() {
        return Err(unpinned());
    }
    let url = location.split_once('?').map_or(location, |(url, _)| url);

    if repo_name(url).is_empty() {
        return Err(LockfileParseError::structure(
            path,
            format!("crate '{name}' has a git source without a repository name"),
        ));
    }

    Ok(GitSource {
        original: source.to_string(),
        url: url.to_string(),
        commit: commit.to_string(),
        from: None,
    })
}
