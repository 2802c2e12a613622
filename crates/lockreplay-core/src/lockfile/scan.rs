//! Finding every lockfile of a project.

use super::LockfileParseError;
use std::io;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// The lockfiles of one generation run, with the directory they are
/// reported relative to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockfileSet {
    root: PathBuf,
    lockfiles: Vec<PathBuf>,
}

impl LockfileSet {
    /// A run over `lockfile` alone.
    #[must_use]
    pub fn single(lockfile: impl Into<PathBuf>) -> Self {
        let lockfile = lockfile.into();
        Self {
            root: parent_dir(&lockfile),
            lockfiles: vec![lockfile],
        }
    }

    /// Every file named like `base` in the tree below `base`'s directory.
    ///
    /// With `patterns`, a lockfile is kept only if one of the glob patterns
    /// matches the end of its path (`packages/*/package-lock.json`).
    /// `node_modules` and `.git` directories are not entered.
    ///
    /// # Errors
    /// Returns an error if a pattern is invalid, the tree cannot be walked,
    /// or no lockfile is found.
    pub fn scan(base: &Path, patterns: &[String]) -> Result<Self, LockfileParseError> {
        let patterns = patterns
            .iter()
            .map(|p| {
                glob::Pattern::new(p).map_err(|source| LockfileParseError::Pattern {
                    pattern: p.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let Some(file_name) = base.file_name() else {
            return Err(LockfileParseError::structure(base, "not a lockfile path"));
        };

        let root = parent_dir(base);
        let walk_root = if root.as_os_str().is_empty() {
            Path::new(".")
        } else {
            root.as_path()
        };

        let mut lockfiles = Vec::new();
        let walker = WalkDir::new(walk_root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                let name = e.file_name().to_string_lossy();
                !matches!(name.as_ref(), "node_modules" | ".git")
            });

        for entry in walker {
            let entry = entry.map_err(|e| LockfileParseError::Read {
                path: e.path().unwrap_or(walk_root).to_path_buf(),
                source: io::Error::from(e),
            })?;
            if !entry.file_type().is_file() || entry.file_name() != file_name {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(walk_root).unwrap_or(path);
            if patterns.is_empty() || patterns.iter().any(|p| matches_tail(p, relative)) {
                tracing::debug!(lockfile = %path.display(), "found lockfile");
                lockfiles.push(path.to_path_buf());
            }
        }

        if lockfiles.is_empty() {
            return Err(LockfileParseError::Read {
                path: base.to_path_buf(),
                source: io::Error::new(io::ErrorKind::NotFound, "no matching lockfile"),
            });
        }

        Ok(Self {
            root: walk_root.to_path_buf(),
            lockfiles,
        })
    }

    /// Directory the lockfiles are reported relative to.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn lockfiles(&self) -> &[PathBuf] {
        &self.lockfiles
    }

    /// Directory of `lockfile` relative to [`root`](Self::root), empty for
    /// the root itself.
    #[must_use]
    pub fn relative_dir(&self, lockfile: &Path) -> PathBuf {
        let dir = parent_dir(lockfile);
        dir.strip_prefix(&self.root)
            .unwrap_or(&dir)
            .components()
            .filter(|c| !matches!(c, Component::CurDir))
            .collect()
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    path.parent().map(Path::to_path_buf).unwrap_or_default()
}

/// Match `pattern` against the trailing components of `path`.
fn matches_tail(pattern: &glob::Pattern, path: &Path) -> bool {
    let components: Vec<_> = path
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();

    let options = glob::MatchOptions {
        require_literal_separator: true,
        ..glob::MatchOptions::new()
    };
    (0..components.len()).any(|start| pattern.matches_with(&components[start..].join("/"), options))
}
