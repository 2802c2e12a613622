//! Reading crates out of git repositories at generation time.
//!
//! A git dependency in a Cargo.lock names a repository and a crate, not the
//! directory the crate lives in. The repository is checked out once per
//! commit so its workspace can be searched for the crate.

pub mod workspace;

pub use workspace::{discover_crates, GitCrate};

use crate::lockfile::git::repo_name;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

/// Errors raised while checking out or inspecting a repository.
#[derive(Error, Debug)]
pub enum GitRepoError {
    #[error("Failed to run git: {0}")]
    Spawn(#[source] io::Error),

    #[error("`git {args}` failed: {stderr}")]
    Command { args: String, stderr: String },

    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{}: invalid Cargo.toml: {source}", path.display())]
    Manifest {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to encode Cargo.toml of '{name}': {source}")]
    Encode {
        name: String,
        #[source]
        source: toml::ser::Error,
    },

    #[error("No crate named '{name}' in {url} at {commit}")]
    CrateNotFound {
        name: String,
        url: String,
        commit: String,
    },
}

/// Provides working trees of repositories.
pub trait GitCheckouts: Send + Sync + fmt::Debug {
    /// A directory holding `url` checked out at `commit`.
    fn checkout(&self, url: &str, commit: &str) -> Result<PathBuf, GitRepoError>;
}

/// Checkouts made with the `git` command line under one directory.
///
/// Each commit gets its own directory, so a finished checkout is reused by
/// later runs.
#[derive(Debug, Clone)]
pub struct GitCli {
    root: PathBuf,
}

impl GitCli {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl GitCheckouts for GitCli {
    fn checkout(&self, url: &str, commit: &str) -> Result<PathBuf, GitRepoError> {
        let dir = self.root.join(format!("{}-{commit}", repo_name(url)));

        if dir.join(".git").is_dir() {
            if let Ok(head) = git(&dir, &["rev-parse", "HEAD"]) {
                if head.trim() == commit {
                    tracing::debug!(url, commit, "reusing checkout");
                    return Ok(dir);
                }
            }
        }

        if dir.exists() {
            std::fs::remove_dir_all(&dir).map_err(|e| GitRepoError::Read {
                path: dir.clone(),
                source: e,
            })?;
        }
        std::fs::create_dir_all(&dir).map_err(|e| GitRepoError::Read {
            path: dir.clone(),
            source: e,
        })?;

        tracing::info!(url, commit, "checking out git repository");
        git(&dir, &["init", "--quiet"])?;
        // Most hosts serve a single commit; otherwise fall back to every branch
        if git(&dir, &["fetch", "--quiet", "--depth", "1", url, commit]).is_err() {
            tracing::debug!(url, "shallow fetch by commit refused, fetching branches");
            git(
                &dir,
                &["fetch", "--quiet", url, "+refs/heads/*:refs/remotes/origin/*"],
            )?;
        }
        git(&dir, &["checkout", "--quiet", "--detach", commit])?;

        Ok(dir)
    }
}

fn git(dir: &Path, args: &[&str]) -> Result<String, GitRepoError> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .map_err(GitRepoError::Spawn)?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        Err(GitRepoError::Command {
            args: args.join(" "),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}
