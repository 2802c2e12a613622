//! Sources for a Yarn v1 offline mirror.
//!
//! Tarballs land in `<root>/yarn-mirror`. Git dependencies are checked out
//! under `<root>/git` and packed into the mirror with `git archive`. A
//! generated `.yarnrc` points Yarn at the mirror.

use super::{join, shell_quote, EmitContext, PackageSources, PlannedSource};
use crate::integrity::{Algorithm, Integrity};
use crate::lockfile::git::repo_name;
use crate::lockfile::{Package, PackageSource};
use crate::manifest::source::url_basename;
use crate::manifest::ManifestGenerator;

/// Emitter for Yarn lockfiles.
#[derive(Debug, Clone)]
pub struct YarnEmitter {
    root: String,
}

impl YarnEmitter {
    #[must_use]
    pub fn new(root: String) -> Self {
        Self { root }
    }

    /// Directory Yarn reads tarballs from.
    #[must_use]
    pub fn mirror_dir(&self) -> String {
        join(&self.root, "yarn-mirror")
    }

    pub(crate) async fn plan(
        &self,
        ctx: &EmitContext,
        package: &Package,
    ) -> crate::Result<PackageSources> {
        let mut plan = PackageSources::default();

        match &package.source {
            PackageSource::Resolved(source) => {
                let integrity = match &source.integrity {
                    Some(integrity) => integrity.clone(),
                    None => match legacy_sha1(&source.resolved) {
                        Some(integrity) => integrity,
                        None => ctx.remote_metadata(&source.resolved).await?.integrity,
                    },
                };

                let filename = mirror_filename(&package.name, &source.resolved);
                plan.push(PlannedSource::Url {
                    url: source.resolved.clone(),
                    integrity,
                    destination: format!("{}/{filename}", self.mirror_dir()),
                });
            }
            PackageSource::Git(git) => {
                let name = format!("{}-{}", repo_name(&git.url), git.commit);
                let repo_dir = join(&self.root, &format!("git/{name}"));
                let target = format!("{}/{name}", self.mirror_dir());

                plan.push(PlannedSource::Git {
                    url: git.url.clone(),
                    commit: git.commit.clone(),
                    destination: repo_dir.clone(),
                });
                plan.push(PlannedSource::Command(format!(
                    "mkdir -p {}",
                    shell_quote(&self.mirror_dir())
                )));
                plan.push(PlannedSource::Command(format!(
                    "git -C {} archive --format tar HEAD > {}",
                    shell_quote(&repo_dir),
                    shell_quote(&target)
                )));
            }
            PackageSource::Registry(_) => {
                tracing::warn!(name = %package.name, version = %package.version, "no resolved URL, not mirrored");
            }
            PackageSource::Local(local) => {
                tracing::debug!(name = %package.name, path = %local.path, "local package, nothing to fetch");
            }
        }

        Ok(plan)
    }

    pub(crate) fn root(&self) -> &str {
        &self.root
    }

    pub(crate) fn finalize(&self, gen: &mut ManifestGenerator) -> crate::Result<()> {
        let mirror = serde_json::Value::from(self.mirror_dir());
        gen.add_data_source(format!("yarn-offline-mirror {mirror}\n"), ".yarnrc")?;
        Ok(())
    }
}

/// Mirror file name: the tarball name, prefixed by `@scope-` for scoped packages.
fn mirror_filename(name: &str, resolved: &str) -> String {
    let basename = url_basename(resolved);
    match name.strip_prefix('@').and_then(|n| n.split_once('/')) {
        Some((scope, _)) => format!("@{scope}-{basename}"),
        None => basename.to_string(),
    }
}

/// A 40-hex-digit URL fragment, as written by old Yarn versions, is a sha1.
fn legacy_sha1(resolved: &str) -> Option<Integrity> {
    let (_, fragment) = resolved.rsplit_once('#')?;
    if fragment.len() != 40 {
        return None;
    }
    Integrity::from_hex(Algorithm::Sha1, fragment).ok()
}
