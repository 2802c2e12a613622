//! Sources for a vendored Cargo build.
//!
//! Registry crates are unpacked into `<root>/cargo/vendor/<name>-<version>`
//! next to the `.cargo-checksum.json` Cargo expects there. Git crates are
//! checked out under `<root>/cargo/git`; the crate's own directory is copied
//! into the vendor directory and its `Cargo.toml` replaced by one with the
//! workspace-inherited fields filled in. `<root>/cargo/config` replaces
//! every source with the vendor directory.

use super::{join, shell_quote, EmitContext, PackageSources, PlannedSource};
use crate::git_repo::GitRepoError;
use crate::lockfile::git::repo_name;
use crate::lockfile::{GitSource, Package, PackageSource};
use crate::manifest::{DataContent, ManifestError, ManifestGenerator};
use serde_json::json;

const VENDORED_SOURCES: &str = "vendored-sources";

/// Emitter for Cargo lockfiles.
#[derive(Debug, Clone)]
pub struct CargoEmitter {
    root: String,
}

impl CargoEmitter {
    #[must_use]
    pub fn new(root: String) -> Self {
        Self { root }
    }

    /// `CARGO_HOME` for the offline build.
    #[must_use]
    pub fn cargo_home(&self) -> String {
        join(&self.root, "cargo")
    }

    pub(crate) fn root(&self) -> &str {
        &self.root
    }

    fn vendor_dir(&self, package: &Package) -> String {
        format!("{}/vendor/{}-{}", self.cargo_home(), package.name, package.version)
    }

    pub(crate) async fn plan(
        &self,
        ctx: &EmitContext,
        package: &Package,
    ) -> crate::Result<PackageSources> {
        let mut plan = PackageSources::default();
        let vendor_dir = self.vendor_dir(package);

        match &package.source {
            PackageSource::Resolved(source) => {
                let integrity = match &source.integrity {
                    Some(integrity) => integrity.clone(),
                    None => {
                        tracing::warn!(name = %package.name, "crate has no checksum, hashing the download");
                        ctx.remote_metadata(&source.resolved).await?.integrity
                    }
                };

                let checksum = json!({ "package": integrity.to_hex(), "files": {} });
                plan.push(PlannedSource::Archive {
                    url: source.resolved.clone(),
                    integrity,
                    destination: vendor_dir.clone(),
                });
                plan.push(PlannedSource::Data {
                    content: DataContent::Text(checksum.to_string()),
                    destination: format!("{vendor_dir}/.cargo-checksum.json"),
                });
            }
            PackageSource::Git(git) => {
                let crates = ctx.git_crates(&git.url, &git.commit).await?;
                let found = crates.get(&package.name).ok_or_else(|| GitRepoError::CrateNotFound {
                    name: package.name.clone(),
                    url: git.url.clone(),
                    commit: git.commit.clone(),
                })?;

                let short = git.commit.get(..7).unwrap_or(&git.commit);
                let checkout = format!(
                    "{}/git/{}-{short}",
                    self.cargo_home(),
                    repo_name(&git.url)
                );
                let crate_dir = if found.path == "." {
                    checkout.clone()
                } else {
                    format!("{checkout}/{}", found.path)
                };
                // staged outside the vendor directory, the copy would overwrite it
                let staged_manifest = format!(
                    "{}/git-manifests/{}-{}.toml",
                    self.cargo_home(),
                    package.name,
                    package.version
                );
                tracing::debug!(name = %package.name, path = %found.path, "git crate located");

                plan.push(PlannedSource::Git {
                    url: git.url.clone(),
                    commit: git.commit.clone(),
                    destination: checkout,
                });
                plan.push(PlannedSource::Data {
                    content: DataContent::Text(found.manifest_toml(&package.name)?),
                    destination: staged_manifest.clone(),
                });
                plan.push(PlannedSource::Command(format!(
                    "mkdir -p {}",
                    shell_quote(&vendor_dir)
                )));
                plan.push(PlannedSource::Command(format!(
                    "cp -r --reflink=auto {}/. {}",
                    shell_quote(&crate_dir),
                    shell_quote(&vendor_dir)
                )));
                plan.push(PlannedSource::Command(format!(
                    "cp {} {}/Cargo.toml",
                    shell_quote(&staged_manifest),
                    shell_quote(&vendor_dir)
                )));
                plan.push(PlannedSource::Data {
                    content: DataContent::Text(
                        json!({ "package": null, "files": {} }).to_string(),
                    ),
                    destination: format!("{vendor_dir}/.cargo-checksum.json"),
                });
            }
            PackageSource::Registry(_) => {
                tracing::warn!(name = %package.name, version = %package.version, "crate has no source, not vendored");
            }
            PackageSource::Local(local) => {
                tracing::debug!(name = %package.name, path = %local.path, "path crate, nothing to fetch");
            }
        }

        Ok(plan)
    }

    /// Add `cargo/config` pointing every source at the vendor directory.
    pub(crate) fn finalize(
        &self,
        packages: &[Package],
        gen: &mut ManifestGenerator,
    ) -> crate::Result<()> {
        let config = vendor_config(packages).map_err(|e| ManifestError::Encode {
            reason: e.to_string(),
        })?;
        gen.add_data_source(config, &format!("{}/config", self.cargo_home()))?;
        Ok(())
    }
}

/// Cargo source-replacement config for `packages`.
fn vendor_config(packages: &[Package]) -> Result<String, toml::ser::Error> {
    let mut sources = toml::Table::new();

    let mut crates_io = toml::Table::new();
    crates_io.insert("replace-with".into(), VENDORED_SOURCES.into());
    sources.insert("crates-io".into(), crates_io.into());

    for package in packages {
        let PackageSource::Git(git) = &package.source else {
            continue;
        };
        let (key, table) = git_source_table(git);
        if !sources.contains_key(&key) {
            sources.insert(key, table.into());
        }
    }

    let mut vendored = toml::Table::new();
    // relative to the parent of CARGO_HOME
    vendored.insert("directory".into(), "cargo/vendor".into());
    sources.insert(VENDORED_SOURCES.into(), vendored.into());

    let mut root = toml::Table::new();
    root.insert("source".into(), sources.into());
    toml::to_string(&root)
}

/// Source table for a git dependency, keyed the way Cargo names the source.
fn git_source_table(git: &GitSource) -> (String, toml::Table) {
    let without_commit = git
        .original
        .rsplit_once('#')
        .map_or(git.original.as_str(), |(spec, _)| spec);
    let key = without_commit
        .strip_prefix("git+")
        .unwrap_or(without_commit)
        .to_string();

    let mut table = toml::Table::new();
    table.insert("git".into(), git.url.clone().into());
    if let Some((_, query)) = key.split_once('?') {
        for pair in query.split('&') {
            if let Some((name @ ("branch" | "tag" | "rev"), value)) = pair.split_once('=') {
                table.insert(name.into(), value.into());
            }
        }
    }
    table.insert("replace-with".into(), VENDORED_SOURCES.into());
    (key, table)
}
