//! npm `package-lock.json` / `npm-shrinkwrap.json` parser.
//!
//! Lockfile versions 2 and 3 list every installed package under a flat
//! `packages` object keyed by install path. Version 1 nests `dependencies`
//! objects and is walked depth-first.

use super::git::{is_git_spec, parse_git_spec};
use super::{
    parse_integrity_field, LocalSource, LockfileParseError, Package, PackageSource,
    RegistrySource, ResolvedSource,
};
use serde_json::{Map, Value};
use std::path::Path;

const NODE_MODULES: &str = "node_modules/";

/// Parser for npm lockfiles.
#[derive(Debug, Clone, Copy)]
pub struct NpmLockfileProvider {
    include_dev: bool,
}

impl Default for NpmLockfileProvider {
    fn default() -> Self {
        Self::new(true)
    }
}

impl NpmLockfileProvider {
    #[must_use]
    pub fn new(include_dev: bool) -> Self {
        Self { include_dev }
    }

    /// Parse `content`, reporting errors against `path`.
    ///
    /// # Errors
    /// Returns an error if the content is not JSON or does not have the
    /// shape of a supported lockfile version.
    pub fn parse(&self, path: &Path, content: &str) -> Result<Vec<Package>, LockfileParseError> {
        let root: Value = serde_json::from_str(content).map_err(|e| LockfileParseError::Json {
            path: path.to_path_buf(),
            source: e,
        })?;

        let lockfile_version = root
            .get("lockfileVersion")
            .and_then(Value::as_u64)
            .ok_or_else(|| LockfileParseError::structure(path, "missing lockfileVersion"))?;

        let mut packages = Vec::new();
        match lockfile_version {
            1 => {
                if let Some(deps) = root.get("dependencies") {
                    let deps = as_object(path, "dependencies", deps)?;
                    self.walk_v1(path, deps, &mut packages)?;
                }
            }
            2 | 3 => {
                let entries = root
                    .get("packages")
                    .ok_or_else(|| LockfileParseError::structure(path, "missing packages"))?;
                let entries = as_object(path, "packages", entries)?;
                self.read_packages(path, entries, &mut packages)?;
            }
            other => {
                return Err(LockfileParseError::structure(
                    path,
                    format!("unsupported lockfileVersion {other}"),
                ));
            }
        }

        Ok(packages)
    }

    fn read_packages(
        &self,
        path: &Path,
        entries: &Map<String, Value>,
        out: &mut Vec<Package>,
    ) -> Result<(), LockfileParseError> {
        for (install_path, entry) in entries {
            // The root project itself
            if install_path.is_empty() {
                continue;
            }

            let entry = as_object(path, install_path, entry)?;

            let name = match entry.get("name").and_then(Value::as_str) {
                Some(name) => name.to_string(),
                None => match install_path.rfind(NODE_MODULES) {
                    Some(pos) => install_path[pos + NODE_MODULES.len()..].to_string(),
                    None => {
                        // Workspace member directory, already in the source tree
                        tracing::debug!(path = %install_path, "skipping workspace entry");
                        continue;
                    }
                },
            };

            // Shipped inside the tarball of the package that bundles it
            if flag(entry, "inBundle") {
                continue;
            }
            if !self.include_dev && (flag(entry, "dev") || flag(entry, "devOptional")) {
                continue;
            }

            let version = str_field(entry, "version").unwrap_or_default().to_string();
            let resolved = str_field(entry, "resolved");

            let source = if flag(entry, "link") {
                PackageSource::Local(LocalSource {
                    path: resolved.unwrap_or(install_path).to_string(),
                })
            } else if let Some(resolved) = resolved {
                classify(path, &name, resolved, entry)?
            } else {
                if version.is_empty() {
                    return Err(LockfileParseError::structure(
                        path,
                        format!("'{install_path}' has neither resolved nor version"),
                    ));
                }
                registry_source(path, &name, entry)?
            };

            tracing::debug!(name = %name, version = %version, "npm package");
            out.push(Package {
                lockfile: path.to_path_buf(),
                name,
                version,
                source,
            });
        }
        Ok(())
    }

    fn walk_v1(
        &self,
        path: &Path,
        deps: &Map<String, Value>,
        out: &mut Vec<Package>,
    ) -> Result<(), LockfileParseError> {
        for (name, dep) in deps {
            let dep = as_object(path, name, dep)?;

            // Bundled dependencies ship inside their parent's tarball
            if flag(dep, "bundled") {
                continue;
            }
            if !self.include_dev && (flag(dep, "dev") || flag(dep, "devOptional")) {
                continue;
            }

            let version = str_field(dep, "version").ok_or_else(|| {
                LockfileParseError::structure(path, format!("dependency '{name}' has no version"))
            })?;
            // `"version": "npm:real-name@1.2.3"` installs real-name under an alias
            let (real_name, version) = split_alias(version).unwrap_or((name.as_str(), version));

            let source = if is_git_spec(version) {
                let from = str_field(dep, "from").map(str::to_string);
                let git = parse_git_spec(version, from).ok_or_else(|| {
                    LockfileParseError::structure(
                        path,
                        format!("dependency '{name}' has an unpinned VCS version '{version}'"),
                    )
                })?;
                PackageSource::Git(git)
            } else if let Some(local) = version.strip_prefix("file:") {
                PackageSource::Local(LocalSource {
                    path: local.to_string(),
                })
            } else if let Some(resolved) = str_field(dep, "resolved") {
                classify(path, real_name, resolved, dep)?
            } else if version.starts_with("http://") || version.starts_with("https://") {
                classify(path, real_name, version, dep)?
            } else {
                registry_source(path, real_name, dep)?
            };

            tracing::debug!(name = %real_name, version = %version, "npm package");
            out.push(Package {
                lockfile: path.to_path_buf(),
                name: real_name.to_string(),
                version: version.to_string(),
                source,
            });

            if let Some(nested) = dep.get("dependencies") {
                let nested = as_object(path, name, nested)?;
                self.walk_v1(path, nested, out)?;
            }
        }
        Ok(())
    }
}

/// Turn a `resolved` field into a source.
fn classify(
    path: &Path,
    name: &str,
    resolved: &str,
    entry: &Map<String, Value>,
) -> Result<PackageSource, LockfileParseError> {
    if is_git_spec(resolved) {
        let git = parse_git_spec(resolved, None).ok_or_else(|| {
            LockfileParseError::structure(
                path,
                format!("'{name}' resolves to an unpinned VCS URL '{resolved}'"),
            )
        })?;
        return Ok(PackageSource::Git(git));
    }

    if let Some(local) = resolved.strip_prefix("file:") {
        return Ok(PackageSource::Local(LocalSource {
            path: local.to_string(),
        }));
    }

    let integrity = str_field(entry, "integrity")
        .map(|value| parse_integrity_field(path, name, value))
        .transpose()?;

    Ok(PackageSource::Resolved(ResolvedSource {
        resolved: resolved.to_string(),
        integrity,
    }))
}

/// A package pinned by name and version only, fetched via the registry.
fn registry_source(
    path: &Path,
    name: &str,
    entry: &Map<String, Value>,
) -> Result<PackageSource, LockfileParseError> {
    let integrity = str_field(entry, "integrity")
        .map(|value| parse_integrity_field(path, name, value))
        .transpose()?;
    Ok(PackageSource::Registry(RegistrySource { integrity }))
}

/// Split an `npm:name@version` alias into name and version.
fn split_alias(version: &str) -> Option<(&str, &str)> {
    let spec = version.strip_prefix("npm:")?;
    // a scoped name starts with '@', so the separator is searched after it
    let at = spec.get(1..)?.find('@')? + 1;
    Some((&spec[..at], &spec[at + 1..]))
}

fn as_object<'a>(
    path: &Path,
    what: &str,
    value: &'a Value,
) -> Result<&'a Map<String, Value>, LockfileParseError> {
    value
        .as_object()
        .ok_or_else(|| LockfileParseError::structure(path, format!("'{what}' is not an object")))
}

fn str_field<'a>(entry: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    entry.get(key).and_then(Value::as_str)
}

fn flag(entry: &Map<String, Value>, key: &str) -> bool {
    entry.get(key).and_then(Value::as_bool).unwrap_or(false)
}
