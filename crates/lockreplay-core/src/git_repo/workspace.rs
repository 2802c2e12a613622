//! Cargo workspace discovery inside a checkout.
//!
//! Crates are found the way Cargo finds them: the root package, the
//! workspace members (glob patterns allowed) and path dependencies of either.
//! Fields a member inherits with `workspace = true` are resolved against the
//! workspace root, since the vendored copy no longer sits in the workspace.

use super::GitRepoError;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use toml::{Table, Value};

/// Dependency tables that inherit from `[workspace.dependencies]`.
const DEPENDENCY_SECTIONS: [&str; 3] = ["dependencies", "dev-dependencies", "build-dependencies"];

/// A crate found in a checkout.
#[derive(Debug, Clone, PartialEq)]
pub struct GitCrate {
    /// Directory relative to the checkout, `.` for the root.
    pub path: String,
    /// `Cargo.toml` with inherited fields filled in.
    pub manifest: Table,
}

impl GitCrate {
    /// The normalized manifest as TOML text.
    ///
    /// # Errors
    /// Returns an error if the manifest cannot be encoded.
    pub fn manifest_toml(&self, name: &str) -> Result<String, GitRepoError> {
        toml::to_string(&self.manifest).map_err(|source| GitRepoError::Encode {
            name: name.to_string(),
            source,
        })
    }
}

/// Every crate of the repository checked out at `checkout`, by name.
///
/// Without a root `Cargo.toml`, each top-level directory holding one is
/// searched instead.
///
/// # Errors
/// Returns an error if a manifest cannot be read or parsed.
pub fn discover_crates(checkout: &Path) -> Result<HashMap<String, GitCrate>, GitRepoError> {
    let mut discovery = Discovery {
        checkout,
        crates: HashMap::new(),
        visited: HashSet::new(),
    };

    if checkout.join("Cargo.toml").is_file() {
        discovery.visit(".", None)?;
    } else {
        for dir in discovery.crate_dirs("*") {
            discovery.visit(&dir, None)?;
        }
    }

    tracing::debug!(
        checkout = %checkout.display(),
        crates = discovery.crates.len(),
        "discovered crates"
    );
    Ok(discovery.crates)
}

struct Discovery<'a> {
    checkout: &'a Path,
    crates: HashMap<String, GitCrate>,
    visited: HashSet<String>,
}

impl Discovery<'_> {
    fn visit(&mut self, dir: &str, workspace: Option<&Table>) -> Result<(), GitRepoError> {
        if !self.visited.insert(dir.to_string()) {
            return Ok(());
        }

        let path = self.checkout.join(dir).join("Cargo.toml");
        let content = std::fs::read_to_string(&path).map_err(|source| GitRepoError::Read {
            path: path.clone(),
            source,
        })?;
        let manifest: Table = toml::from_str(&content)
            .map_err(|source| GitRepoError::Manifest { path, source })?;

        let own_workspace = manifest.get("workspace").and_then(Value::as_table).cloned();
        let workspace = own_workspace.as_ref().or(workspace);

        if let Some(name) = package_name(&manifest) {
            for dependency in path_dependencies(&manifest) {
                let dep_dir = join_relative(dir, &dependency);
                if self.checkout.join(&dep_dir).join("Cargo.toml").is_file() {
                    self.visit(&dep_dir, workspace)?;
                }
            }

            let manifest = match workspace {
                Some(workspace) => normalize(&manifest, workspace),
                None => manifest.clone(),
            };
            self.crates.entry(name).or_insert(GitCrate {
                path: dir.to_string(),
                manifest,
            });
        }

        if let Some(own) = &own_workspace {
            let excluded: Vec<String> = string_array(own, "exclude")
                .map(|e| join_relative(dir, e))
                .collect();
            for member in string_array(own, "members") {
                for member_dir in self.crate_dirs(&join_relative(dir, member)) {
                    if !excluded.contains(&member_dir) {
                        self.visit(&member_dir, Some(own))?;
                    }
                }
            }
        }

        Ok(())
    }

    /// Directories matching `pattern` that hold a `Cargo.toml`, relative to
    /// the checkout.
    fn crate_dirs(&self, pattern: &str) -> Vec<String> {
        let full_pattern = self.checkout.join(pattern);
        let Ok(entries) = glob::glob(&full_pattern.to_string_lossy()) else {
            tracing::warn!(pattern, "ignoring invalid workspace member pattern");
            return Vec::new();
        };

        entries
            .flatten()
            .filter(|dir| dir.join("Cargo.toml").is_file())
            .filter_map(|dir| {
                let relative = dir.strip_prefix(self.checkout).ok()?;
                let parts: Vec<String> = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                Some(join_relative(".", &parts.join("/")))
            })
            .collect()
    }
}

fn package_name(manifest: &Table) -> Option<String> {
    manifest
        .get("package")?
        .get("name")?
        .as_str()
        .map(str::to_string)
}

fn string_array<'a>(table: &'a Table, key: &str) -> impl Iterator<Item = &'a str> {
    table
        .get(key)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
}

/// `path` of every path dependency, including target-specific ones.
fn path_dependencies(manifest: &Table) -> Vec<String> {
    let mut tables: Vec<&Table> = dependency_tables(manifest).collect();
    if let Some(targets) = manifest.get("target").and_then(Value::as_table) {
        for target in targets.values().filter_map(Value::as_table) {
            tables.extend(dependency_tables(target));
        }
    }

    tables
        .into_iter()
        .flat_map(Table::values)
        .filter_map(|dep| dep.get("path")?.as_str())
        .map(str::to_string)
        .collect()
}

fn dependency_tables(table: &Table) -> impl Iterator<Item = &Table> {
    ["dependencies", "build-dependencies"]
        .into_iter()
        .filter_map(|key| table.get(key)?.as_table())
}

/// Lexically join two `/`-separated relative paths; `.` is the root.
fn join_relative(base: &str, relative: &str) -> String {
    let mut parts: Vec<&str> = base
        .split('/')
        .filter(|p| !p.is_empty() && *p != ".")
        .collect();
    for part in relative.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }

    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

/// `manifest` with every `workspace = true` entry replaced by the
/// workspace's value.
fn normalize(manifest: &Table, workspace: &Table) -> Table {
    let mut out = manifest.clone();

    for (key, section) in out.iter_mut() {
        match key.as_str() {
            "package" => inherit_fields(section, workspace.get("package")),
            "target" => {
                let Some(targets) = section.as_table_mut() else {
                    continue;
                };
                for target in targets.iter_mut().map(|(_, v)| v).filter_map(Value::as_table_mut) {
                    for (kind, deps) in target.iter_mut() {
                        if DEPENDENCY_SECTIONS.contains(&kind.as_str()) {
                            inherit_dependencies(deps, workspace.get("dependencies"));
                        }
                    }
                }
            }
            kind if DEPENDENCY_SECTIONS.contains(&kind) => {
                inherit_dependencies(section, workspace.get("dependencies"));
            }
            // whole-table inheritance such as `lints.workspace = true`
            _ => {
                if is_inherited(section) {
                    if let Some(value) = workspace.get(key) {
                        *section = value.clone();
                    }
                }
            }
        }
    }

    out
}

fn is_inherited(value: &Value) -> bool {
    value.get("workspace").and_then(Value::as_bool) == Some(true)
}

fn inherit_fields(section: &mut Value, from: Option<&Value>) {
    let (Some(section), Some(from)) = (section.as_table_mut(), from.and_then(Value::as_table))
    else {
        return;
    };

    for (key, value) in section.iter_mut() {
        if is_inherited(value) {
            match from.get(key) {
                Some(inherited) => *value = inherited.clone(),
                None => tracing::warn!(key = %key, "workspace does not define inherited field"),
            }
        }
    }
}

fn inherit_dependencies(section: &mut Value, from: Option<&Value>) {
    let Some(section) = section.as_table_mut() else {
        return;
    };

    for (name, dep) in section.iter_mut() {
        if !is_inherited(dep) {
            continue;
        }

        let mut merged = match from.and_then(|f| f.get(name)) {
            Some(Value::String(version)) => {
                let mut table = Table::new();
                table.insert("version".into(), Value::String(version.clone()));
                table
            }
            Some(Value::Table(table)) => table.clone(),
            _ => {
                tracing::warn!(dependency = %name, "workspace does not define inherited dependency");
                continue;
            }
        };

        if let Some(own) = dep.as_table() {
            for (key, value) in own {
                match key.as_str() {
                    "workspace" => {}
                    "features" => {
                        let mut features = merged
                            .get("features")
                            .and_then(Value::as_array)
                            .cloned()
                            .unwrap_or_default();
                        features.extend(value.as_array().into_iter().flatten().cloned());
                        merged.insert("features".into(), Value::Array(features));
                    }
                    _ => {
                        merged.insert(key.clone(), value.clone());
                    }
                }
            }
        }

        *dep = Value::Table(merged);
    }
}
