//! `.npmrc` scoped registry lookup.
//!
//! Only `@scope:registry=URL` lines matter here; everything else in the file
//! (auth tokens included) is ignored.

use std::collections::HashMap;
use std::path::Path;

/// Scope routing read from one `.npmrc`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Npmrc {
    /// `@scope` -> registry URL without a trailing slash.
    scoped_registries: HashMap<String, String>,
}

impl Npmrc {
    /// Parse `.npmrc` content.
    ///
    /// Blank lines and `#` / `;` comments are skipped.
    #[must_use]
    pub fn parse(content: &str) -> Self {
        let mut scoped_registries = HashMap::new();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let Some(scope) = key.trim().strip_suffix(":registry") else {
                continue;
            };
            if scope.starts_with('@') {
                let url = value.trim().trim_end_matches('/');
                scoped_registries.insert(scope.to_string(), url.to_string());
            }
        }

        Self { scoped_registries }
    }

    /// Read the `.npmrc` in `dir`. A missing or unreadable file is empty.
    #[must_use]
    pub fn load(dir: &Path) -> Self {
        let path = dir.join(".npmrc");
        match std::fs::read_to_string(&path) {
            Ok(content) => Self::parse(&content),
            Err(_) => Self::default(),
        }
    }

    /// Registry for `package`: its scope's registry if one is configured,
    /// else `default`.
    #[must_use]
    pub fn registry_for<'a>(&'a self, package: &str, default: &'a str) -> &'a str {
        package
            .strip_prefix('@')
            .and_then(|rest| rest.split_once('/'))
            .and_then(|(scope, _)| self.scoped_registries.get(&format!("@{scope}")))
            .map_or(default, String::as_str)
    }
}
