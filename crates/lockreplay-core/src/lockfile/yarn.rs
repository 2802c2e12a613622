//! Yarn v1 `yarn.lock` parser.
//!
//! The format is an indented text dialect:
//!
//! ```text
//! # comment
//! "@scope/pkg@^1.0.0", "@scope/pkg@^1.1.0":
//!   version "1.1.2"
//!   resolved "https://registry.yarnpkg.com/@scope/pkg/-/pkg-1.1.2.tgz#<sha1>"
//!   integrity sha512-...
//!   dependencies:
//!     other "^2.0.0"
//! ```
//!
//! Only the top-level fields of each block are read. Nested sections such as
//! `dependencies:` are skipped.

use super::git::{is_git_spec, parse_git_spec};
use super::{
    parse_integrity_field, LocalSource, LockfileParseError, Package, PackageSource,
    ResolvedSource,
};
use std::collections::HashMap;
use std::path::Path;

/// Parser for Yarn v1 lockfiles.
#[derive(Debug, Clone, Copy, Default)]
pub struct YarnLockfileProvider;

/// One `heading:` block with its top-level fields.
#[derive(Debug)]
struct Block {
    line: usize,
    aliases: Vec<String>,
    fields: HashMap<String, String>,
}

impl YarnLockfileProvider {
    /// Parse `content`, reporting errors against `path`.
    ///
    /// # Errors
    /// Returns an error on malformed lines, on blocks missing `version` or
    /// `resolved`, and on Yarn 2+ lockfiles.
    pub fn parse(&self, path: &Path, content: &str) -> Result<Vec<Package>, LockfileParseError> {
        let blocks = read_blocks(path, content)?;
        blocks
            .into_iter()
            .map(|block| block_to_package(path, block))
            .collect()
    }
}

fn syntax(path: &Path, line: usize, message: impl Into<String>) -> LockfileParseError {
    LockfileParseError::Syntax {
        path: path.to_path_buf(),
        line,
        message: message.into(),
    }
}

fn read_blocks(path: &Path, content: &str) -> Result<Vec<Block>, LockfileParseError> {
    let mut blocks: Vec<Block> = Vec::new();
    // Whether the current block has opened a nested section like `dependencies:`
    let mut in_section = false;

    for (idx, raw) in content.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed = raw.trim();

        // Skip empty lines and comments
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let indent = raw.len() - raw.trim_start().len();

        if indent == 0 {
            let Some(heading) = trimmed.strip_suffix(':') else {
                return Err(syntax(path, line_no, format!("expected a heading, got '{trimmed}'")));
            };

            if heading == "__metadata" {
                return Err(syntax(
                    path,
                    line_no,
                    "Yarn 2+ lockfiles are not supported, only the v1 format",
                ));
            }

            blocks.push(Block {
                line: line_no,
                aliases: split_aliases(path, line_no, heading)?,
                fields: HashMap::new(),
            });
            in_section = false;
            continue;
        }

        let Some(block) = blocks.last_mut() else {
            return Err(syntax(path, line_no, "indented line before any heading"));
        };

        if indent > 2 {
            if !in_section {
                return Err(syntax(path, line_no, "unexpected indentation"));
            }
            continue;
        }

        if let Some(section) = trimmed.strip_suffix(':') {
            if !section.contains(char::is_whitespace) {
                in_section = true;
                continue;
            }
        }
        in_section = false;

        let (key, value) = split_field(path, line_no, trimmed)?;
        block.fields.insert(key, value);
    }

    Ok(blocks)
}

/// Split a heading into its comma-separated aliases, honoring quotes.
fn split_aliases(path: &Path, line: usize, heading: &str) -> Result<Vec<String>, LockfileParseError> {
    let mut aliases = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for c in heading.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            ',' if !in_quotes => {
                aliases.push(unquote(path, line, current.trim())?);
                current.clear();
            }
            _ => current.push(c),
        }
    }

    if in_quotes {
        return Err(syntax(path, line, "unterminated quote in heading"));
    }
    aliases.push(unquote(path, line, current.trim())?);

    if aliases.iter().any(String::is_empty) {
        return Err(syntax(path, line, "empty alias in heading"));
    }
    Ok(aliases)
}

/// Split `key value` into its parts, decoding quoted halves.
fn split_field(path: &Path, line: usize, text: &str) -> Result<(String, String), LockfileParseError> {
    let (key, value) = if text.starts_with('"') {
        // Quoted key: find the closing quote that is not escaped
        let mut escaped = false;
        let end = text[1..]
            .char_indices()
            .find_map(|(i, c)| match c {
                '\\' if !escaped => {
                    escaped = true;
                    None
                }
                '"' if !escaped => Some(i + 1),
                _ => {
                    escaped = false;
                    None
                }
            })
            .ok_or_else(|| syntax(path, line, "unterminated quoted key"))?;
        (&text[..=end], &text[end + 1..])
    } else {
        text.split_once(char::is_whitespace)
            .ok_or_else(|| syntax(path, line, format!("expected 'key value', got '{text}'")))?
    };

    Ok((unquote(path, line, key)?, unquote(path, line, value.trim())?))
}

/// Decode a possibly quoted value. Quoted values use JSON string escapes.
fn unquote(path: &Path, line: usize, text: &str) -> Result<String, LockfileParseError> {
    if text.starts_with('"') {
        serde_json::from_str::<String>(text)
            .map_err(|e| syntax(path, line, format!("bad quoted string {text}: {e}")))
    } else {
        Ok(text.to_string())
    }
}

/// Split `name@range`, where a scoped name starts with its own `@`.
fn split_alias(alias: &str) -> Option<(&str, &str)> {
    let at = alias.get(1..)?.find('@')? + 1;
    let (name, range) = (&alias[..at], &alias[at + 1..]);
    if name.is_empty() || name == "@" {
        return None;
    }
    Some((name, range))
}

fn block_to_package(path: &Path, mut block: Block) -> Result<Package, LockfileParseError> {
    let alias = &block.aliases[0];
    let (name, range) = split_alias(alias)
        .ok_or_else(|| syntax(path, block.line, format!("cannot split name from '{alias}'")))?;
    let name = name.to_string();

    let version = block
        .fields
        .remove("version")
        .ok_or_else(|| syntax(path, block.line, format!("'{name}' has no version")))?;

    let local = range
        .strip_prefix("file:")
        .or_else(|| range.strip_prefix("link:"));

    let source = if let Some(local) = local {
        PackageSource::Local(LocalSource {
            path: local.to_string(),
        })
    } else {
        let resolved = block
            .fields
            .remove("resolved")
            .ok_or_else(|| syntax(path, block.line, format!("'{name}' has no resolved URL")))?;

        if is_git_spec(&resolved) {
            let git = parse_git_spec(&resolved, None).ok_or_else(|| {
                syntax(
                    path,
                    block.line,
                    format!("'{name}' resolves to an unpinned VCS URL '{resolved}'"),
                )
            })?;
            PackageSource::Git(git)
        } else {
            let integrity = block
                .fields
                .get("integrity")
                .map(|value| parse_integrity_field(path, &name, value))
                .transpose()?;
            PackageSource::Resolved(ResolvedSource { resolved, integrity })
        }
    };

    tracing::debug!(name = %name, version = %version, "yarn package");

    Ok(Package {
        lockfile: path.to_path_buf(),
        name,
        version,
        source,
    })
}
