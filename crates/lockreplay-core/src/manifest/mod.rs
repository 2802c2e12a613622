//! Manifest accumulation and deterministic output.
//!
//! [`ManifestGenerator`] is an open builder. Sources are added through typed
//! methods, then [`ManifestGenerator::finish`] consumes it and returns the
//! immutable [`Manifest`].
//!
//! Output order does not depend on insertion order for artifacts: url, git,
//! inline and local-file entries are sorted by a stable key, then scripts and
//! shell commands follow in the order they were added.

pub mod source;

pub use source::{DataContent, ScriptSource, Source, SCRIPT_SHEBANG};

use crate::error::codes;
use crate::integrity::Integrity;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Largest file GitHub accepts without LFS, with some headroom.
pub const MAX_GITHUB_SIZE: usize = 49 * 1000 * 1000;

/// Two different sources target the same path.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Two different sources target '{destination}'")]
pub struct DuplicateDestinationError {
    pub destination: String,
}

/// Errors raised while building or writing a manifest.
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error(transparent)]
    DuplicateDestination(#[from] DuplicateDestinationError),

    #[error("'{commit}' is not a full commit id (for {url})")]
    InvalidPin { url: String, commit: String },

    #[error("Invalid destination '{destination}'")]
    InvalidDestination { destination: String },

    #[error("Local file {} does not exist", path.display())]
    MissingFile { path: PathBuf },

    #[error("Failed to encode manifest: {reason}")]
    Encode { reason: String },
}

impl ManifestError {
    /// Get the stable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::DuplicateDestination(_) => codes::MANIFEST_DUPLICATE_DEST,
            Self::InvalidPin { .. } => codes::MANIFEST_INVALID_PIN,
            Self::InvalidDestination { .. } => codes::MANIFEST_INVALID_DEST,
            Self::MissingFile { .. } => codes::MANIFEST_MISSING_FILE,
            Self::Encode { .. } => codes::IO_ERROR,
        }
    }
}

/// Accumulates sources for one manifest.
#[derive(Debug, Default)]
pub struct ManifestGenerator {
    sources: Vec<Source>,
    /// Claimed destination -> index into `sources`.
    destinations: HashMap<String, usize>,
}

impl ManifestGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries added so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Add a remote file pinned by `integrity`.
    ///
    /// `destination` is the file's path in the build directory; without one
    /// the file keeps its URL name at the top level.
    ///
    /// # Errors
    /// Returns an error if another source already claims the destination.
    pub fn add_url_source(
        &mut self,
        url: &str,
        integrity: &Integrity,
        destination: Option<&str>,
    ) -> Result<(), ManifestError> {
        let (dest, dest_filename) = match destination {
            Some(destination) => {
                let (dir, name) = split_destination(destination)?;
                (dir, Some(name))
            }
            None => (None, None),
        };

        self.push(Source::Url {
            url: url.to_string(),
            integrity: integrity.clone(),
            dest,
            dest_filename,
        })
    }

    /// Add a remote archive extracted into `destination`.
    ///
    /// # Errors
    /// Returns an error if another source already claims the destination.
    pub fn add_archive_source(
        &mut self,
        url: &str,
        integrity: &Integrity,
        destination: Option<&str>,
    ) -> Result<(), ManifestError> {
        let dest = destination.map(normalize_dir).transpose()?;
        // flatpak-builder cannot infer the format of `.crate` files
        let archive_type = Path::new(source::url_basename(url))
            .extension()
            .is_some_and(|ext| ext == "crate")
            .then(|| "tar-gzip".to_string());

        self.push(Source::Archive {
            url: url.to_string(),
            integrity: integrity.clone(),
            dest,
            archive_type,
        })
    }

    /// Add a repository checked out at `commit`.
    ///
    /// # Errors
    /// Returns [`ManifestError::InvalidPin`] unless `commit` is a full
    /// 40 or 64 character hex object id.
    pub fn add_git_source(
        &mut self,
        url: &str,
        commit: &str,
        destination: Option<&str>,
    ) -> Result<(), ManifestError> {
        if !is_full_commit(commit) {
            return Err(ManifestError::InvalidPin {
                url: url.to_string(),
                commit: commit.to_string(),
            });
        }

        let dest = destination.map(normalize_dir).transpose()?;
        self.push(Source::Git {
            url: url.to_string(),
            commit: commit.to_string(),
            dest,
        })
    }

    /// Embed `content` inline at `destination`.
    ///
    /// # Errors
    /// Returns an error if another source already claims the destination.
    pub fn add_data_source(
        &mut self,
        content: impl Into<DataContent>,
        destination: &str,
    ) -> Result<(), ManifestError> {
        let (dest, dest_filename) = split_destination(destination)?;
        self.push(Source::data(content.into(), dest, dest_filename))
    }

    /// Reference a file that exists on disk now.
    ///
    /// # Errors
    /// Returns [`ManifestError::MissingFile`] if `path` is not a file.
    pub fn add_local_file_source(
        &mut self,
        path: &Path,
        destination: Option<&str>,
    ) -> Result<(), ManifestError> {
        if !path.is_file() {
            return Err(ManifestError::MissingFile {
                path: path.to_path_buf(),
            });
        }

        let path_str = path.to_string_lossy().into_owned();
        let (dest, dest_filename) = match destination {
            Some(destination) => split_destination(destination)?,
            None => (None, source::path_basename(&path_str).to_string()),
        };

        self.push(Source::LocalFile {
            path: path_str,
            dest,
            dest_filename: Some(dest_filename),
        })
    }

    /// Add a script at `destination` that runs `commands` in order.
    ///
    /// # Errors
    /// Returns an error if another source already claims the destination.
    pub fn add_script_source(
        &mut self,
        commands: Vec<String>,
        destination: &str,
    ) -> Result<(), ManifestError> {
        let (dest, dest_filename) = split_destination(destination)?;
        self.push(Source::Script {
            script: ScriptSource::new(commands),
            dest,
            dest_filename,
        })
    }

    /// Run `command` in place during the build.
    ///
    /// Consecutive commands share one `shell` entry.
    pub fn add_command(&mut self, command: impl Into<String>) {
        if let Some(Source::Command { commands }) = self.sources.last_mut() {
            commands.push(command.into());
            return;
        }
        self.sources.push(Source::Command {
            commands: vec![command.into()],
        });
    }

    /// Close the builder.
    #[must_use]
    pub fn finish(self) -> Manifest {
        tracing::debug!(sources = self.sources.len(), "manifest finished");
        Manifest {
            sources: self.sources,
        }
    }

    fn push(&mut self, source: Source) -> Result<(), ManifestError> {
        let Some(destination) = source.destination() else {
            if !self.sources.contains(&source) {
                self.sources.push(source);
            }
            return Ok(());
        };

        if let Some(&existing) = self.destinations.get(&destination) {
            if self.sources[existing] == source {
                return Ok(());
            }
            return Err(DuplicateDestinationError { destination }.into());
        }

        self.destinations.insert(destination, self.sources.len());
        self.sources.push(source);
        Ok(())
    }
}

/// The finished, immutable list of sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    sources: Vec<Source>,
}

impl Manifest {
    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Sources in insertion order.
    #[must_use]
    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    /// Sources in output order, sorted by [`default_sort_key`].
    pub fn ordered_sources(&self) -> impl Iterator<Item = &Source> {
        self.ordered_sources_by(default_sort_key)
    }

    /// Artifacts sorted by `key`, then scripts and commands in insertion order.
    pub fn ordered_sources_by<K, F>(&self, key: F) -> impl Iterator<Item = &Source>
    where
        K: Ord,
        F: FnMut(&Source) -> K,
    {
        let (mut artifacts, sequential): (Vec<&Source>, Vec<&Source>) =
            self.sources.iter().partition(|s| !s.is_sequential());

        let mut key = key;
        artifacts.sort_by_cached_key(|s| key(s));
        artifacts.into_iter().chain(sequential)
    }

    /// The ordered manifest as a JSON array, indented by four spaces.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, ManifestError> {
        let ordered: Vec<&Source> = self.ordered_sources().collect();
        encode(&ordered)
    }

    /// Output order cut into runs whose encoding stays below `max_size`
    /// bytes. A source larger than `max_size` gets a run of its own.
    pub fn chunks(&self, max_size: usize) -> Result<Vec<Vec<&Source>>, ManifestError> {
        // "[\n]" around every chunk
        const FRAME: usize = 3;

        let mut chunks = Vec::new();
        let mut current = Vec::new();
        let mut size = FRAME;
        for source in self.ordered_sources() {
            let len = encode(source)?.len();
            if !current.is_empty() && size + len >= max_size {
                chunks.push(std::mem::take(&mut current));
                size = FRAME;
            }
            size += len;
            current.push(source);
        }
        if !current.is_empty() || chunks.is_empty() {
            chunks.push(current);
        }
        Ok(chunks)
    }

    /// Write [`Self::to_json`] to `path` atomically.
    ///
    /// # Errors
    /// Returns an error if encoding or writing fails.
    pub fn write_to(&self, path: &Path) -> crate::Result<()> {
        let json = self.to_json()?;
        if json.len() >= MAX_GITHUB_SIZE {
            tracing::warn!(
                path = %path.display(),
                size = json.len(),
                "manifest is too large for GitHub, consider splitting it"
            );
        }
        write_file(path, &json)?;
        tracing::info!(path = %path.display(), sources = self.len(), "wrote manifest");
        Ok(())
    }

    /// Write the manifest as numbered files below `max_size` each:
    /// `sources.json` becomes `sources.0.json`, `sources.1.json`, ...
    ///
    /// # Errors
    /// Returns an error if encoding or writing fails.
    pub fn write_split(&self, path: &Path, max_size: usize) -> crate::Result<Vec<PathBuf>> {
        let chunks = self.chunks(max_size)?;
        let mut written = Vec::with_capacity(chunks.len());

        for (index, chunk) in chunks.iter().enumerate() {
            let part = numbered_path(path, index);
            write_file(&part, &encode(chunk)?)?;
            tracing::info!(path = %part.display(), sources = chunk.len(), "wrote manifest part");
            written.push(part);
        }
        Ok(written)
    }
}

fn encode<T: Serialize + ?Sized>(value: &T) -> Result<String, ManifestError> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value
        .serialize(&mut serializer)
        .map_err(|e| ManifestError::Encode {
            reason: e.to_string(),
        })?;
    buf.push(b'\n');

    String::from_utf8(buf).map_err(|e| ManifestError::Encode {
        reason: e.to_string(),
    })
}

fn write_file(path: &Path, json: &str) -> crate::Result<()> {
    crate::fs::atomic_write(path, json.as_bytes()).map_err(|e| crate::Error::Write {
        path: path.to_path_buf(),
        source: e,
    })
}

/// `dir/name.json` as `dir/name.<index>.json`.
fn numbered_path(path: &Path, index: usize) -> PathBuf {
    let stem = path.file_stem().unwrap_or_default().to_string_lossy();
    let name = match path.extension() {
        Some(ext) => format!("{stem}.{index}.{}", ext.to_string_lossy()),
        None => format!("{stem}.{index}"),
    };
    path.with_file_name(name)
}

/// Sort key for artifacts: URL, else local path, else destination, then the
/// entry's canonical JSON as a tie breaker.
#[must_use]
pub fn default_sort_key(source: &Source) -> (String, String) {
    let primary = source
        .url()
        .or_else(|| source.path())
        .map(str::to_string)
        .or_else(|| source.destination())
        .unwrap_or_default();
    (primary, source.to_value().to_string())
}

fn is_full_commit(commit: &str) -> bool {
    matches!(commit.len(), 40 | 64) && commit.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Normalize a directory destination: no empty, absolute or `..` parts.
fn normalize_dir(destination: &str) -> Result<String, ManifestError> {
    let invalid = || ManifestError::InvalidDestination {
        destination: destination.to_string(),
    };

    let parts: Vec<&str> = destination
        .split('/')
        .filter(|p| !p.is_empty() && *p != ".")
        .collect();

    if destination.starts_with('/') || parts.is_empty() || parts.contains(&"..") {
        return Err(invalid());
    }
    Ok(parts.join("/"))
}

/// Split a file destination into parent directory and file name.
fn split_destination(destination: &str) -> Result<(Option<String>, String), ManifestError> {
    let normalized = normalize_dir(destination)?;
    match normalized.rsplit_once('/') {
        Some((dir, name)) => Ok((Some(dir.to_string()), name.to_string())),
        None => Ok((None, normalized)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const COMMIT: &str = "0123456789abcdef0123456789abcdef01234567";

    fn integrity(tag: &str) -> Integrity {
        Integrity::sha256(tag.as_bytes())
    }

    fn urls(manifest: &Manifest) -> Vec<&str> {
        manifest.ordered_sources().filter_map(Source::url).collect()
    }

    #[test]
    fn test_archives_sorted_by_url() {
        let mut gen = ManifestGenerator::new();
        for name in ["ghi", "abc", "def"] {
            gen.add_archive_source(
                &format!("https://example.com/{name}.tar.gz"),
                &integrity(name),
                Some(name),
            )
            .unwrap();
        }
        let manifest = gen.finish();

        assert_eq!(
            urls(&manifest),
            vec![
                "https://example.com/abc.tar.gz",
                "https://example.com/def.tar.gz",
                "https://example.com/ghi.tar.gz",
            ]
        );
    }

    #[test]
    fn test_scripts_follow_artifacts_in_insertion_order() {
        let mut gen = ManifestGenerator::new();
        gen.add_command("echo first");
        gen.add_url_source("https://example.com/z", &integrity("z"), None)
            .unwrap();
        gen.add_script_source(vec!["echo script".into()], "bin/run.sh")
            .unwrap();
        gen.add_url_source("https://example.com/a", &integrity("a"), None)
            .unwrap();
        gen.add_command("echo second");
        let manifest = gen.finish();

        let kinds: Vec<&str> = manifest.ordered_sources().map(Source::kind).collect();
        assert_eq!(kinds, vec!["file", "file", "shell", "script", "shell"]);
        assert_eq!(urls(&manifest), vec!["https://example.com/a", "https://example.com/z"]);
    }

    #[test]
    fn test_consecutive_commands_merge() {
        let mut gen = ManifestGenerator::new();
        gen.add_command("mkdir -p a");
        gen.add_command("touch a/b");
        let manifest = gen.finish();

        assert_eq!(manifest.len(), 1);
        assert_eq!(
            manifest.sources()[0],
            Source::Command {
                commands: vec!["mkdir -p a".into(), "touch a/b".into()]
            }
        );
    }

    #[test]
    fn test_identical_sources_dedupe() {
        let mut gen = ManifestGenerator::new();
        gen.add_url_source("https://example.com/a.tgz", &integrity("a"), Some("m/a.tgz"))
            .unwrap();
        gen.add_url_source("https://example.com/a.tgz", &integrity("a"), Some("m/a.tgz"))
            .unwrap();
        gen.add_git_source("https://example.com/r.git", COMMIT, None)
            .unwrap();
        gen.add_git_source("https://example.com/r.git", COMMIT, None)
            .unwrap();
        assert_eq!(gen.len(), 2);
    }

    #[test]
    fn test_conflicting_destination() {
        let mut gen = ManifestGenerator::new();
        gen.add_url_source("https://example.com/a.tgz", &integrity("a"), Some("m/a.tgz"))
            .unwrap();
        let err = gen
            .add_data_source("not the same", "m/a.tgz")
            .unwrap_err();

        assert_eq!(err.code(), codes::MANIFEST_DUPLICATE_DEST);
        assert!(matches!(
            err,
            ManifestError::DuplicateDestination(DuplicateDestinationError { ref destination })
                if destination == "m/a.tgz"
        ));
    }

    #[test]
    fn test_git_requires_full_commit() {
        let mut gen = ManifestGenerator::new();
        for pin in ["main", "v1.0.0", "0123456", &"g".repeat(40)] {
            let err = gen
                .add_git_source("https://example.com/r.git", pin, None)
                .unwrap_err();
            assert_eq!(err.code(), codes::MANIFEST_INVALID_PIN);
        }
        gen.add_git_source("https://example.com/r.git", &"a".repeat(64), Some("r"))
            .unwrap();
    }

    #[test]
    fn test_destination_rules() {
        let mut gen = ManifestGenerator::new();
        gen.add_data_source("x", "deep/dir/file.txt").unwrap();
        gen.add_data_source("y", "top.txt").unwrap();
        gen.add_git_source("https://example.com/r.git", COMMIT, Some("src/r/"))
            .unwrap();
        let manifest = gen.finish();

        let values: Vec<_> = manifest.sources().iter().map(Source::to_value).collect();
        assert_eq!(values[0]["dest"], "deep/dir");
        assert_eq!(values[0]["dest-filename"], "file.txt");
        assert!(values[1].get("dest").is_none());
        assert_eq!(values[1]["dest-filename"], "top.txt");
        assert_eq!(values[2]["dest"], "src/r");
        assert!(values[2].get("dest-filename").is_none());
    }

    #[test]
    fn test_invalid_destinations() {
        let mut gen = ManifestGenerator::new();
        for bad in ["", "/abs", "a/../b", "./"] {
            let err = gen.add_data_source("x", bad).unwrap_err();
            assert!(matches!(err, ManifestError::InvalidDestination { .. }), "{bad}");
        }
    }

    #[test]
    fn test_binary_data_survives() {
        let mut gen = ManifestGenerator::new();
        gen.add_data_source(vec![0u8, 0, 1, 2], "blob.bin").unwrap();
        let json = gen.finish().to_json().unwrap();

        assert!(json.contains("\"base64\": true"));
        assert!(json.contains("\"contents\": \"AAABAg==\""));
    }

    #[test]
    fn test_local_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "content").unwrap();
        let name = file.path().file_name().unwrap().to_str().unwrap().to_string();

        let mut gen = ManifestGenerator::new();
        gen.add_local_file_source(file.path(), None).unwrap();
        let manifest = gen.finish();

        let value = manifest.sources()[0].to_value();
        assert_eq!(value["type"], "file");
        assert_eq!(value["dest-filename"], name.as_str());
        assert!(value.get("dest").is_none());
    }

    #[test]
    fn test_local_file_missing() {
        let mut gen = ManifestGenerator::new();
        let err = gen
            .add_local_file_source(Path::new("/nonexistent/file"), None)
            .unwrap_err();
        assert_eq!(err.code(), codes::MANIFEST_MISSING_FILE);
    }

    #[test]
    fn test_json_format() {
        let mut gen = ManifestGenerator::new();
        gen.add_git_source("https://example.com/r.git", COMMIT, Some("r"))
            .unwrap();
        let json = gen.finish().to_json().unwrap();

        let expected = format!(
            "[\n    {{\n        \"type\": \"git\",\n        \"url\": \"https://example.com/r.git\",\n        \"commit\": \"{COMMIT}\",\n        \"dest\": \"r\"\n    }}\n]\n"
        );
        assert_eq!(json, expected);
    }

    #[test]
    fn test_output_independent_of_insertion_order() {
        let build = |order: &[&str]| {
            let mut gen = ManifestGenerator::new();
            for name in order {
                gen.add_url_source(
                    &format!("https://example.com/{name}"),
                    &integrity(name),
                    Some(&format!("m/{name}")),
                )
                .unwrap();
            }
            gen.finish().to_json().unwrap()
        };

        assert_eq!(build(&["b", "c", "a"]), build(&["a", "b", "c"]));
        assert_eq!(build(&["c", "a", "b"]), build(&["a", "b", "c"]));
    }

    #[test]
    fn test_custom_sort_key() {
        let mut gen = ManifestGenerator::new();
        gen.add_data_source("1", "z-first").unwrap();
        gen.add_data_source("2", "a-second").unwrap();
        let manifest = gen.finish();

        let by_destination: Vec<String> = manifest
            .ordered_sources_by(|s| std::cmp::Reverse(s.destination()))
            .filter_map(Source::destination)
            .collect();
        assert_eq!(by_destination, vec!["z-first", "a-second"]);
    }

    #[test]
    fn test_write_to() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out/generated-sources.json");

        let mut gen = ManifestGenerator::new();
        gen.add_data_source("x", "x.txt").unwrap();
        let manifest = gen.finish();
        manifest.write_to(&out).unwrap();

        assert_eq!(std::fs::read_to_string(&out).unwrap(), manifest.to_json().unwrap());
    }

    fn data_manifest(count: usize) -> Manifest {
        let mut gen = ManifestGenerator::new();
        for i in 0..count {
            gen.add_data_source(format!("{i:0>100}"), &format!("data/{i}.txt"))
                .unwrap();
        }
        gen.finish()
    }

    #[test]
    fn test_chunks_stay_below_limit() {
        let manifest = data_manifest(10);
        let one = encode(&manifest.sources()[0]).unwrap().len();
        let limit = 3 + one * 3 + 1;

        let chunks = manifest.chunks(limit).unwrap();
        assert_eq!(chunks.iter().map(Vec::len).collect::<Vec<_>>(), vec![3, 3, 3, 1]);
        // nothing lost, order kept
        let rejoined: Vec<&Source> = chunks.into_iter().flatten().collect();
        assert_eq!(rejoined, manifest.ordered_sources().collect::<Vec<_>>());
    }

    #[test]
    fn test_oversized_source_gets_own_chunk() {
        let manifest = data_manifest(2);
        let chunks = manifest.chunks(10).unwrap();
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn test_empty_manifest_is_one_chunk() {
        let manifest = ManifestGenerator::new().finish();
        assert_eq!(manifest.chunks(MAX_GITHUB_SIZE).unwrap().len(), 1);
    }

    #[test]
    fn test_write_split() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("generated-sources.json");
        let manifest = data_manifest(4);
        let one = encode(&manifest.sources()[0]).unwrap().len();

        let written = manifest.write_split(&out, 3 + one * 2 + 1).unwrap();
        assert_eq!(
            written,
            vec![
                dir.path().join("generated-sources.0.json"),
                dir.path().join("generated-sources.1.json"),
            ]
        );

        let mut parts = Vec::new();
        for path in &written {
            let part: Vec<serde_json::Value> =
                serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
            parts.extend(part);
        }
        let whole: Vec<serde_json::Value> = serde_json::from_str(&manifest.to_json().unwrap()).unwrap();
        assert_eq!(parts, whole);
        assert!(!out.exists());
    }

    #[test]
    fn test_numbered_path() {
        assert_eq!(
            numbered_path(Path::new("out/sources.json"), 2),
            PathBuf::from("out/sources.2.json")
        );
        assert_eq!(numbered_path(Path::new("sources"), 0), PathBuf::from("sources.0"));
    }
}
