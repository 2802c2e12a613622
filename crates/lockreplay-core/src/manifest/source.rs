//! Manifest entries and their flatpak-builder JSON shape.

use crate::integrity::Integrity;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

/// Interpreter line of every generated script.
pub const SCRIPT_SHEBANG: &str = "#!/bin/sh";

/// Literal content embedded in the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataContent {
    Text(String),
    Bytes(Vec<u8>),
}

impl From<String> for DataContent {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for DataContent {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Vec<u8>> for DataContent {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

/// An executable shell script assembled from commands.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScriptSource {
    commands: Vec<String>,
}

impl ScriptSource {
    #[must_use]
    pub fn new(commands: Vec<String>) -> Self {
        Self { commands }
    }

    #[must_use]
    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    /// Script text: the shebang line, then one command per line.
    #[must_use]
    pub fn contents(&self) -> String {
        let mut text = String::from(SCRIPT_SHEBANG);
        text.push('\n');
        for command in &self.commands {
            text.push_str(command);
            text.push('\n');
        }
        text
    }
}

/// One entry of the generated manifest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Source {
    /// A remote file, verified against `integrity`.
    Url {
        url: String,
        integrity: Integrity,
        dest: Option<String>,
        dest_filename: Option<String>,
    },
    /// A remote archive extracted into `dest`.
    Archive {
        url: String,
        integrity: Integrity,
        dest: Option<String>,
        archive_type: Option<String>,
    },
    /// A repository checked out at `commit` into `dest`.
    Git {
        url: String,
        commit: String,
        dest: Option<String>,
    },
    /// Inline content. `base64` marks binary payloads.
    Data {
        contents: String,
        base64: bool,
        dest: Option<String>,
        dest_filename: String,
    },
    /// A file already present next to the manifest.
    LocalFile {
        path: String,
        dest: Option<String>,
        dest_filename: Option<String>,
    },
    /// A generated script.
    Script {
        script: ScriptSource,
        dest: Option<String>,
        dest_filename: String,
    },
    /// Shell commands run in place during the build.
    Command { commands: Vec<String> },
}

impl Source {
    pub(crate) fn data(content: DataContent, dest: Option<String>, dest_filename: String) -> Self {
        let (contents, base64) = match content {
            DataContent::Text(text) => (text, false),
            DataContent::Bytes(bytes) => (STANDARD.encode(bytes), true),
        };
        Self::Data {
            contents,
            base64,
            dest,
            dest_filename,
        }
    }

    /// flatpak-builder `type` of this entry.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Url { .. } | Self::LocalFile { .. } => "file",
            Self::Archive { .. } => "archive",
            Self::Git { .. } => "git",
            Self::Data { .. } => "inline",
            Self::Script { .. } => "script",
            Self::Command { .. } => "shell",
        }
    }

    /// Whether this entry must replay in insertion order.
    #[must_use]
    pub fn is_sequential(&self) -> bool {
        matches!(self, Self::Script { .. } | Self::Command { .. })
    }

    /// The remote URL, if the entry has one.
    #[must_use]
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Url { url, .. } | Self::Archive { url, .. } | Self::Git { url, .. } => Some(url),
            _ => None,
        }
    }

    /// The on-disk path of a local file entry.
    #[must_use]
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::LocalFile { path, .. } => Some(path),
            _ => None,
        }
    }

    /// Destination directory.
    #[must_use]
    pub fn dest(&self) -> Option<&str> {
        match self {
            Self::Url { dest, .. }
            | Self::Archive { dest, .. }
            | Self::Git { dest, .. }
            | Self::Data { dest, .. }
            | Self::LocalFile { dest, .. }
            | Self::Script { dest, .. } => dest.as_deref(),
            Self::Command { .. } => None,
        }
    }

    /// Path this entry occupies in the build directory, if it claims one.
    ///
    /// File-like entries claim `dest/dest-filename`, falling back to the
    /// URL's or path's last segment. Directory-like entries only claim their
    /// `dest` when one was given.
    #[must_use]
    pub fn destination(&self) -> Option<String> {
        let file = |dest: &Option<String>, name: &str| match dest {
            Some(dir) => format!("{dir}/{name}"),
            None => name.to_string(),
        };

        match self {
            Self::Url {
                url,
                dest,
                dest_filename,
                ..
            } => Some(file(dest, dest_filename.as_deref().unwrap_or(url_basename(url)))),
            Self::LocalFile {
                path,
                dest,
                dest_filename,
            } => Some(file(dest, dest_filename.as_deref().unwrap_or(path_basename(path)))),
            Self::Data {
                dest, dest_filename, ..
            }
            | Self::Script {
                dest, dest_filename, ..
            } => Some(file(dest, dest_filename)),
            Self::Archive { dest, .. } | Self::Git { dest, .. } => dest.clone(),
            Self::Command { .. } => None,
        }
    }

    /// The flatpak-builder JSON object for this entry.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("type".into(), self.kind().into());

        match self {
            Self::Url {
                url,
                integrity,
                dest,
                dest_filename,
            } => {
                map.insert("url".into(), url.as_str().into());
                map.insert(integrity.algorithm().as_str().into(), integrity.to_hex().into());
                insert_opt(&mut map, "dest", dest.as_deref());
                insert_opt(&mut map, "dest-filename", dest_filename.as_deref());
            }
            Self::Archive {
                url,
                integrity,
                dest,
                archive_type,
            } => {
                map.insert("url".into(), url.as_str().into());
                map.insert(integrity.algorithm().as_str().into(), integrity.to_hex().into());
                insert_opt(&mut map, "dest", dest.as_deref());
                insert_opt(&mut map, "archive-type", archive_type.as_deref());
            }
            Self::Git { url, commit, dest } => {
                map.insert("url".into(), url.as_str().into());
                map.insert("commit".into(), commit.as_str().into());
                insert_opt(&mut map, "dest", dest.as_deref());
            }
            Self::Data {
                contents,
                base64,
                dest,
                dest_filename,
            } => {
                map.insert("contents".into(), contents.as_str().into());
                if *base64 {
                    map.insert("base64".into(), true.into());
                }
                insert_opt(&mut map, "dest", dest.as_deref());
                map.insert("dest-filename".into(), dest_filename.as_str().into());
            }
            Self::LocalFile {
                path,
                dest,
                dest_filename,
            } => {
                map.insert("path".into(), path.as_str().into());
                insert_opt(&mut map, "dest", dest.as_deref());
                insert_opt(&mut map, "dest-filename", dest_filename.as_deref());
            }
            Self::Script {
                script,
                dest,
                dest_filename,
            } => {
                map.insert("commands".into(), script.commands().into());
                insert_opt(&mut map, "dest", dest.as_deref());
                map.insert("dest-filename".into(), dest_filename.as_str().into());
            }
            Self::Command { commands } => {
                map.insert("commands".into(), commands.as_slice().into());
            }
        }

        Value::Object(map)
    }
}

impl Serialize for Source {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

fn insert_opt(map: &mut Map<String, Value>, key: &str, value: Option<&str>) {
    if let Some(value) = value {
        map.insert(key.to_string(), value.into());
    }
}

/// Last path segment of a URL, ignoring query and fragment.
pub(crate) fn url_basename(url: &str) -> &str {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    path_basename(&url[..end])
}

pub(crate) fn path_basename(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_contents() {
        let script = ScriptSource::new(vec!["echo one".into(), "echo two".into()]);
        assert_eq!(script.contents(), "#!/bin/sh\necho one\necho two\n");
    }

    #[test]
    fn test_url_json_shape() {
        let integrity = Integrity::sha256(b"x");
        let source = Source::Url {
            url: "https://example.com/a.tgz".into(),
            integrity: integrity.clone(),
            dest: Some("mirror".into()),
            dest_filename: Some("a.tgz".into()),
        };

        let value = source.to_value();
        assert_eq!(value["type"], "file");
        assert_eq!(value["url"], "https://example.com/a.tgz");
        assert_eq!(value["sha256"], integrity.to_hex());
        assert_eq!(value["dest"], "mirror");
        assert_eq!(value["dest-filename"], "a.tgz");

        let keys: Vec<&String> = value.as_object().unwrap().keys().collect();
        assert_eq!(keys, ["type", "url", "sha256", "dest", "dest-filename"]);
    }

    #[test]
    fn test_bytes_are_base64() {
        let source = Source::data(DataContent::Bytes(vec![0, 1, 0, 255]), None, "blob".into());
        let value = source.to_value();
        assert_eq!(value["type"], "inline");
        assert_eq!(value["base64"], true);
        assert_eq!(
            STANDARD.decode(value["contents"].as_str().unwrap()).unwrap(),
            vec![0, 1, 0, 255]
        );
    }

    #[test]
    fn test_text_has_no_base64_flag() {
        let source = Source::data("hello\0world".into(), Some("d".into()), "f".into());
        let value = source.to_value();
        assert_eq!(value["contents"], "hello\0world");
        assert!(value.get("base64").is_none());
    }

    #[test]
    fn test_destination() {
        let url = Source::Url {
            url: "https://example.com/pkg/a-1.0.tgz?x=1#frag".into(),
            integrity: Integrity::sha256(b""),
            dest: Some("mirror".into()),
            dest_filename: None,
        };
        assert_eq!(url.destination().as_deref(), Some("mirror/a-1.0.tgz"));

        let git = Source::Git {
            url: "https://example.com/r.git".into(),
            commit: "0".repeat(40),
            dest: None,
        };
        assert_eq!(git.destination(), None);

        let command = Source::Command {
            commands: vec!["true".into()],
        };
        assert_eq!(command.destination(), None);
        assert!(command.is_sequential());
        assert_eq!(command.kind(), "shell");
    }

    #[test]
    fn test_basenames() {
        assert_eq!(url_basename("https://x/y/z.tgz#abc"), "z.tgz");
        assert_eq!(path_basename("dir/file.txt"), "file.txt");
        assert_eq!(path_basename("file.txt"), "file.txt");
    }
}
