use std::path::PathBuf;

/// Schema version for the on-disk download cache.
/// Bump this when changing the cache layout.
pub const SCHEMA_VERSION: u32 = 1;

/// Get the download cache directory for lockreplay.
///
/// Uses platform-appropriate locations with versioning:
/// - Linux: `$XDG_CACHE_HOME/lockreplay/v{N}` or `~/.cache/lockreplay/v{N}`
/// - macOS: `~/Library/Caches/lockreplay/v{N}`
/// - Windows: `%LOCALAPPDATA%\lockreplay\v{N}`
#[must_use]
pub fn cache_dir() -> PathBuf {
    let base = dirs_next::cache_dir().map_or_else(
        || {
            dirs_next::home_dir().map_or_else(
                || PathBuf::from(".lockreplay-cache"),
                |p| p.join(".cache").join("lockreplay"),
            )
        },
        |p| p.join("lockreplay"),
    );

    base.join(format!("v{SCHEMA_VERSION}"))
}
