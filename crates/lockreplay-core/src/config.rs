use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default directory, relative to the build root, that receives all sources.
pub const DEFAULT_OUTPUT_ROOT: &str = "offline-deps";

/// npm registry used when no `.npmrc` scope applies.
pub const DEFAULT_NPM_REGISTRY: &str = "https://registry.npmjs.org";

/// Runtime configuration for a generation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Current working directory.
    pub cwd: PathBuf,

    /// Whether to emit JSON logs.
    pub json_logs: bool,

    /// Verbosity level (0 = INFO, 1 = DEBUG, 2+ = TRACE).
    pub verbosity: u8,

    /// Directory prefix for every generated destination.
    pub output_root: PathBuf,

    /// Keep development-only packages.
    pub include_dev: bool,

    /// Registry for npm entries that record no download URL.
    pub npm_registry: String,

    /// Run the npm patch scripts as part of the build.
    pub autopatch: bool,

    /// Point node-gyp at the SDK's node headers under `<output_root>/cache`.
    pub xdg_layout: bool,

    /// Where git repositories are cloned to inspect Cargo workspaces.
    pub git_checkout_dir: PathBuf,

    /// Packages processed concurrently by an emitter.
    pub max_concurrent_fetches: usize,

    /// Total attempts per request, first try included.
    pub retries: u32,

    /// First backoff delay; doubles on every retry.
    pub retry_base_delay: Duration,

    pub connect_timeout: Duration,

    pub request_timeout: Duration,

    /// Where cachable downloads are memoized.
    pub cache: CacheMode,
}

/// Where the transport keeps cachable content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    /// In memory, for the lifetime of the process.
    #[default]
    Memory,
    /// On disk under the given directory, shared between runs.
    Disk(PathBuf),
    /// Never cache.
    Disabled,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            json_logs: false,
            verbosity: 0,
            output_root: PathBuf::from(DEFAULT_OUTPUT_ROOT),
            include_dev: true,
            npm_registry: DEFAULT_NPM_REGISTRY.to_string(),
            autopatch: true,
            xdg_layout: true,
            git_checkout_dir: crate::paths::cache_dir().join("git"),
            max_concurrent_fetches: 16,
            retries: 3,
            retry_base_delay: Duration::from_millis(200),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(60),
            cache: CacheMode::default(),
        }
    }
}

impl Config {
    /// Create a new config with the given working directory.
    #[must_use]
    pub fn new(cwd: PathBuf) -> Self {
        Self {
            cwd,
            ..Default::default()
        }
    }

    /// Set verbosity level.
    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Set JSON log output.
    #[must_use]
    pub fn with_json_logs(mut self, json: bool) -> Self {
        self.json_logs = json;
        self
    }

    #[must_use]
    pub fn with_output_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.output_root = root.into();
        self
    }

    #[must_use]
    pub fn with_include_dev(mut self, include_dev: bool) -> Self {
        self.include_dev = include_dev;
        self
    }

    #[must_use]
    pub fn with_npm_registry(mut self, registry: impl Into<String>) -> Self {
        self.npm_registry = registry.into();
        self
    }

    #[must_use]
    pub fn with_autopatch(mut self, autopatch: bool) -> Self {
        self.autopatch = autopatch;
        self
    }

    #[must_use]
    pub fn with_xdg_layout(mut self, xdg_layout: bool) -> Self {
        self.xdg_layout = xdg_layout;
        self
    }

    #[must_use]
    pub fn with_git_checkout_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.git_checkout_dir = dir.into();
        self
    }

    /// Cap concurrent package fetches. Zero is treated as one.
    #[must_use]
    pub fn with_max_concurrent_fetches(mut self, limit: usize) -> Self {
        self.max_concurrent_fetches = limit.max(1);
        self
    }

    /// Set the attempt budget per request. Zero is treated as one.
    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries.max(1);
        self
    }

    #[must_use]
    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    #[must_use]
    pub fn with_cache(mut self, cache: CacheMode) -> Self {
        self.cache = cache;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::new(PathBuf::from("/work"));
        assert_eq!(config.cwd, PathBuf::from("/work"));
        assert_eq!(config.retries, 3);
        assert_eq!(config.max_concurrent_fetches, 16);
        assert_eq!(config.output_root, PathBuf::from(DEFAULT_OUTPUT_ROOT));
        assert_eq!(config.cache, CacheMode::Memory);
        assert!(config.include_dev);
        assert!(config.autopatch);
        assert!(config.xdg_layout);
        assert_eq!(config.npm_registry, DEFAULT_NPM_REGISTRY);
        assert!(config.git_checkout_dir.ends_with("git"));
    }

    #[test]
    fn test_builders_clamp_zero() {
        let config = Config::default()
            .with_retries(0)
            .with_max_concurrent_fetches(0);
        assert_eq!(config.retries, 1);
        assert_eq!(config.max_concurrent_fetches, 1);
    }

    #[test]
    fn test_cache_mode_serde() {
        let json = serde_json::to_string(&CacheMode::Disabled).unwrap();
        assert_eq!(json, "\"disabled\"");
        let mode: CacheMode = serde_json::from_str("{\"disk\":\"/tmp/c\"}").unwrap();
        assert_eq!(mode, CacheMode::Disk(PathBuf::from("/tmp/c")));
    }
}
