//! Turning parsed packages into manifest sources.
//!
//! One emitter exists per lockfile dialect. Generation runs in two phases:
//!
//! 1. Every package is planned concurrently (bounded and order preserving).
//!    Planning may hit the network to recover digests and sizes.
//! 2. The plans are applied to a [`ManifestGenerator`] in package order,
//!    followed by the emitter's trailing sources (config files, registry
//!    documents, scripts).
//!
//! Any error aborts the run before a manifest exists.

pub mod cargo;
pub mod npm;
pub mod yarn;

pub use cargo::CargoEmitter;
pub use npm::NpmEmitter;
pub use yarn::YarnEmitter;

use crate::config::{CacheMode, Config};
use crate::git_repo::{discover_crates, GitCheckouts, GitCli, GitCrate, GitRepoError};
use crate::integrity::Integrity;
use crate::lockfile::{LockfileKind, LockfileProvider, LockfileSet, Package, ProviderOptions};
use crate::manifest::{DataContent, Manifest, ManifestError, ManifestGenerator};
use crate::transport::{RemoteUrlMetadata, Requests, TransportError};
use futures::{stream, StreamExt, TryStreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::hash::Hash;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OnceCell;

/// Crates of one repository checkout, by name.
pub type GitCrates = HashMap<String, GitCrate>;

/// One source a package needs, not yet added to a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedSource {
    Url {
        url: String,
        integrity: Integrity,
        destination: String,
    },
    Archive {
        url: String,
        integrity: Integrity,
        destination: String,
    },
    Git {
        url: String,
        commit: String,
        destination: String,
    },
    Data {
        content: DataContent,
        destination: String,
    },
    Command(String),
}

/// Everything one package contributes to the manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageSources {
    sources: Vec<PlannedSource>,
}

impl PackageSources {
    pub fn push(&mut self, source: PlannedSource) {
        self.sources.push(source);
    }

    #[must_use]
    pub fn sources(&self) -> &[PlannedSource] {
        &self.sources
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Add the planned sources to `gen`, in order.
    ///
    /// # Errors
    /// Returns the first error raised by the generator.
    pub fn apply(self, gen: &mut ManifestGenerator) -> Result<(), ManifestError> {
        for source in self.sources {
            match source {
                PlannedSource::Url {
                    url,
                    integrity,
                    destination,
                } => gen.add_url_source(&url, &integrity, Some(&destination))?,
                PlannedSource::Archive {
                    url,
                    integrity,
                    destination,
                } => gen.add_archive_source(&url, &integrity, Some(&destination))?,
                PlannedSource::Git {
                    url,
                    commit,
                    destination,
                } => gen.add_git_source(&url, &commit, Some(&destination))?,
                PlannedSource::Data {
                    content,
                    destination,
                } => gen.add_data_source(content, &destination)?,
                PlannedSource::Command(command) => gen.add_command(command),
            }
        }
        Ok(())
    }
}

/// Shared state for planning one run.
///
/// Everything fetched through the context is fetched at most once.
#[derive(Debug)]
pub struct EmitContext {
    requests: Requests,
    cache_bodies: bool,
    metadata: Mutex<HashMap<String, RemoteUrlMetadata>>,
    documents: Mutex<HashMap<String, Arc<OnceCell<Arc<Value>>>>>,
    git_checkouts: Arc<dyn GitCheckouts>,
    git_crates: Mutex<HashMap<(String, String), Arc<OnceCell<Arc<GitCrates>>>>>,
}

impl EmitContext {
    /// Context cloning git repositories into the user cache directory.
    #[must_use]
    pub fn new(requests: Requests) -> Self {
        Self {
            requests,
            cache_bodies: false,
            metadata: Mutex::new(HashMap::new()),
            documents: Mutex::new(HashMap::new()),
            git_checkouts: Arc::new(GitCli::new(crate::paths::cache_dir().join("git"))),
            git_crates: Mutex::new(HashMap::new()),
        }
    }

    /// Also store downloaded bodies in the transport cache. Meant for
    /// [`CacheMode::Disk`].
    #[must_use]
    pub fn with_cached_bodies(mut self, cache_bodies: bool) -> Self {
        self.cache_bodies = cache_bodies;
        self
    }

    #[must_use]
    pub fn with_git_checkouts(mut self, checkouts: Arc<dyn GitCheckouts>) -> Self {
        self.git_checkouts = checkouts;
        self
    }

    #[must_use]
    pub fn requests(&self) -> &Requests {
        &self.requests
    }

    /// Digest and size of `url`, fetched at most once per context.
    ///
    /// Bodies are streamed; unless [`with_cached_bodies`](Self::with_cached_bodies)
    /// is set, only the small result is kept.
    ///
    /// # Errors
    /// Returns the transport error if the download fails.
    pub async fn remote_metadata(&self, url: &str) -> Result<RemoteUrlMetadata, TransportError> {
        if let Some(found) = self.lookup(url) {
            return Ok(found);
        }

        tracing::debug!(url, "fetching remote metadata");
        let metadata = RemoteUrlMetadata::get(&self.requests, url, self.cache_bodies).await?;
        if let Ok(mut memo) = self.metadata.lock() {
            memo.insert(url.to_string(), metadata.clone());
        }
        Ok(metadata)
    }

    fn lookup(&self, url: &str) -> Option<RemoteUrlMetadata> {
        self.metadata.lock().ok()?.get(url).cloned()
    }

    /// The JSON document at `url`, such as a registry's package index.
    ///
    /// Concurrent callers share one request. The body is an API response and
    /// never enters the transport cache.
    ///
    /// # Errors
    /// Returns an error if the request fails or the body is not JSON.
    pub async fn json_document(&self, url: &str) -> crate::Result<Arc<Value>> {
        let cell = once_cell(&self.documents, url.to_string());
        let document = cell
            .get_or_try_init(|| async {
                tracing::debug!(url, "fetching document");
                let body = self.requests.read_all(url, false).await?;
                let value: Value =
                    serde_json::from_slice(&body).map_err(|e| TransportError::Body {
                        url: url.to_string(),
                        reason: e.to_string(),
                    })?;
                Ok::<_, crate::Error>(Arc::new(value))
            })
            .await?;
        Ok(Arc::clone(document))
    }

    /// A document already fetched through [`json_document`](Self::json_document).
    #[must_use]
    pub fn fetched_document(&self, url: &str) -> Option<Arc<Value>> {
        let documents = self.documents.lock().unwrap_or_else(PoisonError::into_inner);
        documents.get(url)?.get().cloned()
    }

    /// The crates of `url` at `commit`.
    ///
    /// The repository is checked out and searched once per context; the git
    /// work runs on the blocking thread pool.
    ///
    /// # Errors
    /// Returns an error if the checkout fails or a manifest is unreadable.
    pub async fn git_crates(&self, url: &str, commit: &str) -> crate::Result<Arc<GitCrates>> {
        let cell = once_cell(&self.git_crates, (url.to_string(), commit.to_string()));
        let crates = cell
            .get_or_try_init(|| async {
                let checkouts = Arc::clone(&self.git_checkouts);
                let (url, commit) = (url.to_string(), commit.to_string());
                let crates = tokio::task::spawn_blocking(move || {
                    let dir = checkouts.checkout(&url, &commit)?;
                    discover_crates(&dir)
                })
                .await
                .map_err(|e| GitRepoError::Spawn(io::Error::other(e)))??;
                Ok::<_, crate::Error>(Arc::new(crates))
            })
            .await?;
        Ok(Arc::clone(crates))
    }
}

/// The memo cell for `key`, created on first use.
fn once_cell<K, V>(map: &Mutex<HashMap<K, Arc<OnceCell<V>>>>, key: K) -> Arc<OnceCell<V>>
where
    K: Eq + Hash,
{
    let mut map = map.lock().unwrap_or_else(PoisonError::into_inner);
    Arc::clone(map.entry(key).or_default())
}

/// Source emitter for one lockfile dialect.
#[derive(Debug, Clone)]
pub enum SourceEmitter {
    Yarn(YarnEmitter),
    Npm(NpmEmitter),
    Cargo(CargoEmitter),
}

impl SourceEmitter {
    /// Emitter for `kind`, placing everything under `config.output_root`.
    #[must_use]
    pub fn new(kind: LockfileKind, config: &Config) -> Self {
        let root = root_prefix(&config.output_root);
        match kind {
            LockfileKind::Yarn => Self::Yarn(YarnEmitter::new(root)),
            LockfileKind::Npm => Self::Npm(
                NpmEmitter::new(root)
                    .with_registry(&config.npm_registry)
                    .with_autopatch(config.autopatch),
            ),
            LockfileKind::Cargo => Self::Cargo(CargoEmitter::new(root)),
        }
    }

    /// Plan the sources of one package.
    ///
    /// # Errors
    /// Returns an error if a needed download fails.
    pub async fn plan(&self, ctx: &EmitContext, package: &Package) -> crate::Result<PackageSources> {
        match self {
            Self::Yarn(e) => e.plan(ctx, package).await,
            Self::Npm(e) => e.plan(ctx, package).await,
            Self::Cargo(e) => e.plan(ctx, package).await,
        }
    }

    /// Add the sources that depend on the whole package set.
    ///
    /// # Errors
    /// Returns an error if the generator rejects a source.
    pub fn finalize(
        &self,
        ctx: &EmitContext,
        lockfiles: &LockfileSet,
        packages: &[Package],
        gen: &mut ManifestGenerator,
    ) -> crate::Result<()> {
        match self {
            Self::Yarn(e) => e.finalize(gen),
            Self::Npm(e) => e.finalize(ctx, lockfiles, packages, gen),
            Self::Cargo(e) => e.finalize(packages, gen),
        }
    }

    fn root(&self) -> &str {
        match self {
            Self::Yarn(e) => e.root(),
            Self::Npm(e) => e.root(),
            Self::Cargo(e) => e.root(),
        }
    }
}

/// Generate the manifest for a set of lockfiles of one dialect.
///
/// Packages of all lockfiles share one manifest; identical sources are
/// emitted once.
///
/// # Errors
/// Returns the first parse, transport or manifest error. No manifest is
/// produced in that case.
pub async fn generate_sources(
    config: &Config,
    requests: &Requests,
    kind: LockfileKind,
    lockfiles: &LockfileSet,
) -> crate::Result<Manifest> {
    let provider = LockfileProvider::new(
        kind,
        ProviderOptions {
            include_dev: config.include_dev,
        },
    );
    let mut packages = Vec::new();
    for lockfile in lockfiles.lockfiles() {
        packages.extend(provider.process_lockfile(lockfile)?);
    }

    let emitter = SourceEmitter::new(kind, config);
    let ctx = EmitContext::new(requests.clone())
        .with_cached_bodies(matches!(config.cache, CacheMode::Disk(_)))
        .with_git_checkouts(Arc::new(GitCli::new(&config.git_checkout_dir)));

    tracing::info!(
        lockfiles = lockfiles.lockfiles().len(),
        packages = packages.len(),
        limit = config.max_concurrent_fetches,
        "planning sources"
    );
    let plans: Vec<PackageSources> = stream::iter(packages.iter().map(|p| emitter.plan(&ctx, p)))
        .buffered(config.max_concurrent_fetches.max(1))
        .try_collect()
        .await?;

    let mut gen = ManifestGenerator::new();
    for plan in plans {
        plan.apply(&mut gen)?;
    }
    emitter.finalize(&ctx, lockfiles, &packages, &mut gen)?;

    if config.xdg_layout && matches!(kind, LockfileKind::Yarn | LockfileKind::Npm) {
        add_node_headers_setup(emitter.root(), &mut gen)?;
    }

    let manifest = gen.finish();
    tracing::info!(sources = manifest.len(), "generated manifest");
    Ok(manifest)
}

/// Make node-gyp find the SDK's node headers instead of downloading them.
///
/// The script links the headers of the `node` on `PATH` into the node-gyp
/// cache under `<root>/cache`.
fn add_node_headers_setup(root: &str, gen: &mut ManifestGenerator) -> crate::Result<()> {
    let node_gyp_dir = join(root, "cache/node-gyp");
    let commands = vec![
        r#"version=$(node --version | sed "s/^v//")"#.to_string(),
        r#"nodedir=$(dirname "$(dirname "$(which node)")")"#.to_string(),
        format!(r#"mkdir -p "{node_gyp_dir}/$version""#),
        format!(r#"ln -s "$nodedir/include" "{node_gyp_dir}/$version/include""#),
        format!(r#"echo 9 > "{node_gyp_dir}/$version/installVersion""#),
    ];

    let script = join(root, "setup_sdk_node_headers.sh");
    gen.add_script_source(commands, &script)?;
    gen.add_command(format!("bash {}", shell_quote(&script)));
    Ok(())
}

/// Destination prefix for `root`, without a trailing slash.
fn root_prefix(root: &Path) -> String {
    let root = root.to_string_lossy();
    let trimmed = root.trim_end_matches('/');
    if trimmed == "." {
        String::new()
    } else {
        trimmed.to_string()
    }
}

/// `root/rest`, or just `rest` for an empty root.
pub(crate) fn join(root: &str, rest: &str) -> String {
    if root.is_empty() {
        rest.to_string()
    } else {
        format!("{root}/{rest}")
    }
}

/// Quote `text` for a POSIX shell.
#[must_use]
pub fn shell_quote(text: &str) -> String {
    let safe = |c: char| c.is_ascii_alphanumeric() || "@%+=:,./-_".contains(c);
    if !text.is_empty() && text.chars().all(safe) {
        return text.to_string();
    }
    format!("'{}'", text.replace('\'', "'\"'\"'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Source;

    const COMMIT: &str = "0123456789abcdef0123456789abcdef01234567";

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("offline-deps/git/a-1"), "offline-deps/git/a-1");
        assert_eq!(shell_quote("has space"), "'has space'");
        assert_eq!(shell_quote("it's"), "'it'\"'\"'s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_root_prefix() {
        assert_eq!(root_prefix(Path::new("offline-deps/")), "offline-deps");
        assert_eq!(root_prefix(Path::new(".")), "");
        assert_eq!(join("", "a"), "a");
        assert_eq!(join("r", "a"), "r/a");
    }

    #[test]
    fn test_apply_in_order() {
        let mut plan = PackageSources::default();
        plan.push(PlannedSource::Git {
            url: "https://example.com/r.git".into(),
            commit: COMMIT.into(),
            destination: "git/r".into(),
        });
        plan.push(PlannedSource::Command("echo one".into()));
        plan.push(PlannedSource::Command("echo two".into()));
        plan.push(PlannedSource::Data {
            content: DataContent::Text("x".into()),
            destination: "d/x.txt".into(),
        });

        let mut gen = ManifestGenerator::new();
        plan.apply(&mut gen).unwrap();
        let manifest = gen.finish();

        assert_eq!(manifest.len(), 3);
        assert_eq!(
            manifest.sources()[1],
            Source::Command {
                commands: vec!["echo one".into(), "echo two".into()]
            }
        );
    }

    #[test]
    fn test_node_headers_setup() {
        let mut gen = ManifestGenerator::new();
        add_node_headers_setup("deps", &mut gen).unwrap();
        let manifest = gen.finish();

        let Source::Script { script, dest, dest_filename } = &manifest.sources()[0] else {
            panic!("expected script");
        };
        assert_eq!(dest.as_deref(), Some("deps"));
        assert_eq!(dest_filename, "setup_sdk_node_headers.sh");
        assert!(script.commands()[2].contains("deps/cache/node-gyp/$version"));
        assert_eq!(
            manifest.sources()[1],
            Source::Command {
                commands: vec!["bash deps/setup_sdk_node_headers.sh".into()]
            }
        );
    }

    #[tokio::test]
    async fn test_json_document_fetched_once() {
        use std::time::Duration;
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/left-pad"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"versions": {}}"#)
                    .set_delay(Duration::from_millis(50)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let config = Config::default().with_retry_base_delay(Duration::ZERO);
        let ctx = EmitContext::new(Requests::new(&config).unwrap());
        let url = format!("{}/left-pad", server.uri());

        assert!(ctx.fetched_document(&url).is_none());
        let (a, b) = tokio::join!(ctx.json_document(&url), ctx.json_document(&url));
        assert_eq!(a.unwrap(), b.unwrap());
        assert!(ctx.fetched_document(&url).is_some());
    }

    #[test]
    fn test_apply_surfaces_manifest_error() {
        let mut plan = PackageSources::default();
        plan.push(PlannedSource::Git {
            url: "https://example.com/r.git".into(),
            commit: "main".into(),
            destination: "git/r".into(),
        });
        let err = plan.apply(&mut ManifestGenerator::new()).unwrap_err();
        assert!(matches!(err, ManifestError::InvalidPin { .. }));
    }
}
