//! Sources for a pre-populated npm cache.
//!
//! Tarballs are placed into npm's content-addressed cache under
//! `<root>/npm-cache/_cacache`, together with the index entries npm uses to
//! find them by URL. Packages the lockfile pins only by version are looked up
//! in their registry; the trimmed package index is cached as well so an
//! offline `npm install` can resolve them.
//!
//! Git dependencies are checked out under `<root>/git-packages`. One patch
//! script per lockfile rewrites `package.json` and the lockfile to point at
//! the checkouts, and `<root>/patch-all.sh` runs them all.

use super::{join, shell_quote, EmitContext, PackageSources, PlannedSource};
use crate::config::DEFAULT_NPM_REGISTRY;
use crate::integrity::{Algorithm, Integrity};
use crate::lockfile::{GitSource, LockfileSet, Npmrc, Package, PackageSource};
use crate::manifest::{DataContent, ManifestGenerator};
use crate::Error;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

const PACKAGE_JSON_FILTER: &str = concat!(
    r#"walk(if type == "object" then to_entries | map("#,
    r#"if (.value | type == "string") and $data[.value] "#,
    r#"then .value = "git+file:\($buildroot)/\($data[.value])" else . end"#,
    r#") | from_entries else . end)"#,
);

const PACKAGE_LOCK_FILTER: &str = concat!(
    r#"walk(if type == "object" then with_entries("#,
    r#"if (.key == "version" or .key == "resolved") and (.value | type == "string") and $data[.value] "#,
    r#"then .value = "git+file:\($buildroot)/\($data[.value])" else . end"#,
    r#") else . end)"#,
);

/// `Accept` header npm sends for abbreviated package documents.
const NPM_CORGIDOC: &str =
    "application/vnd.npm.install-v1+json; q=1.0, application/json; q=0.8, */*";

/// Emitter for npm lockfiles.
#[derive(Debug, Clone)]
pub struct NpmEmitter {
    root: String,
    registry: String,
    autopatch: bool,
    /// `.npmrc` per lockfile directory.
    npmrc: Arc<Mutex<HashMap<PathBuf, Arc<Npmrc>>>>,
}

impl NpmEmitter {
    #[must_use]
    pub fn new(root: String) -> Self {
        Self {
            root,
            registry: DEFAULT_NPM_REGISTRY.to_string(),
            autopatch: true,
            npmrc: Arc::default(),
        }
    }

    /// Registry for packages no `.npmrc` scope claims.
    #[must_use]
    pub fn with_registry(mut self, registry: &str) -> Self {
        self.registry = registry.trim_end_matches('/').to_string();
        self
    }

    /// Run the patch scripts during the build. Without it they are only
    /// written.
    #[must_use]
    pub fn with_autopatch(mut self, autopatch: bool) -> Self {
        self.autopatch = autopatch;
        self
    }

    pub(crate) fn root(&self) -> &str {
        &self.root
    }

    /// npm's `_cacache` directory.
    #[must_use]
    pub fn cacache_dir(&self) -> String {
        join(&self.root, "npm-cache/_cacache")
    }

    /// Where content with `integrity` lives in the cache.
    #[must_use]
    pub fn content_path(&self, integrity: &Integrity) -> String {
        format!(
            "{}/content-v2/{}/{}",
            self.cacache_dir(),
            integrity.algorithm(),
            split_digest(&integrity.to_hex())
        )
    }

    /// Where the index bucket for cache `key` lives.
    #[must_use]
    pub fn index_path(&self, key: &str) -> String {
        let bucket = Integrity::sha256(key).to_hex();
        format!("{}/index-v5/{}", self.cacache_dir(), split_digest(&bucket))
    }

    /// URL of the registry's package index for `package`.
    ///
    /// A `@scope:registry` line in the `.npmrc` next to the package's
    /// lockfile wins over the configured registry.
    #[must_use]
    pub fn package_index_url(&self, package: &Package) -> String {
        let dir = package.lockfile.parent().unwrap_or(Path::new(""));
        let npmrc = self.npmrc_for(dir);
        let registry = npmrc
            .registry_for(&package.name, &self.registry)
            .trim_end_matches('/');
        format!("{registry}/{}", package.name.replace('/', "%2f"))
    }

    fn npmrc_for(&self, dir: &Path) -> Arc<Npmrc> {
        let mut loaded = self.npmrc.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            loaded
                .entry(dir.to_path_buf())
                .or_insert_with(|| Arc::new(Npmrc::load(dir))),
        )
    }

    fn git_dir(&self, package: &Package, git: &GitSource) -> String {
        join(&self.root, &format!("git-packages/{}-{}", package.name, git.commit))
    }

    pub(crate) async fn plan(
        &self,
        ctx: &EmitContext,
        package: &Package,
    ) -> crate::Result<PackageSources> {
        let mut plan = PackageSources::default();

        match &package.source {
            PackageSource::Resolved(source) => {
                self.plan_tarball(ctx, package, &source.resolved, source.integrity.clone(), &mut plan)
                    .await?;
            }
            PackageSource::Registry(source) => {
                let (tarball, integrity) = self
                    .resolve_from_registry(ctx, package, source.integrity.as_ref())
                    .await?;
                self.plan_tarball(ctx, package, &tarball, integrity, &mut plan)
                    .await?;
            }
            PackageSource::Git(git) => {
                plan.push(PlannedSource::Git {
                    url: git.url.clone(),
                    commit: git.commit.clone(),
                    destination: self.git_dir(package, git),
                });
            }
            PackageSource::Local(local) => {
                tracing::debug!(name = %package.name, path = %local.path, "local package, nothing to fetch");
            }
        }

        Ok(plan)
    }

    /// Tarball URL and digest of a version-pinned package, from its registry.
    async fn resolve_from_registry(
        &self,
        ctx: &EmitContext,
        package: &Package,
        recorded: Option<&Integrity>,
    ) -> crate::Result<(String, Option<Integrity>)> {
        let url = self.package_index_url(package);
        let index = ctx.json_document(&url).await?;

        let lookup_error = |reason: &str| Error::RegistryLookup {
            name: package.name.clone(),
            version: package.version.clone(),
            url: url.clone(),
            reason: reason.to_string(),
        };

        let versions = index
            .get("versions")
            .and_then(Value::as_object)
            .ok_or_else(|| lookup_error("the package index lists no versions"))?;
        let dist = versions
            .get(&package.version)
            .and_then(|v| v.get("dist"))
            .ok_or_else(|| lookup_error("the version is not in the package index"))?;
        let tarball = dist
            .get("tarball")
            .and_then(Value::as_str)
            .ok_or_else(|| lookup_error("the version has no dist.tarball"))?;

        let found = if let Some(sri) = dist.get("integrity").and_then(Value::as_str) {
            Some(Integrity::parse(sri.split_whitespace().next().unwrap_or_default())?)
        } else if let Some(shasum) = dist.get("shasum").and_then(Value::as_str) {
            Some(Integrity::from_hex(Algorithm::Sha1, shasum)?)
        } else {
            None
        };

        if let (Some(recorded), Some(found)) = (recorded, &found) {
            if recorded.conflicts_with(found) {
                return Err(Error::IntegrityMismatch {
                    name: package.name.clone(),
                    origin: url,
                    recorded: recorded.clone(),
                    found: found.clone(),
                });
            }
        }

        tracing::debug!(name = %package.name, version = %package.version, tarball, "resolved from registry");
        Ok((tarball.to_string(), recorded.cloned().or(found)))
    }

    async fn plan_tarball(
        &self,
        ctx: &EmitContext,
        package: &Package,
        url: &str,
        recorded: Option<Integrity>,
        plan: &mut PackageSources,
    ) -> crate::Result<()> {
        // The index records the size, so the tarball is streamed either way
        let metadata = ctx.remote_metadata(url).await?;
        let integrity = match recorded {
            Some(recorded) if recorded.conflicts_with(&metadata.integrity) => {
                return Err(Error::IntegrityMismatch {
                    name: package.name.clone(),
                    origin: url.to_string(),
                    recorded,
                    found: metadata.integrity,
                });
            }
            Some(recorded) => recorded,
            None => metadata.integrity.clone(),
        };

        let key = cache_key(url);
        plan.push(PlannedSource::Url {
            url: url.to_string(),
            integrity: integrity.clone(),
            destination: self.content_path(&integrity),
        });
        plan.push(PlannedSource::Data {
            content: DataContent::Text(index_entry(&key, url, &integrity, metadata.size, json!({}))),
            destination: self.index_path(&key),
        });
        Ok(())
    }

    /// Add the cached package indexes and the git patch scripts.
    pub(crate) fn finalize(
        &self,
        ctx: &EmitContext,
        lockfiles: &LockfileSet,
        packages: &[Package],
        gen: &mut ManifestGenerator,
    ) -> crate::Result<()> {
        self.add_package_indexes(ctx, packages, gen)?;
        self.add_patch_scripts(lockfiles, packages, gen)
    }

    /// Cache each fetched package index, trimmed to the versions in use.
    fn add_package_indexes(
        &self,
        ctx: &EmitContext,
        packages: &[Package],
        gen: &mut ManifestGenerator,
    ) -> crate::Result<()> {
        let mut used: BTreeMap<String, BTreeSet<&str>> = BTreeMap::new();
        for package in packages {
            if let PackageSource::Registry(_) = &package.source {
                used.entry(self.package_index_url(package))
                    .or_default()
                    .insert(&package.version);
            }
        }

        for (url, versions) in used {
            let Some(document) = ctx.fetched_document(&url) else {
                continue;
            };
            let raw = trim_index(&document, &versions).to_string();
            let integrity = Integrity::sha256(&raw);
            let size = raw.len() as u64;
            let key = cache_key(&url);

            gen.add_data_source(raw, &self.content_path(&integrity))?;
            gen.add_data_source(
                index_entry(&key, &url, &integrity, size, json!({ "accept": NPM_CORGIDOC })),
                &self.index_path(&key),
            )?;
        }
        Ok(())
    }

    /// One script per lockfile, `patch-all.sh` running them, and the
    /// command running `patch-all.sh` unless autopatch is off.
    fn add_patch_scripts(
        &self,
        lockfiles: &LockfileSet,
        packages: &[Package],
        gen: &mut ManifestGenerator,
    ) -> crate::Result<()> {
        let mut patch_all = Vec::new();

        for lockfile in lockfiles.lockfiles() {
            let relative = lockfiles.relative_dir(lockfile);
            let lockfile_name = lockfile
                .file_name()
                .map_or_else(|| "package-lock.json".into(), |n| n.to_string_lossy());

            let mut manifest_data = Map::new();
            let mut lock_data = Map::new();
            for package in packages.iter().filter(|p| p.lockfile == *lockfile) {
                let PackageSource::Git(git) = &package.source else {
                    continue;
                };
                let target = Value::from(format!("{}#{}", self.git_dir(package, git), git.commit));

                for spec in with_unprefixed(&git.original) {
                    lock_data.insert(spec, target.clone());
                }
                if let Some(from) = &git.from {
                    for spec in with_unprefixed(from) {
                        manifest_data.insert(spec, target.clone());
                    }
                }
            }

            let mut commands = Vec::new();
            for (file, filter, data) in [
                ("package.json", PACKAGE_JSON_FILTER, manifest_data),
                (lockfile_name.as_ref(), PACKAGE_LOCK_FILTER, lock_data),
            ] {
                if data.is_empty() {
                    continue;
                }
                let in_project = relative.join(file);
                let target = format!("$FLATPAK_BUILDER_BUILDDIR/{}", in_project.to_string_lossy());
                commands.push(format!(
                    "jq --arg buildroot \"$FLATPAK_BUILDER_BUILDDIR\" --argjson data {} {} \"{target}\" > \"{target}.new\"",
                    shell_quote(&Value::Object(data).to_string()),
                    shell_quote(filter),
                ));
                commands.push(format!("mv \"{target}.new\" \"{target}\""));
            }

            let script = if relative.as_os_str().is_empty() {
                join(&self.root, "patch.sh")
            } else {
                join(&self.root, &format!("patch/{}.sh", relative.to_string_lossy()))
            };
            gen.add_script_source(commands, &script)?;
            patch_all.push(format!("\"$FLATPAK_BUILDER_BUILDDIR\"/{}", shell_quote(&script)));
        }

        let script = join(&self.root, "patch-all.sh");
        gen.add_script_source(patch_all, &script)?;
        if self.autopatch {
            gen.add_command(format!("FLATPAK_BUILDER_BUILDDIR=$PWD {}", shell_quote(&script)));
        }
        Ok(())
    }
}

fn cache_key(url: &str) -> String {
    format!("make-fetch-happen:request-cache:{url}")
}

/// `abcdef...` as `ab/cd/ef...`.
fn split_digest(hex: &str) -> String {
    format!("{}/{}/{}", &hex[..2], &hex[2..4], &hex[4..])
}

/// `spec`, plus `spec` without its `git+` prefix if it has one.
fn with_unprefixed(spec: &str) -> Vec<String> {
    let mut specs = vec![spec.to_string()];
    if let Some(rest) = spec.strip_prefix("git+") {
        specs.push(rest.to_string());
    }
    specs
}

/// A package index reduced to the `versions` in `keep`.
fn trim_index(document: &Value, keep: &BTreeSet<&str>) -> Value {
    let versions: Map<String, Value> = document
        .get("versions")
        .and_then(Value::as_object)
        .into_iter()
        .flatten()
        .filter(|(version, _)| keep.contains(version.as_str()))
        .map(|(version, data)| (version.clone(), data.clone()))
        .collect();
    json!({ "versions": versions })
}

/// One cacache index line: sha1 of the JSON entry, a tab, the entry.
fn index_entry(key: &str, url: &str, integrity: &Integrity, size: u64, req_headers: Value) -> String {
    let entry = json!({
        "key": key,
        "integrity": integrity.to_string(),
        "time": 0,
        "size": size,
        "metadata": {
            "url": url,
            "reqHeaders": req_headers,
            "resHeaders": {},
        },
    })
    .to_string();

    let checksum = Integrity::generate(&entry, Algorithm::Sha1).to_hex();
    format!("{checksum}\t{entry}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::lockfile::{RegistrySource, ResolvedSource};
    use crate::manifest::{ScriptSource, Source};
    use crate::transport::Requests;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const COMMIT: &str = "0123456789abcdef0123456789abcdef01234567";

    fn context() -> EmitContext {
        let config = Config::default().with_retry_base_delay(Duration::ZERO);
        EmitContext::new(Requests::new(&config).unwrap())
    }

    fn git_package(from: Option<&str>) -> Package {
        Package {
            lockfile: "package-lock.json".into(),
            name: "gitdep".into(),
            version: "3.0.0".into(),
            source: PackageSource::Git(GitSource {
                original: format!("git+ssh://git@github.com/owner/gitdep.git#{COMMIT}"),
                url: "ssh://git@github.com/owner/gitdep.git".into(),
                commit: COMMIT.into(),
                from: from.map(str::to_string),
            }),
        }
    }

    #[test]
    fn test_content_path() {
        let emitter = NpmEmitter::new("offline-deps".into());
        let integrity = Integrity::sha256(b"");
        assert_eq!(
            emitter.content_path(&integrity),
            "offline-deps/npm-cache/_cacache/content-v2/sha256/e3/b0/c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_index_entry_checksum() {
        let integrity = Integrity::sha256(b"tarball");
        let line = index_entry(&cache_key("https://x/a.tgz"), "https://x/a.tgz", &integrity, 7, json!({}));

        let (checksum, entry) = line.split_once('\t').unwrap();
        assert_eq!(checksum, Integrity::generate(entry, Algorithm::Sha1).to_hex());

        let parsed: Value = serde_json::from_str(entry).unwrap();
        assert_eq!(parsed["key"], "make-fetch-happen:request-cache:https://x/a.tgz");
        assert_eq!(parsed["integrity"], integrity.to_string());
        assert_eq!(parsed["size"], 7);
        assert_eq!(parsed["metadata"]["url"], "https://x/a.tgz");
    }

    #[tokio::test]
    async fn test_tarball_plan() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/zeta/-/zeta-1.0.0.tgz"))
            .respond_with(ResponseTemplate::new(200).set_body_string("zeta tarball"))
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/zeta/-/zeta-1.0.0.tgz", server.uri());
        let recorded = Integrity::generate(b"zeta tarball", Algorithm::Sha512);
        let pkg = Package {
            lockfile: "package-lock.json".into(),
            name: "zeta".into(),
            version: "1.0.0".into(),
            source: PackageSource::Resolved(ResolvedSource {
                resolved: url.clone(),
                integrity: Some(recorded.clone()),
            }),
        };

        let emitter = NpmEmitter::new("deps".into());
        let ctx = context();
        let plan = emitter.plan(&ctx, &pkg).await.unwrap();
        // second plan for the same URL reuses the metadata
        emitter.plan(&ctx, &pkg).await.unwrap();

        let [PlannedSource::Url { destination, integrity, .. }, PlannedSource::Data { content, destination: index }] =
            plan.sources()
        else {
            panic!("unexpected plan {plan:?}");
        };

        assert_eq!(*integrity, recorded);
        assert!(destination.starts_with("deps/npm-cache/_cacache/content-v2/sha512/"));
        assert_eq!(*index, emitter.index_path(&cache_key(&url)));

        let DataContent::Text(line) = content else {
            panic!("index entry should be text");
        };
        assert!(line.contains("\"size\":12"));
    }

    #[tokio::test]
    async fn test_git_plan() {
        let emitter = NpmEmitter::new("deps".into());
        let plan = emitter.plan(&context(), &git_package(None)).await.unwrap();
        assert_eq!(
            plan.sources(),
            [PlannedSource::Git {
                url: "ssh://git@github.com/owner/gitdep.git".into(),
                commit: COMMIT.into(),
                destination: format!("deps/git-packages/gitdep-{COMMIT}"),
            }]
        );
    }

    fn registry_package(name: &str, version: &str, lockfile: &Path, integrity: Option<Integrity>) -> Package {
        Package {
            lockfile: lockfile.to_path_buf(),
            name: name.into(),
            version: version.into(),
            source: PackageSource::Registry(RegistrySource { integrity }),
        }
    }

    async fn mount_package_index(server: &MockServer, route: &str, tarball_path: &str, dist_integrity: &Integrity) {
        let index = json!({
            "name": "left-pad",
            "dist-tags": { "latest": "1.3.0" },
            "versions": {
                "1.2.0": { "dist": { "tarball": format!("{}/old.tgz", server.uri()) } },
                "1.3.0": { "dist": {
                    "tarball": format!("{}{tarball_path}", server.uri()),
                    "integrity": dist_integrity.to_string(),
                } },
            },
        });
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_json(index))
            .expect(1)
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path(tarball_path))
            .respond_with(ResponseTemplate::new(200).set_body_string("left-pad tarball"))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_registry_entry_resolved_through_package_index() {
        let server = MockServer::start().await;
        let recorded = Integrity::generate(b"left-pad tarball", Algorithm::Sha512);
        mount_package_index(&server, "/left-pad", "/left-pad/-/left-pad-1.3.0.tgz", &recorded).await;

        let dir = tempfile::tempdir().unwrap();
        let lockfile = dir.path().join("package-lock.json");
        let pkg = registry_package("left-pad", "1.3.0", &lockfile, Some(recorded.clone()));

        let emitter = NpmEmitter::new("deps".into()).with_registry(&format!("{}/", server.uri()));
        let ctx = context();
        let plan = emitter.plan(&ctx, &pkg).await.unwrap();

        let [PlannedSource::Url { url, integrity, .. }, PlannedSource::Data { .. }] = plan.sources() else {
            panic!("unexpected plan {plan:?}");
        };
        assert_eq!(*url, format!("{}/left-pad/-/left-pad-1.3.0.tgz", server.uri()));
        assert_eq!(*integrity, recorded);

        let mut gen = ManifestGenerator::new();
        emitter
            .add_package_indexes(&ctx, std::slice::from_ref(&pkg), &mut gen)
            .unwrap();
        let manifest = gen.finish();
        assert_eq!(manifest.len(), 2);

        let index_url = format!("{}/left-pad", server.uri());
        let cached = manifest.sources()[0].to_value();
        let document: Value = serde_json::from_str(cached["contents"].as_str().unwrap()).unwrap();
        // only the version in use survives, and nothing but versions
        assert_eq!(document.as_object().unwrap().len(), 1);
        assert_eq!(
            document["versions"].as_object().unwrap().keys().collect::<Vec<_>>(),
            vec!["1.3.0"]
        );

        let entry = manifest.sources()[1].to_value();
        assert_eq!(
            format!("{}/{}", entry["dest"].as_str().unwrap(), entry["dest-filename"].as_str().unwrap()),
            emitter.index_path(&cache_key(&index_url))
        );
        let line = entry["contents"].as_str().unwrap();
        let (_, json_entry) = line.split_once('\t').unwrap();
        let parsed: Value = serde_json::from_str(json_entry).unwrap();
        assert_eq!(parsed["metadata"]["reqHeaders"]["accept"], NPM_CORGIDOC);
        assert_eq!(parsed["metadata"]["url"], index_url.as_str());
    }

    #[tokio::test]
    async fn test_registry_entry_without_integrity_uses_registry_digest() {
        let server = MockServer::start().await;
        let published = Integrity::generate(b"left-pad tarball", Algorithm::Sha512);
        mount_package_index(&server, "/left-pad", "/lp.tgz", &published).await;

        let pkg = registry_package("left-pad", "1.3.0", Path::new("package-lock.json"), None);
        let emitter = NpmEmitter::new("deps".into()).with_registry(&server.uri());
        let plan = emitter.plan(&context(), &pkg).await.unwrap();

        let PlannedSource::Url { integrity, .. } = &plan.sources()[0] else {
            panic!("expected url source");
        };
        assert_eq!(*integrity, published);
    }

    #[tokio::test]
    async fn test_scoped_registry_from_npmrc() {
        let server = MockServer::start().await;
        let recorded = Integrity::generate(b"left-pad tarball", Algorithm::Sha512);
        mount_package_index(&server, "/acme/@acme%2fwidget", "/acme/widget-1.3.0.tgz", &recorded).await;

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(".npmrc"),
            format!("@acme:registry={}/acme/\n", server.uri()),
        )
        .unwrap();
        let lockfile = dir.path().join("package-lock.json");
        let pkg = registry_package("@acme/widget", "1.3.0", &lockfile, Some(recorded));

        // the default registry is never contacted
        let emitter = NpmEmitter::new("deps".into()).with_registry("http://127.0.0.1:1");
        assert_eq!(
            emitter.package_index_url(&pkg),
            format!("{}/acme/@acme%2fwidget", server.uri())
        );
        emitter.plan(&context(), &pkg).await.unwrap();
    }

    #[tokio::test]
    async fn test_registry_integrity_mismatch() {
        let server = MockServer::start().await;
        let published = Integrity::generate(b"left-pad tarball", Algorithm::Sha512);
        mount_package_index(&server, "/left-pad", "/lp.tgz", &published).await;

        let recorded = Integrity::generate(b"something else", Algorithm::Sha512);
        let pkg = registry_package("left-pad", "1.3.0", Path::new("package-lock.json"), Some(recorded));
        let err = NpmEmitter::new("deps".into())
            .with_registry(&server.uri())
            .plan(&context(), &pkg)
            .await
            .unwrap_err();

        assert_eq!(err.code(), crate::codes::INTEGRITY_MISMATCH);
        assert!(err.to_string().contains("left-pad"));
    }

    #[tokio::test]
    async fn test_registry_version_missing() {
        let server = MockServer::start().await;
        let published = Integrity::generate(b"left-pad tarball", Algorithm::Sha512);
        mount_package_index(&server, "/left-pad", "/lp.tgz", &published).await;

        let pkg = registry_package("left-pad", "9.9.9", Path::new("package-lock.json"), None);
        let err = NpmEmitter::new("deps".into())
            .with_registry(&server.uri())
            .plan(&context(), &pkg)
            .await
            .unwrap_err();

        assert_eq!(err.code(), crate::codes::REGISTRY_LOOKUP_FAILED);
        assert!(err.to_string().contains("left-pad@9.9.9"));
    }

    #[tokio::test]
    async fn test_download_contradicting_recorded_sha256() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("tampered"))
            .mount(&server)
            .await;

        let pkg = Package {
            lockfile: "package-lock.json".into(),
            name: "zeta".into(),
            version: "1.0.0".into(),
            source: PackageSource::Resolved(ResolvedSource {
                resolved: format!("{}/zeta.tgz", server.uri()),
                integrity: Some(Integrity::sha256(b"original")),
            }),
        };
        let err = NpmEmitter::new("deps".into())
            .plan(&context(), &pkg)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::IntegrityMismatch { .. }), "unexpected error: {err}");
    }

    #[test]
    fn test_patch_script_for_git() {
        let emitter = NpmEmitter::new("deps".into());
        let mut gen = ManifestGenerator::new();
        emitter
            .finalize(
                &context(),
                &LockfileSet::single("package-lock.json"),
                &[git_package(Some("github:owner/gitdep"))],
                &mut gen,
            )
            .unwrap();
        let manifest = gen.finish();

        let ordered: Vec<&Source> = manifest.ordered_sources().collect();
        assert_eq!(ordered.len(), 3);

        let Source::Script { script, dest, dest_filename } = ordered[0] else {
            panic!("expected script");
        };
        assert_eq!(dest.as_deref(), Some("deps"));
        assert_eq!(dest_filename, "patch.sh");
        assert_eq!(script.commands().len(), 4);
        assert!(script.commands()[0].starts_with("jq "));
        assert!(script.commands()[0].contains("github:owner/gitdep"));
        assert!(script.commands()[0].contains("\"$FLATPAK_BUILDER_BUILDDIR/package.json\""));
        assert!(script.commands()[2].contains("ssh://git@github.com/owner/gitdep.git#"));
        assert!(script.contents().starts_with("#!/bin/sh\n"));

        let Source::Script { script: all, dest_filename, .. } = ordered[1] else {
            panic!("expected script");
        };
        assert_eq!(dest_filename, "patch-all.sh");
        assert_eq!(all.commands(), ["\"$FLATPAK_BUILDER_BUILDDIR\"/deps/patch.sh"]);

        assert_eq!(
            ordered[2],
            &Source::Command {
                commands: vec!["FLATPAK_BUILDER_BUILDDIR=$PWD deps/patch-all.sh".into()]
            }
        );
    }

    #[test]
    fn test_patch_scripts_per_lockfile() {
        let dir = tempfile::tempdir().unwrap();
        for rel in ["package-lock.json", "packages/web/package-lock.json"] {
            let path = dir.path().join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, "{}").unwrap();
        }
        let lockfiles = LockfileSet::scan(&dir.path().join("package-lock.json"), &[]).unwrap();

        let mut nested = git_package(None);
        nested.lockfile = dir.path().join("packages/web/package-lock.json");

        let mut gen = ManifestGenerator::new();
        NpmEmitter::new("deps".into())
            .with_autopatch(false)
            .finalize(&context(), &lockfiles, &[nested], &mut gen)
            .unwrap();
        let manifest = gen.finish();

        let scripts: Vec<(String, &ScriptSource)> = manifest
            .sources()
            .iter()
            .filter_map(|s| match s {
                Source::Script { script, dest, dest_filename } => Some((
                    format!("{}/{dest_filename}", dest.as_deref().unwrap_or_default()),
                    script,
                )),
                _ => None,
            })
            .collect();

        let names: Vec<&str> = scripts.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["deps/patch.sh", "deps/patch/packages/web.sh", "deps/patch-all.sh"]);

        // the root lockfile has no git dependencies
        assert!(scripts[0].1.commands().is_empty());
        assert!(scripts[1].1.commands()[0]
            .contains("\"$FLATPAK_BUILDER_BUILDDIR/packages/web/package-lock.json\""));
        assert_eq!(
            scripts[2].1.commands(),
            [
                "\"$FLATPAK_BUILDER_BUILDDIR\"/deps/patch.sh",
                "\"$FLATPAK_BUILDER_BUILDDIR\"/deps/patch/packages/web.sh",
            ]
        );

        // without autopatch nothing runs the scripts
        assert!(!manifest
            .sources()
            .iter()
            .any(|s| matches!(s, Source::Command { .. })));
    }
}
