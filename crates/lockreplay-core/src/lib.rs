#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]

//! Replays a package-manager lockfile as a list of offline build sources.
//!
//! A lockfile is parsed into [`Package`] records by a [`LockfileProvider`],
//! turned into sources by a [`SourceEmitter`], and collected into a
//! deterministic [`Manifest`] by the [`ManifestGenerator`].

pub mod config;
pub mod emit;
pub mod error;
pub mod fs;
pub mod git_repo;
pub mod integrity;
pub mod lockfile;
pub mod manifest;
pub mod paths;
pub mod transport;
pub mod version;

pub use config::{CacheMode, Config};
pub use emit::{generate_sources, SourceEmitter};
pub use error::{codes, Error, Result};
pub use git_repo::{GitCheckouts, GitCli, GitRepoError};
pub use integrity::{Algorithm, Integrity, IntegrityBuilder, MalformedIntegrityError};
pub use lockfile::{
    GitSource, LocalSource, LockfileKind, LockfileParseError, LockfileProvider, LockfileSet,
    Npmrc, Package, PackageSource, ProviderOptions, RegistrySource, ResolvedSource,
};
pub use manifest::{
    DataContent, DuplicateDestinationError, Manifest, ManifestError, ManifestGenerator,
    ScriptSource, Source,
};
pub use transport::{CacheStore, RemoteUrlMetadata, Requests, TransportError};
pub use version::{InvalidVersionError, Version};

/// lockreplay version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
