#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::struct_excessive_bools)]

mod commands;
mod logging;

use clap::Parser;
use commands::generate::GenerateArgs;
use lockreplay_core::{paths, CacheMode, Config, LockfileKind};
use miette::Result;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "lockreplay")]
#[command(author, version, about = "Turn a lockfile into an offline source manifest", long_about = None)]
struct Cli {
    /// Lockfile to read (yarn.lock, package-lock.json or Cargo.lock)
    #[arg(value_name = "LOCKFILE")]
    lockfile: PathBuf,

    /// Lockfile dialect; detected from the file name when omitted
    #[arg(long, value_name = "yarn|npm|cargo")]
    kind: Option<LockfileKind>,

    /// Where to write the manifest
    #[arg(short, long, value_name = "PATH", default_value = "generated-sources.json")]
    output: PathBuf,

    /// Directory, relative to the build directory, that sources land in
    #[arg(long, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Also read every lockfile with the same name below LOCKFILE's directory
    #[arg(short, long)]
    recursive: bool,

    /// Like --recursive, keeping only lockfiles whose path ends with PATTERN (repeatable)
    #[arg(short = 'R', long = "recursive-pattern", value_name = "PATTERN")]
    recursive_patterns: Vec<String>,

    /// Write numbered manifests small enough for GitHub
    #[arg(short, long)]
    split: bool,

    /// Skip development-only npm packages
    #[arg(long)]
    no_dev: bool,

    /// npm registry for packages pinned only by version
    #[arg(long, value_name = "URL")]
    registry: Option<String>,

    /// Write the npm patch scripts without running them during the build
    #[arg(long)]
    no_autopatch: bool,

    /// Do not set up node-gyp to use the SDK's node headers
    #[arg(long)]
    no_xdg_layout: bool,

    /// Do not cache downloads
    #[arg(long, conflicts_with = "persistent_cache")]
    no_cache: bool,

    /// Cache downloads in the user cache directory between runs
    #[arg(long)]
    persistent_cache: bool,

    /// Maximum number of downloads in flight
    #[arg(long, value_name = "N")]
    max_concurrent: Option<usize>,

    /// Attempts per download, first try included
    #[arg(long, value_name = "N")]
    retries: Option<u32>,

    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit JSON formatted output and logs
    #[arg(long)]
    json: bool,

    /// Override the working directory
    #[arg(long, value_name = "PATH")]
    cwd: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let cwd = cli
        .cwd
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    let cache = if cli.no_cache {
        CacheMode::Disabled
    } else if cli.persistent_cache {
        CacheMode::Disk(paths::cache_dir())
    } else {
        CacheMode::Memory
    };

    let mut config = Config::new(cwd)
        .with_verbosity(cli.verbose)
        .with_json_logs(cli.json)
        .with_include_dev(!cli.no_dev)
        .with_autopatch(!cli.no_autopatch)
        .with_xdg_layout(!cli.no_xdg_layout)
        .with_cache(cache);
    if let Some(root) = cli.root {
        config = config.with_output_root(root);
    }
    if let Some(limit) = cli.max_concurrent {
        config = config.with_max_concurrent_fetches(limit);
    }
    if let Some(retries) = cli.retries {
        config = config.with_retries(retries);
    }
    if let Some(registry) = cli.registry {
        config = config.with_npm_registry(registry);
    }

    logging::init(config.verbosity, config.json_logs);

    commands::generate::run(
        &config,
        GenerateArgs {
            lockfile: cli.lockfile,
            kind: cli.kind,
            output: cli.output,
            recursive: cli.recursive || !cli.recursive_patterns.is_empty(),
            patterns: cli.recursive_patterns,
            split: cli.split,
            no_dev: cli.no_dev,
            no_autopatch: cli.no_autopatch,
        },
        cli.json,
    )
}
