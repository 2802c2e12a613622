//! Generate a source manifest from a lockfile.

use lockreplay_core::manifest::MAX_GITHUB_SIZE;
use lockreplay_core::{generate_sources, Config, LockfileKind, LockfileSet, Requests};
use miette::{IntoDiagnostic, MietteDiagnostic, Result};
use std::path::{Path, PathBuf};

/// Error code for a lockfile whose dialect was neither given nor detected.
const KIND_UNKNOWN: &str = "LOCKFILE_KIND_UNKNOWN";

/// Error code for an option the lockfile dialect cannot honor.
const OPTION_UNSUPPORTED: &str = "OPTION_UNSUPPORTED";

/// Arguments of one run. Relative paths resolve against `Config::cwd`.
#[derive(Debug)]
pub struct GenerateArgs {
    pub lockfile: PathBuf,
    pub kind: Option<LockfileKind>,
    pub output: PathBuf,
    /// Search below the lockfile's directory for more lockfiles.
    pub recursive: bool,
    /// Tail patterns a found lockfile must match; empty keeps all.
    pub patterns: Vec<String>,
    pub split: bool,
    pub no_dev: bool,
    pub no_autopatch: bool,
}

/// A failed run, reduced to what gets reported.
struct Failure {
    code: &'static str,
    message: String,
}

impl From<lockreplay_core::Error> for Failure {
    fn from(e: lockreplay_core::Error) -> Self {
        Self {
            code: e.code(),
            message: e.to_string(),
        }
    }
}

/// What a successful run produced.
struct Outcome {
    lockfiles: usize,
    sources: usize,
    outputs: Vec<PathBuf>,
}

/// Run the generator.
///
/// When `json` is true, a single JSON object is printed to stdout and a
/// failure exits with status 1. Otherwise failures become diagnostics.
/// Nothing is written to the output path unless generation succeeds.
pub fn run(config: &Config, args: GenerateArgs, json: bool) -> Result<()> {
    let lockfile = config.cwd.join(&args.lockfile);
    let output = config.cwd.join(&args.output);

    let runtime = tokio::runtime::Runtime::new().into_diagnostic()?;
    match runtime.block_on(generate(config, &args, &lockfile, &output)) {
        Ok(outcome) => {
            if json {
                let report = serde_json::json!({
                    "ok": true,
                    "lockfile": lockfile.display().to_string(),
                    "lockfiles": outcome.lockfiles,
                    "output": output.display().to_string(),
                    "outputs": outcome
                        .outputs
                        .iter()
                        .map(|p| p.display().to_string())
                        .collect::<Vec<_>>(),
                    "sources": outcome.sources,
                });
                println!("{}", serde_json::to_string_pretty(&report).into_diagnostic()?);
            } else {
                for path in &outcome.outputs {
                    println!("Wrote {}", path.display());
                }
                println!(
                    "{} sources from {} lockfile(s)",
                    outcome.sources, outcome.lockfiles
                );
            }
            Ok(())
        }
        Err(failure) => {
            if json {
                let report = serde_json::json!({
                    "ok": false,
                    "error": {
                        "code": failure.code,
                        "message": failure.message,
                    },
                });
                println!("{}", serde_json::to_string_pretty(&report).into_diagnostic()?);
                std::process::exit(1);
            }
            Err(MietteDiagnostic::new(failure.message)
                .with_code(failure.code)
                .into())
        }
    }
}

async fn generate(
    config: &Config,
    args: &GenerateArgs,
    lockfile: &Path,
    output: &Path,
) -> Result<Outcome, Failure> {
    let Some(kind) = args.kind.or_else(|| LockfileKind::detect(lockfile)) else {
        return Err(Failure {
            code: KIND_UNKNOWN,
            message: format!(
                "Cannot tell the lockfile kind of {}; pass --kind",
                lockfile.display()
            ),
        });
    };

    if kind == LockfileKind::Yarn {
        let unsupported = [("--no-dev", args.no_dev), ("--no-autopatch", args.no_autopatch)];
        if let Some((flag, _)) = unsupported.iter().find(|(_, set)| *set) {
            return Err(Failure {
                code: OPTION_UNSUPPORTED,
                message: format!("{flag} is not supported for yarn lockfiles"),
            });
        }
    }

    let lockfiles = if args.recursive {
        LockfileSet::scan(lockfile, &args.patterns).map_err(lockreplay_core::Error::from)?
    } else {
        LockfileSet::single(lockfile)
    };

    tracing::info!(
        lockfile = %lockfile.display(),
        lockfiles = lockfiles.lockfiles().len(),
        %kind,
        "generating sources"
    );
    let requests = Requests::new(config).map_err(lockreplay_core::Error::from)?;
    let manifest = generate_sources(config, &requests, kind, &lockfiles).await?;

    let outputs = if args.split {
        manifest.write_split(output, MAX_GITHUB_SIZE)?
    } else {
        manifest.write_to(output)?;
        vec![output.to_path_buf()]
    };

    Ok(Outcome {
        lockfiles: lockfiles.lockfiles().len(),
        sources: manifest.len(),
        outputs,
    })
}
