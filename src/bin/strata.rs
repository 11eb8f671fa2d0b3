//! Command-line driver: flag parsing, logging setup, and output
//! disposition (push, tarball, or neither) around the build engine.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use strata::image::tarball;
use strata::registry::{RegistryClient, RegistryOptions};
use strata::{do_build, BuildOptions, SnapshotMode};

#[derive(Parser, Debug)]
#[command(
    name = "strata",
    about = "Daemonless container image builder",
    version
)]
struct Args {
    /// Path to the Dockerfile, absolute or relative to the context.
    #[arg(short = 'f', long = "dockerfile", default_value = "Dockerfile")]
    dockerfile: PathBuf,

    /// Path to the build context.
    #[arg(short = 'c', long = "context", default_value = ".")]
    context: PathBuf,

    /// Registry reference to push the final image to. Repeatable.
    #[arg(short = 'd', long = "destination")]
    destinations: Vec<String>,

    /// KEY=VALUE override for a declared ARG. Repeatable.
    #[arg(long = "build-arg")]
    build_args: Vec<String>,

    /// Stop at the stage with this name.
    #[arg(long)]
    target: Option<String>,

    /// File attributes inspected during snapshotting: full or time.
    #[arg(long = "snapshot-mode", default_value = "full")]
    snapshot_mode: String,

    /// Snapshot only once per stage, after the last instruction.
    #[arg(long = "single-snapshot")]
    single_snapshot: bool,

    /// Zero all timestamps so repeat builds produce identical digests.
    #[arg(long)]
    reproducible: bool,

    /// Enable the layer cache.
    #[arg(long)]
    cache: bool,

    /// Local layer cache directory.
    #[arg(long = "cache-dir")]
    cache_dir: Option<PathBuf>,

    /// Registry repository to cache layers under.
    #[arg(long = "cache-repo")]
    cache_repo: Option<String>,

    /// Pull base images over plain HTTP.
    #[arg(long = "insecure-pull")]
    insecure_pull: bool,

    /// Skip TLS certificate verification on pulls.
    #[arg(long = "skip-tls-verify-pull")]
    skip_tls_verify_pull: bool,

    /// Wipe the filesystem after the final stage succeeds.
    #[arg(long)]
    cleanup: bool,

    /// Write the image to this tarball path instead of pushing.
    #[arg(long = "tar-path")]
    tar_path: Option<PathBuf>,

    /// Build without pushing anywhere.
    #[arg(long = "no-push")]
    no_push: bool,

    /// Log filter, e.g. info or strata=debug.
    #[arg(short = 'v', long = "verbosity", default_value = "info")]
    verbosity: String,
}

fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.verbosity)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> strata::Result<()> {
    let snapshot_mode: SnapshotMode = args.snapshot_mode.parse()?;
    let opts = BuildOptions {
        dockerfile_path: args.dockerfile,
        src_context: args.context,
        build_args: args.build_args,
        target: args.target,
        single_snapshot: args.single_snapshot,
        reproducible: args.reproducible,
        snapshot_mode,
        cache: args.cache,
        cache_dir: args.cache_dir,
        cache_repo: args.cache_repo,
        insecure_pull: args.insecure_pull,
        skip_tls_verify_pull: args.skip_tls_verify_pull,
        cleanup: args.cleanup,
        ..Default::default()
    };

    let image = do_build(&opts)?;

    if let Some(tar_path) = &args.tar_path {
        tarball::write_image(tar_path, &image)?;
    }
    if args.no_push {
        return Ok(());
    }
    if !args.destinations.is_empty() {
        let client = RegistryClient::new(RegistryOptions {
            insecure: opts.insecure_pull,
            skip_tls_verify: opts.skip_tls_verify_pull,
            credentials: None,
        })?;
        for destination in &args.destinations {
            client.push_image(destination, &image)?;
        }
    }
    Ok(())
}
