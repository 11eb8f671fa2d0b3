//! Build options handed from the driver to the engine.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::constants;
use crate::error::{Error, Result};

/// File attribute set inspected when deciding whether a path changed
/// between snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SnapshotMode {
    /// Mode, mtime, ownership, and (for regular files) content.
    #[default]
    Full,
    /// Modification time only.
    Time,
}

impl std::str::FromStr for SnapshotMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            constants::SNAPSHOT_MODE_FULL => Ok(SnapshotMode::Full),
            constants::SNAPSHOT_MODE_TIME => Ok(SnapshotMode::Time),
            other => Err(Error::Config(format!(
                "{other} is not a valid snapshot mode"
            ))),
        }
    }
}

/// Everything [`do_build`](crate::builder::do_build) needs to know.
///
/// Output disposition (push destinations, tar path) is the driver's concern
/// and deliberately absent here.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Path to the Dockerfile, absolute or relative to `src_context`.
    pub dockerfile_path: PathBuf,
    /// Root of the unpacked build context.
    pub src_context: PathBuf,
    /// `KEY=VALUE` overrides for declared ARGs.
    pub build_args: Vec<String>,
    /// Stop after the stage with this name.
    pub target: Option<String>,
    /// Snapshot only once per stage, after the last instruction.
    pub single_snapshot: bool,
    /// Zero all timestamps so repeat builds are byte-identical.
    pub reproducible: bool,
    /// Hasher selection for change detection.
    pub snapshot_mode: SnapshotMode,
    /// Enable the layer cache.
    pub cache: bool,
    /// Local layer cache directory.
    pub cache_dir: Option<PathBuf>,
    /// Registry repository layers are cached under.
    pub cache_repo: Option<String>,
    /// Allow plain-HTTP base image pulls.
    pub insecure_pull: bool,
    /// Skip TLS certificate verification on pulls.
    pub skip_tls_verify_pull: bool,
    /// Wipe the filesystem after the final stage succeeds.
    pub cleanup: bool,
    /// Filesystem root instructions execute against. The real builder uses
    /// `/`; tests point this at a scratch directory.
    pub root_dir: PathBuf,
    /// Builder state directory (intermediate stage tarballs and extracted
    /// stage trees live under here).
    pub work_dir: PathBuf,
    /// Cooperative cancellation flag, checked before each long operation.
    pub cancel: CancelToken,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            dockerfile_path: PathBuf::from("Dockerfile"),
            src_context: PathBuf::from("."),
            build_args: Vec::new(),
            target: None,
            single_snapshot: false,
            reproducible: false,
            snapshot_mode: SnapshotMode::Full,
            cache: false,
            cache_dir: None,
            cache_repo: None,
            insecure_pull: false,
            skip_tls_verify_pull: false,
            cleanup: false,
            root_dir: PathBuf::from(constants::ROOT_DIR),
            work_dir: PathBuf::from(constants::STRATA_DIR),
            cancel: CancelToken::new(),
        }
    }
}

impl BuildOptions {
    /// Directory where saved intermediate stage tarballs are kept.
    pub fn stages_dir(&self) -> PathBuf {
        self.work_dir.join("stages")
    }

    /// Directory where a saved stage's filesystem is extracted for
    /// `COPY --from` reads.
    pub fn stage_fs_dir(&self, index: usize) -> PathBuf {
        self.work_dir.join(index.to_string())
    }

    /// Fails with [`Error::Cancelled`] once the host has signalled stop.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}

/// Shared flag the host flips to abort an in-flight build.
///
/// Cloned into every component that performs long I/O; partial layers
/// already pushed to the cache are kept (keys are idempotent), partial
/// snapshots are discarded.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals the build to stop at the next suspension point.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
