//! Filesystem snapshotting between instructions.
//!
//! The snapshotter wraps a [`LayeredMap`] over the build root. `init`
//! records the base image's state; each `take_snapshot*` call diffs the
//! current tree against the composition and emits a deterministic tar of
//! the difference.

mod layered_map;
mod tar_writer;

pub use layered_map::LayeredMap;
pub use tar_writer::write_snapshot_tar;

use std::collections::BTreeSet;
use std::path::PathBuf;

use tracing::{debug, info};

use crate::constants::EMPTY_TAR_SIZE;
use crate::error::Result;
use crate::fsutil::{FileHasher, Filesystem};

/// Produces layer tars from filesystem deltas.
#[derive(Debug)]
pub struct Snapshotter {
    map: LayeredMap,
    fs: Filesystem,
    reproducible: bool,
}

impl Snapshotter {
    pub fn new(fs: Filesystem, hasher: FileHasher, reproducible: bool) -> Self {
        Self {
            map: LayeredMap::new(hasher),
            fs,
            reproducible,
        }
    }

    /// Records the baseline: every path currently on disk, hashed.
    pub fn init(&mut self) -> Result<()> {
        self.map.start_layer();
        let paths = self.fs.walk();
        for path in &paths {
            self.map.maybe_add(path)?;
        }
        debug!(files = paths.len(), "initialized snapshot baseline");
        Ok(())
    }

    /// Snapshots only the given paths plus their parent directories (whose
    /// metadata the writes just changed). A listed path missing from disk
    /// becomes a whiteout; an unchanged path is skipped.
    pub fn take_snapshot(&mut self, files: &[PathBuf]) -> Result<Vec<u8>> {
        info!(files = files.len(), "taking snapshot of specific files");
        self.map.start_layer();

        let mut unique: BTreeSet<PathBuf> = files.iter().cloned().collect();
        for file in files {
            for ancestor in file.ancestors().skip(1) {
                if ancestor == self.fs.root() || !ancestor.starts_with(self.fs.root()) {
                    break;
                }
                if ancestor.symlink_metadata().is_ok() {
                    unique.insert(ancestor.to_path_buf());
                }
            }
        }

        let mut added = Vec::new();
        let mut whiteouts = Vec::new();
        for path in unique {
            if path.symlink_metadata().is_err() {
                if self.map.maybe_add_whiteout(&path) {
                    whiteouts.push(path);
                }
                continue;
            }
            if self.map.maybe_add(&path)? {
                added.push(path);
            }
        }
        write_snapshot_tar(self.fs.root(), &added, &whiteouts, self.reproducible)
    }

    /// Re-walks the whole tree, snapshotting every changed path and
    /// reconstructing deletions from the prior composition.
    pub fn take_snapshot_full(&mut self) -> Result<Vec<u8>> {
        info!("taking snapshot of full filesystem");
        let previous = self.map.composition_paths();
        self.map.start_layer();

        let mut added = Vec::new();
        let mut on_disk = BTreeSet::new();
        for path in self.fs.walk() {
            on_disk.insert(path.clone());
            if self.map.maybe_add(&path)? {
                added.push(path);
            }
        }

        let mut whiteouts = Vec::new();
        for path in previous {
            if !on_disk.contains(&path) && self.map.maybe_add_whiteout(&path) {
                whiteouts.push(path);
            }
        }
        write_snapshot_tar(self.fs.root(), &added, &whiteouts, self.reproducible)
    }
}

/// Whether a snapshot tar holds no entries (end-of-archive blocks only).
pub fn is_empty_tar(tar_bytes: &[u8]) -> bool {
    tar_bytes.len() as u64 <= EMPTY_TAR_SIZE
}
