//! Stack of per-instruction `path → hash` maps.
//!
//! Each snapshot pushes a fresh layer; a path belongs in the top layer iff
//! its on-disk hash differs from the composition of everything below.
//! Deletions are reconstructed from the map, not from filesystem events: a
//! path that was in the composition but is gone from disk becomes a
//! whiteout.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::fsutil::FileHasher;

/// Layered view of the filesystem's hash state.
#[derive(Debug)]
pub struct LayeredMap {
    hasher: FileHasher,
    layers: Vec<HashMap<PathBuf, String>>,
    whiteouts: Vec<HashSet<PathBuf>>,
}

impl LayeredMap {
    pub fn new(hasher: FileHasher) -> Self {
        Self {
            hasher,
            layers: Vec::new(),
            whiteouts: Vec::new(),
        }
    }

    /// Pushes a fresh (empty) layer; subsequent adds land here.
    pub fn start_layer(&mut self) {
        self.layers.push(HashMap::new());
        self.whiteouts.push(HashSet::new());
    }

    /// The composed hash for `path`: the topmost layer that mentions it
    /// wins, unless a whiteout above that layer deleted it.
    pub fn get(&self, path: &Path) -> Option<&str> {
        for i in (0..self.layers.len()).rev() {
            if let Some(hash) = self.layers[i].get(path) {
                // A whiteout in a later layer shadows the entry.
                if self.whiteouts[i + 1..].iter().any(|w| w.contains(path)) {
                    return None;
                }
                return Some(hash);
            }
            if self.whiteouts[i].contains(path) {
                return None;
            }
        }
        None
    }

    /// Hashes `path` on disk and records it in the top layer if it differs
    /// from the composition. Returns whether it was recorded.
    pub fn maybe_add(&mut self, path: &Path) -> Result<bool> {
        let new_hash = self.hasher.hash(path)?;
        if self.get(path) == Some(new_hash.as_str()) {
            return Ok(false);
        }
        self.layers
            .last_mut()
            .expect("start_layer must be called before maybe_add")
            .insert(path.to_path_buf(), new_hash);
        Ok(true)
    }

    /// Records a deletion in the top layer unless the composition already
    /// lacks the path. Returns whether a whiteout is needed.
    pub fn maybe_add_whiteout(&mut self, path: &Path) -> bool {
        if self.get(path).is_none() {
            return false;
        }
        self.whiteouts
            .last_mut()
            .expect("start_layer must be called before maybe_add_whiteout")
            .insert(path.to_path_buf());
        true
    }

    /// Every path present in the current composition, sorted.
    pub fn composition_paths(&self) -> BTreeSet<PathBuf> {
        let mut paths = BTreeSet::new();
        for i in 0..self.layers.len() {
            for deleted in &self.whiteouts[i] {
                paths.remove(deleted);
            }
            for path in self.layers[i].keys() {
                paths.insert(path.clone());
            }
        }
        paths
    }
}
