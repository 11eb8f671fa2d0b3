//! File hashing strategies for change detection.
//!
//! The hasher feeds both the layered map (did this path change since the
//! last snapshot?) and the composite cache key (context file fingerprints),
//! so one build must use one hasher throughout.

use std::fs::File;
use std::io::Read;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use crate::error::{Error, Result};
use crate::options::SnapshotMode;

/// Strategy for fingerprinting a single path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileHasher {
    /// Mode, mtime, ownership, and content of regular files.
    Full,
    /// Mtime only. Cheap, but lags same-second modifications.
    Mtime,
}

impl FileHasher {
    pub fn from_mode(mode: SnapshotMode) -> Self {
        match mode {
            SnapshotMode::Full => FileHasher::Full,
            SnapshotMode::Time => FileHasher::Mtime,
        }
    }

    /// Hashes one path without following symlinks.
    pub fn hash(&self, path: &Path) -> Result<String> {
        let meta = std::fs::symlink_metadata(path).map_err(|e| Error::fs(path, e))?;
        let mut ctx = md5::Context::new();

        match self {
            FileHasher::Mtime => {
                ctx.consume(meta.mtime().to_le_bytes());
                ctx.consume(meta.mtime_nsec().to_le_bytes());
            }
            FileHasher::Full => {
                ctx.consume(meta.mode().to_le_bytes());
                ctx.consume(meta.mtime().to_le_bytes());
                ctx.consume(meta.mtime_nsec().to_le_bytes());
                ctx.consume(meta.uid().to_le_bytes());
                ctx.consume(meta.gid().to_le_bytes());
                if meta.is_file() {
                    let mut file = File::open(path).map_err(|e| Error::fs(path, e))?;
                    let mut buf = [0u8; 64 * 1024];
                    loop {
                        let n = file.read(&mut buf).map_err(|e| Error::fs(path, e))?;
                        if n == 0 {
                            break;
                        }
                        ctx.consume(&buf[..n]);
                    }
                } else if meta.file_type().is_symlink() {
                    if let Ok(target) = std::fs::read_link(path) {
                        ctx.consume(target.to_string_lossy().as_bytes());
                    }
                }
            }
        }

        Ok(format!("{:x}", ctx.compute()))
    }

    /// Hashes a file or a whole subtree, for cache-key contributions from
    /// context files. Directories hash every contained path and its
    /// relative name, in sorted order.
    pub fn hash_path(&self, path: &Path) -> Result<String> {
        let meta = std::fs::symlink_metadata(path).map_err(|e| Error::fs(path, e))?;
        if !meta.is_dir() {
            return self.hash(path);
        }

        let mut ctx = md5::Context::new();
        let mut entries: Vec<_> = walkdir::WalkDir::new(path)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
            .map(|e| e.into_path())
            .collect();
        entries.sort();
        for entry in entries {
            let rel = entry.strip_prefix(path).unwrap_or(&entry);
            ctx.consume(rel.to_string_lossy().as_bytes());
            ctx.consume(self.hash(&entry)?.as_bytes());
        }
        Ok(format!("{:x}", ctx.compute()))
    }
}
