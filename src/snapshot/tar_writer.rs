//! Deterministic layer-tar assembly.
//!
//! Entries are sorted lexicographically by archive name; that ordering is
//! the sole thing making snapshot tars reproducible. Ownership and mode
//! come from disk, mtimes are zeroed in reproducible mode, and deletions
//! become zero-length `.wh.<name>` entries.

use std::fs::{self, File};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use tar::{Builder, EntryType, Header};

use crate::constants::WHITEOUT_PREFIX;
use crate::error::{Error, Result};

/// One pending tar entry.
enum TarEntry {
    Real(PathBuf),
    Whiteout(PathBuf),
}

impl TarEntry {
    fn name(&self, root: &Path) -> String {
        match self {
            TarEntry::Real(path) => relative_name(path, root),
            TarEntry::Whiteout(path) => {
                let parent = path.parent().unwrap_or(Path::new(""));
                let base = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let parent = relative_name(parent, root);
                if parent.is_empty() {
                    format!("{WHITEOUT_PREFIX}{base}")
                } else {
                    format!("{parent}/{WHITEOUT_PREFIX}{base}")
                }
            }
        }
    }
}

fn relative_name(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}

/// Writes the snapshot tar for a set of added/changed paths plus a set of
/// deletions, all relative to `root`.
pub fn write_snapshot_tar(
    root: &Path,
    added: &[PathBuf],
    whiteouts: &[PathBuf],
    reproducible: bool,
) -> Result<Vec<u8>> {
    let mut entries: Vec<TarEntry> = added
        .iter()
        .cloned()
        .map(TarEntry::Real)
        .chain(whiteouts.iter().cloned().map(TarEntry::Whiteout))
        .collect();
    entries.sort_by_key(|e| e.name(root));

    let mut builder = Builder::new(Vec::new());
    builder.follow_symlinks(false);

    for entry in entries {
        let name = entry.name(root);
        if name.is_empty() {
            continue;
        }
        match entry {
            TarEntry::Whiteout(_) => {
                let mut header = Header::new_ustar();
                header.set_entry_type(EntryType::Regular);
                header.set_size(0);
                header.set_mode(0o0);
                header.set_mtime(0);
                header.set_cksum();
                builder.append_data(&mut header, &name, std::io::empty())?;
            }
            TarEntry::Real(path) => {
                append_path(&mut builder, &path, &name, reproducible)?;
            }
        }
    }

    Ok(builder.into_inner()?)
}

fn append_path(
    builder: &mut Builder<Vec<u8>>,
    path: &Path,
    name: &str,
    reproducible: bool,
) -> Result<()> {
    let meta = fs::symlink_metadata(path).map_err(|e| Error::fs(path, e))?;

    let mut header = Header::new_ustar();
    header.set_mode(meta.mode() & 0o7777);
    header.set_uid(meta.uid() as u64);
    header.set_gid(meta.gid() as u64);
    header.set_mtime(if reproducible {
        0
    } else {
        meta.mtime().max(0) as u64
    });

    let file_type = meta.file_type();
    if file_type.is_dir() {
        header.set_entry_type(EntryType::Directory);
        header.set_size(0);
        builder.append_data(&mut header, name, std::io::empty())?;
    } else if file_type.is_symlink() {
        header.set_entry_type(EntryType::Symlink);
        header.set_size(0);
        let target = fs::read_link(path).map_err(|e| Error::fs(path, e))?;
        builder.append_link(&mut header, name, &target)?;
    } else if file_type.is_file() {
        header.set_entry_type(EntryType::Regular);
        header.set_size(meta.len());
        let file = File::open(path).map_err(|e| Error::fs(path, e))?;
        builder.append_data(&mut header, name, file)?;
    }
    // Device nodes and sockets are not materialized into layers.

    Ok(())
}
