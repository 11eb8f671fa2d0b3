//! Filesystem boundary for the build engine.
//!
//! All reads and writes against the build root go through [`Filesystem`],
//! which owns the path whitelist: kernel mounts and the builder's own state
//! are never written during extraction and never removed when the tree is
//! reset between stages. Pointing `root` at a scratch directory gives tests
//! a hermetic build filesystem.

mod hasher;

pub use hasher::FileHasher;

use std::fs::{self, File};
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tar::Archive;
use tracing::{debug, warn};

use crate::constants::{FS_WHITELIST, OPAQUE_WHITEOUT, WHITEOUT_PREFIX};
use crate::error::{Error, Result};
use crate::image::Image;

/// Root-scoped filesystem operations with whitelist protection.
#[derive(Debug, Clone)]
pub struct Filesystem {
    root: PathBuf,
    whitelist: Vec<PathBuf>,
}

impl Filesystem {
    /// Scopes operations to `root`. The standard whitelist is re-anchored
    /// under `root`; `extra_whitelist` entries (the builder's work dir) are
    /// taken as-is.
    pub fn new(root: impl Into<PathBuf>, extra_whitelist: &[PathBuf]) -> Self {
        let root = root.into();
        let mut whitelist: Vec<PathBuf> = FS_WHITELIST
            .iter()
            .map(|entry| root.join(entry.trim_start_matches('/')))
            .collect();
        whitelist.extend(extra_whitelist.iter().cloned());
        Self { root, whitelist }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps an absolute path in image space (`/tmp/foo`) onto disk.
    pub fn resolve(&self, image_path: &str) -> PathBuf {
        self.root.join(image_path.trim_start_matches('/'))
    }

    /// Whether `path` may never be written or deleted.
    pub fn is_whitelisted(&self, path: &Path) -> bool {
        self.whitelist.iter().any(|entry| path.starts_with(entry))
    }

    /// Streams every layer of `image`, in order, onto the root.
    pub fn extract_image(&self, image: &Image) -> Result<()> {
        fs::create_dir_all(&self.root).map_err(|e| Error::fs(&self.root, e))?;
        for layer in image.layers() {
            self.extract_tar(&layer.uncompressed()?)?;
        }
        debug!(root = %self.root.display(), layers = image.layers().len(), "extracted image");
        Ok(())
    }

    /// Applies one uncompressed layer tar to the root, honoring whiteouts
    /// and the whitelist. Returns the absolute paths written.
    pub fn extract_tar(&self, tar_bytes: &[u8]) -> Result<Vec<PathBuf>> {
        let mut archive = Archive::new(tar_bytes);
        archive.set_preserve_permissions(true);
        archive.set_preserve_mtime(true);
        archive.set_unpack_xattrs(false);
        // chown during unpack needs privilege; without it we keep the files
        // and lose ownership, matching what a user-mode build can do.
        archive.set_preserve_ownerships(running_as_root());

        let mut written = Vec::new();
        for entry in archive.entries()? {
            let mut entry = entry?;
            let rel = entry.path()?.into_owned();
            if rel.components().any(|c| matches!(c, Component::ParentDir)) {
                return Err(Error::PathTraversal {
                    path: rel.to_string_lossy().into_owned(),
                });
            }

            let name = rel
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let parent = self.root.join(rel.parent().unwrap_or(Path::new("")));

            // Opaque marker: empty the directory before siblings apply.
            if name == OPAQUE_WHITEOUT {
                self.clear_dir(&parent)?;
                continue;
            }
            // Plain whiteout: delete the named sibling from lower layers.
            if let Some(target) = name.strip_prefix(WHITEOUT_PREFIX) {
                let target_path = parent.join(target);
                if !self.is_whitelisted(&target_path) {
                    remove_any(&target_path);
                }
                continue;
            }

            let dest = self.root.join(&rel);
            if self.is_whitelisted(&dest) && dest != self.root {
                continue;
            }

            // A file landing where a directory sits (or vice versa) must
            // displace it first.
            if !entry.header().entry_type().is_dir() {
                if let Ok(meta) = fs::symlink_metadata(&dest) {
                    if meta.is_dir() {
                        fs::remove_dir_all(&dest).map_err(|e| Error::fs(&dest, e))?;
                    } else {
                        fs::remove_file(&dest).map_err(|e| Error::fs(&dest, e))?;
                    }
                }
            }
            if let Some(dir) = dest.parent() {
                fs::create_dir_all(dir).map_err(|e| Error::fs(dir, e))?;
            }
            entry.unpack_in(&self.root)?;
            written.push(dest);
        }
        Ok(written)
    }

    /// Removes everything under the root except whitelisted paths.
    pub fn delete(&self) -> Result<()> {
        debug!(root = %self.root.display(), "deleting filesystem");
        self.clear_dir(&self.root)
    }

    /// Removes the children of `dir`, sparing whitelisted subtrees.
    fn clear_dir(&self, dir: &Path) -> Result<()> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(_) => return Ok(()),
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if self.is_whitelisted(&path) {
                continue;
            }
            remove_any(&path);
        }
        Ok(())
    }

    /// Every path under the root, sorted, whitelisted subtrees skipped.
    /// The root itself is excluded.
    pub fn walk(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = walkdir::WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| !self.is_whitelisted(e.path()))
            .filter_map(|e| e.ok())
            .map(|e| e.into_path())
            .filter(|p| p != &self.root)
            .collect();
        paths.sort();
        paths
    }
}

/// Recursive listing of `path` (directories, files, links), sorted,
/// including `path` itself.
pub fn files_under(path: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(path)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.into_path())
        .collect();
    files.sort();
    Ok(files)
}

fn running_as_root() -> bool {
    use std::os::unix::fs::MetadataExt;
    fs::metadata("/proc/self").map(|m| m.uid() == 0).unwrap_or(false)
}

/// Best-effort removal of a file, symlink, or directory tree.
fn remove_any(path: &Path) {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => {
            if let Err(e) = fs::remove_dir_all(path) {
                warn!(path = %path.display(), error = %e, "failed to remove directory");
            }
        }
        Ok(_) => {
            if let Err(e) = fs::remove_file(path) {
                warn!(path = %path.display(), error = %e, "failed to remove file");
            }
        }
        Err(_) => {}
    }
}

// =============================================================================
// File creation helpers (COPY/ADD)
// =============================================================================

/// Writes `content` to `path` with the given mode and ownership, creating
/// parent directories as needed.
pub fn create_file(
    path: &Path,
    content: &mut impl Read,
    mode: u32,
    uid: u32,
    gid: u32,
) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::fs(parent, e))?;
    }
    let mut file = File::create(path).map_err(|e| Error::fs(path, e))?;
    std::io::copy(content, &mut file).map_err(|e| Error::fs(path, e))?;
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|e| Error::fs(path, e))?;
    set_owner(path, uid, gid);
    Ok(())
}

/// Copies a single file or symlink, preserving mode, applying ownership.
pub fn copy_path(src: &Path, dest: &Path, uid: u32, gid: u32) -> Result<()> {
    use std::os::unix::fs::MetadataExt;

    let meta = fs::symlink_metadata(src).map_err(|e| Error::fs(src, e))?;
    if meta.file_type().is_symlink() {
        let target = fs::read_link(src).map_err(|e| Error::fs(src, e))?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::fs(parent, e))?;
        }
        let _ = fs::remove_file(dest);
        std::os::unix::fs::symlink(&target, dest).map_err(|e| Error::fs(dest, e))?;
        return Ok(());
    }

    let mut reader = File::open(src).map_err(|e| Error::fs(src, e))?;
    create_file(dest, &mut reader, meta.mode() & 0o7777, uid, gid)
}

fn set_owner(path: &Path, uid: u32, gid: u32) {
    if let Err(e) = std::os::unix::fs::chown(path, Some(uid), Some(gid)) {
        // Unprivileged runs cannot chown; the copy itself still succeeded.
        warn!(path = %path.display(), uid, gid, error = %e, "failed to set ownership");
    }
}

// =============================================================================
// ADD helpers: remote downloads and local tar archives
// =============================================================================

/// Fetches `url` to `dest` with mode 0600, stamping the mtime from the
/// `Last-Modified` header when the server provides one.
pub fn download_file_to_dest(url: &str, dest: &Path) -> Result<()> {
    let response = reqwest::blocking::get(url).map_err(|e| Error::Network {
        reference: url.to_string(),
        reason: e.to_string(),
    })?;
    if !response.status().is_success() {
        return Err(Error::Network {
            reference: url.to_string(),
            reason: format!("HTTP status {}", response.status()),
        });
    }
    let last_modified = response
        .headers()
        .get(reqwest::header::LAST_MODIFIED)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| chrono::DateTime::parse_from_rfc2822(v).ok());
    let body = response.bytes().map_err(|e| Error::Network {
        reference: url.to_string(),
        reason: e.to_string(),
    })?;

    create_file(dest, &mut body.as_ref(), 0o600, 0, 0)?;
    if let Some(modified) = last_modified {
        let mtime = std::time::UNIX_EPOCH + std::time::Duration::from_secs(modified.timestamp().max(0) as u64);
        let file = File::options().write(true).open(dest).map_err(|e| Error::fs(dest, e))?;
        file.set_modified(mtime).map_err(|e| Error::fs(dest, e))?;
    }
    Ok(())
}

/// Archive flavors `ADD` recognizes by sniffing magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Tar,
    TarGz,
    TarBz2,
    TarXz,
}

/// Sniffs whether `path` is a local tar archive (possibly compressed).
pub fn local_tar_archive_kind(path: &Path) -> Option<ArchiveKind> {
    let mut file = File::open(path).ok()?;
    let mut header = [0u8; 265];
    let n = file.read(&mut header).ok()?;
    let header = &header[..n];

    if header.starts_with(&[0x1f, 0x8b]) {
        return Some(ArchiveKind::TarGz);
    }
    if header.starts_with(b"BZh") {
        return Some(ArchiveKind::TarBz2);
    }
    if header.starts_with(&[0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00]) {
        return Some(ArchiveKind::TarXz);
    }
    if header.len() > 262 && &header[257..262] == b"ustar" {
        return Some(ArchiveKind::Tar);
    }
    None
}

/// Unpacks a local tar archive into `dest`, as `tar -x` would, returning
/// every path now present under `dest`.
pub fn unpack_local_tar_archive(path: &Path, dest: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dest).map_err(|e| Error::fs(dest, e))?;
    let file = File::open(path).map_err(|e| Error::fs(path, e))?;

    match local_tar_archive_kind(path) {
        Some(ArchiveKind::TarGz) => unpack_archive(Archive::new(GzDecoder::new(file)), dest)?,
        Some(ArchiveKind::Tar) => unpack_archive(Archive::new(file), dest)?,
        Some(kind) => {
            return Err(Error::Context(format!(
                "archive {} has unsupported compression {kind:?}",
                path.display()
            )))
        }
        None => {
            return Err(Error::Context(format!(
                "{} is not a tar archive",
                path.display()
            )))
        }
    }
    files_under(dest)
}

fn unpack_archive<R: Read>(mut archive: Archive<R>, dest: &Path) -> Result<()> {
    archive.set_preserve_permissions(true);
    archive.set_preserve_mtime(true);
    archive.unpack(dest)?;
    Ok(())
}
