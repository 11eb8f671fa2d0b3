//! Tests for filesystem extraction, whitelisting, and hashing.

use std::fs;
use std::io::Write;

use tempfile::TempDir;

use strata::fsutil::{
    files_under, local_tar_archive_kind, unpack_local_tar_archive, ArchiveKind, FileHasher,
    Filesystem,
};

fn layer_tar(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, content) in entries {
        let mut header = tar::Header::new_ustar();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_uid(0);
        header.set_gid(0);
        header.set_cksum();
        builder.append_data(&mut header, name, *content).unwrap();
    }
    builder.into_inner().unwrap()
}

// =============================================================================
// Extraction
// =============================================================================

#[test]
fn test_extract_tar_writes_files() {
    let root = TempDir::new().unwrap();
    let fs_util = Filesystem::new(root.path().to_path_buf(), &[]);

    let written = fs_util
        .extract_tar(&layer_tar(&[("etc/config", b"value")]))
        .unwrap();

    assert_eq!(written, vec![root.path().join("etc/config")]);
    assert_eq!(
        fs::read_to_string(root.path().join("etc/config")).unwrap(),
        "value"
    );
}

#[test]
fn test_extract_tar_whiteout_deletes_lower_file() {
    let root = TempDir::new().unwrap();
    let fs_util = Filesystem::new(root.path().to_path_buf(), &[]);
    fs::create_dir(root.path().join("app")).unwrap();
    fs::write(root.path().join("app/stale"), "old").unwrap();

    fs_util
        .extract_tar(&layer_tar(&[("app/.wh.stale", b"")]))
        .unwrap();

    assert!(!root.path().join("app/stale").exists());
}

#[test]
fn test_extract_tar_opaque_whiteout_empties_directory() {
    let root = TempDir::new().unwrap();
    let fs_util = Filesystem::new(root.path().to_path_buf(), &[]);
    fs::create_dir(root.path().join("cache")).unwrap();
    fs::write(root.path().join("cache/a"), "a").unwrap();
    fs::write(root.path().join("cache/b"), "b").unwrap();

    fs_util
        .extract_tar(&layer_tar(&[("cache/.wh..wh..opq", b""), ("cache/fresh", b"new")]))
        .unwrap();

    assert!(!root.path().join("cache/a").exists());
    assert!(!root.path().join("cache/b").exists());
    assert_eq!(
        fs::read_to_string(root.path().join("cache/fresh")).unwrap(),
        "new"
    );
}

#[test]
fn test_extract_tar_skips_whitelisted_paths() {
    let root = TempDir::new().unwrap();
    let fs_util = Filesystem::new(root.path().to_path_buf(), &[]);

    fs_util
        .extract_tar(&layer_tar(&[("proc/cpuinfo", b"fake"), ("ok.txt", b"ok")]))
        .unwrap();

    assert!(!root.path().join("proc/cpuinfo").exists());
    assert!(root.path().join("ok.txt").exists());
}

#[test]
fn test_extract_tar_file_replaces_directory() {
    let root = TempDir::new().unwrap();
    let fs_util = Filesystem::new(root.path().to_path_buf(), &[]);
    fs::create_dir_all(root.path().join("node")).unwrap();
    fs::write(root.path().join("node/inner"), "x").unwrap();

    fs_util.extract_tar(&layer_tar(&[("node", b"now a file")])).unwrap();

    assert!(root.path().join("node").is_file());
}

// =============================================================================
// Whitelist and Deletion
// =============================================================================

#[test]
fn test_whitelist_covers_standard_mounts_and_extras() {
    let root = TempDir::new().unwrap();
    let extra = root.path().join("workdir");
    let fs_util = Filesystem::new(root.path().to_path_buf(), &[extra.clone()]);

    assert!(fs_util.is_whitelisted(&root.path().join("proc")));
    assert!(fs_util.is_whitelisted(&root.path().join("proc/self/status")));
    assert!(fs_util.is_whitelisted(&extra.join("stages/0")));
    assert!(!fs_util.is_whitelisted(&root.path().join("home")));
}

#[test]
fn test_delete_spares_whitelist() {
    let root = TempDir::new().unwrap();
    fs::create_dir(root.path().join("proc")).unwrap();
    fs::write(root.path().join("proc/keep"), "kernel").unwrap();
    fs::create_dir(root.path().join("usr")).unwrap();
    fs::write(root.path().join("usr/gone"), "bye").unwrap();
    fs::write(root.path().join("top"), "bye").unwrap();

    let fs_util = Filesystem::new(root.path().to_path_buf(), &[]);
    fs_util.delete().unwrap();

    assert!(root.path().join("proc/keep").exists());
    assert!(!root.path().join("usr").exists());
    assert!(!root.path().join("top").exists());
}

#[test]
fn test_walk_is_sorted_and_skips_whitelist() {
    let root = TempDir::new().unwrap();
    fs::create_dir(root.path().join("proc")).unwrap();
    fs::write(root.path().join("proc/hidden"), "x").unwrap();
    fs::write(root.path().join("b"), "2").unwrap();
    fs::write(root.path().join("a"), "1").unwrap();

    let fs_util = Filesystem::new(root.path().to_path_buf(), &[]);
    let walked = fs_util.walk();

    assert_eq!(walked, vec![root.path().join("a"), root.path().join("b")]);
}

#[test]
fn test_files_under_includes_root_and_sorts() {
    let root = TempDir::new().unwrap();
    fs::create_dir(root.path().join("sub")).unwrap();
    fs::write(root.path().join("sub/file"), "x").unwrap();

    let files = files_under(root.path()).unwrap();
    assert_eq!(
        files,
        vec![
            root.path().to_path_buf(),
            root.path().join("sub"),
            root.path().join("sub/file"),
        ]
    );
}

// =============================================================================
// Hashers
// =============================================================================

#[test]
fn test_full_hasher_tracks_content() {
    let root = TempDir::new().unwrap();
    let file = root.path().join("f");
    fs::write(&file, "one").unwrap();
    let before = FileHasher::Full.hash(&file).unwrap();

    fs::write(&file, "two").unwrap();
    let after = FileHasher::Full.hash(&file).unwrap();
    assert_ne!(before, after);
}

#[test]
fn test_mtime_hasher_tracks_mtime_only() {
    let root = TempDir::new().unwrap();
    let file = root.path().join("f");
    fs::write(&file, "content").unwrap();

    let stamp = std::time::UNIX_EPOCH + std::time::Duration::from_secs(1_600_000_000);
    let handle = fs::File::options().write(true).open(&file).unwrap();
    handle.set_modified(stamp).unwrap();
    let before = FileHasher::Mtime.hash(&file).unwrap();

    // Different content, pinned mtime: the cheap hasher cannot tell.
    fs::write(&file, "changed").unwrap();
    let handle = fs::File::options().write(true).open(&file).unwrap();
    handle.set_modified(stamp).unwrap();
    let after = FileHasher::Mtime.hash(&file).unwrap();
    assert_eq!(before, after);

    handle
        .set_modified(stamp + std::time::Duration::from_secs(5))
        .unwrap();
    let moved = FileHasher::Mtime.hash(&file).unwrap();
    assert_ne!(before, moved);
}

#[test]
fn test_hash_path_covers_subtrees() {
    let root = TempDir::new().unwrap();
    fs::create_dir(root.path().join("tree")).unwrap();
    fs::write(root.path().join("tree/a"), "a").unwrap();
    let before = FileHasher::Full.hash_path(&root.path().join("tree")).unwrap();

    fs::write(root.path().join("tree/b"), "b").unwrap();
    let after = FileHasher::Full.hash_path(&root.path().join("tree")).unwrap();
    assert_ne!(before, after);
}

// =============================================================================
// Local Tar Archives (ADD)
// =============================================================================

#[test]
fn test_archive_sniffing() {
    let dir = TempDir::new().unwrap();

    let plain = dir.path().join("plain.tar");
    fs::write(&plain, layer_tar(&[("f", b"x")])).unwrap();
    assert_eq!(local_tar_archive_kind(&plain), Some(ArchiveKind::Tar));

    let gz = dir.path().join("file.tar.gz");
    let mut encoder =
        flate2::write::GzEncoder::new(fs::File::create(&gz).unwrap(), flate2::Compression::default());
    encoder.write_all(&layer_tar(&[("f", b"x")])).unwrap();
    encoder.finish().unwrap();
    assert_eq!(local_tar_archive_kind(&gz), Some(ArchiveKind::TarGz));

    let text = dir.path().join("not-an-archive.txt");
    fs::write(&text, "just text").unwrap();
    assert_eq!(local_tar_archive_kind(&text), None);
}

#[test]
fn test_unpack_local_tar_archive() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("bundle.tar");
    fs::write(&archive, layer_tar(&[("inner/data.txt", b"payload")])).unwrap();

    let dest = dir.path().join("out");
    let files = unpack_local_tar_archive(&archive, &dest).unwrap();

    assert_eq!(
        fs::read_to_string(dest.join("inner/data.txt")).unwrap(),
        "payload"
    );
    assert!(files.contains(&dest.join("inner/data.txt")));
}
