//! Tests for the layered map and snapshotter.

use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::PathBuf;

use tempfile::TempDir;

use strata::fsutil::{FileHasher, Filesystem};
use strata::snapshot::{is_empty_tar, LayeredMap, Snapshotter};

fn snapshotter(root: &TempDir, reproducible: bool) -> Snapshotter {
    let fs = Filesystem::new(root.path().to_path_buf(), &[]);
    Snapshotter::new(fs, FileHasher::Full, reproducible)
}

/// Collects `name → contents` for regular entries, `name → None` markers
/// for everything else.
fn tar_entries(tar_bytes: &[u8]) -> BTreeMap<String, Option<String>> {
    let mut archive = tar::Archive::new(tar_bytes);
    let mut entries = BTreeMap::new();
    for entry in archive.entries().unwrap() {
        let mut entry = entry.unwrap();
        let name = entry.path().unwrap().to_string_lossy().into_owned();
        if entry.header().entry_type().is_file() {
            let mut content = String::new();
            entry.read_to_string(&mut content).unwrap();
            entries.insert(name, Some(content));
        } else {
            entries.insert(name, None);
        }
    }
    entries
}

fn tar_names(tar_bytes: &[u8]) -> Vec<String> {
    let mut archive = tar::Archive::new(tar_bytes);
    archive
        .entries()
        .unwrap()
        .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
        .collect()
}

// =============================================================================
// Snapshotter
// =============================================================================

#[test]
fn test_snapshot_with_no_changes_is_empty() {
    let root = TempDir::new().unwrap();
    fs::write(root.path().join("existing"), "base").unwrap();

    let mut snapshotter = snapshotter(&root, false);
    snapshotter.init().unwrap();

    let tar = snapshotter.take_snapshot_full().unwrap();
    assert!(is_empty_tar(&tar), "unchanged tree must produce an empty tar");
}

#[test]
fn test_snapshot_captures_new_file() {
    let root = TempDir::new().unwrap();
    let mut snapshotter = snapshotter(&root, false);
    snapshotter.init().unwrap();

    fs::write(root.path().join("new.txt"), "hello\n").unwrap();
    let tar = snapshotter.take_snapshot_full().unwrap();

    assert!(!is_empty_tar(&tar));
    let entries = tar_entries(&tar);
    assert_eq!(entries.get("new.txt"), Some(&Some("hello\n".to_string())));
}

#[test]
fn test_snapshot_captures_changed_content() {
    let root = TempDir::new().unwrap();
    fs::write(root.path().join("file"), "one").unwrap();

    let mut snapshotter = snapshotter(&root, false);
    snapshotter.init().unwrap();

    fs::write(root.path().join("file"), "two").unwrap();
    let tar = snapshotter.take_snapshot_full().unwrap();
    let entries = tar_entries(&tar);
    assert_eq!(entries.get("file"), Some(&Some("two".to_string())));
}

#[test]
fn test_deleted_file_becomes_whiteout() {
    let root = TempDir::new().unwrap();
    fs::write(root.path().join("doomed"), "x").unwrap();

    let mut snapshotter = snapshotter(&root, false);
    snapshotter.init().unwrap();

    fs::remove_file(root.path().join("doomed")).unwrap();
    let tar = snapshotter.take_snapshot_full().unwrap();
    let names = tar_names(&tar);
    assert_eq!(names, vec![".wh.doomed".to_string()]);
}

#[test]
fn test_snapshot_twice_without_mutation_is_empty() {
    let root = TempDir::new().unwrap();
    let mut snapshotter = snapshotter(&root, false);
    snapshotter.init().unwrap();

    fs::write(root.path().join("a"), "1").unwrap();
    let first = snapshotter.take_snapshot_full().unwrap();
    assert!(!is_empty_tar(&first));

    let second = snapshotter.take_snapshot_full().unwrap();
    assert!(is_empty_tar(&second), "no mutation between snapshots");
}

#[test]
fn test_snapshot_entries_are_sorted() {
    let root = TempDir::new().unwrap();
    let mut snapshotter = snapshotter(&root, false);
    snapshotter.init().unwrap();

    // Created out of order on purpose.
    fs::write(root.path().join("b"), "2").unwrap();
    fs::write(root.path().join("a"), "1").unwrap();
    fs::write(root.path().join("c"), "3").unwrap();

    let names = tar_names(&snapshotter.take_snapshot_full().unwrap());
    let mut sorted = names.clone();
    sorted.sort();
    assert_eq!(names, sorted, "tar entries must be lexicographically sorted");
}

#[test]
fn test_explicit_files_snapshot_ignores_other_changes() {
    let root = TempDir::new().unwrap();
    let mut snapshotter = snapshotter(&root, false);
    snapshotter.init().unwrap();

    fs::write(root.path().join("wanted"), "yes").unwrap();
    fs::write(root.path().join("unwanted"), "no").unwrap();

    let tar = snapshotter
        .take_snapshot(&[root.path().join("wanted")])
        .unwrap();
    let names = tar_names(&tar);
    assert_eq!(names, vec!["wanted".to_string()]);
}

#[test]
fn test_explicit_missing_file_becomes_whiteout() {
    let root = TempDir::new().unwrap();
    fs::write(root.path().join("gone"), "x").unwrap();

    let mut snapshotter = snapshotter(&root, false);
    snapshotter.init().unwrap();

    fs::remove_file(root.path().join("gone")).unwrap();
    let tar = snapshotter
        .take_snapshot(&[root.path().join("gone")])
        .unwrap();
    assert_eq!(tar_names(&tar), vec![".wh.gone".to_string()]);
}

#[test]
fn test_reproducible_snapshot_zeroes_mtimes() {
    let root = TempDir::new().unwrap();
    let mut snapshotter = snapshotter(&root, true);
    snapshotter.init().unwrap();

    fs::write(root.path().join("file"), "data").unwrap();
    let tar = snapshotter.take_snapshot_full().unwrap();

    let mut archive = tar::Archive::new(&tar[..]);
    for entry in archive.entries().unwrap() {
        let entry = entry.unwrap();
        assert_eq!(entry.header().mtime().unwrap(), 0);
    }
}

#[test]
fn test_unpacking_snapshot_restores_changed_files() {
    // Unpacking a snapshot must reproduce exactly the changed files.
    let root = TempDir::new().unwrap();
    fs::create_dir(root.path().join("dir")).unwrap();
    fs::write(root.path().join("dir/base"), "base").unwrap();

    let mut snapshotter = snapshotter(&root, false);
    snapshotter.init().unwrap();

    fs::write(root.path().join("dir/added"), "added").unwrap();
    let tar = snapshotter.take_snapshot_full().unwrap();

    let replay = TempDir::new().unwrap();
    Filesystem::new(replay.path().to_path_buf(), &[])
        .extract_tar(&tar)
        .unwrap();

    assert_eq!(
        fs::read_to_string(replay.path().join("dir/added")).unwrap(),
        "added"
    );
    assert!(
        !replay.path().join("dir/base").exists(),
        "unchanged files do not belong in the delta"
    );
}

// =============================================================================
// Layered Map
// =============================================================================

#[test]
fn test_layered_map_detects_change_only_once() {
    let root = TempDir::new().unwrap();
    let file = root.path().join("f");
    fs::write(&file, "v1").unwrap();

    let mut map = LayeredMap::new(FileHasher::Full);
    map.start_layer();
    assert!(map.maybe_add(&file).unwrap(), "first sighting is a change");
    assert!(!map.maybe_add(&file).unwrap(), "same content is not");

    fs::write(&file, "v2").unwrap();
    map.start_layer();
    assert!(map.maybe_add(&file).unwrap(), "new content is a change");
}

#[test]
fn test_layered_map_whiteout_shadows_lower_layers() {
    let root = TempDir::new().unwrap();
    let file = root.path().join("f");
    fs::write(&file, "v1").unwrap();

    let mut map = LayeredMap::new(FileHasher::Full);
    map.start_layer();
    map.maybe_add(&file).unwrap();

    map.start_layer();
    assert!(map.maybe_add_whiteout(&file), "present in composition");
    assert!(map.get(&file).is_none(), "whiteout hides the entry");
    assert!(
        !map.maybe_add_whiteout(&file),
        "already absent from composition"
    );
}

#[test]
fn test_layered_map_composition_paths() {
    let root = TempDir::new().unwrap();
    let a = root.path().join("a");
    let b = root.path().join("b");
    fs::write(&a, "a").unwrap();
    fs::write(&b, "b").unwrap();

    let mut map = LayeredMap::new(FileHasher::Full);
    map.start_layer();
    map.maybe_add(&a).unwrap();
    map.maybe_add(&b).unwrap();

    map.start_layer();
    map.maybe_add_whiteout(&a);

    let paths: Vec<PathBuf> = map.composition_paths().into_iter().collect();
    assert_eq!(paths, vec![b]);
}
