//! Tests for the composite cache key and the local layer cache.

use std::fs;

use tempfile::TempDir;

use strata::cache::{CompositeKey, LayerCache, LocalLayerCache};
use strata::fsutil::FileHasher;
use strata::image::{Image, Layer};

fn single_file_tar(content: &[u8]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_ustar();
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, "f", content).unwrap();
    builder.into_inner().unwrap()
}

// =============================================================================
// Composite Key
// =============================================================================

#[test]
fn test_key_is_deterministic() {
    let mut a = CompositeKey::new(FileHasher::Full);
    let mut b = CompositeKey::new(FileHasher::Full);
    for key in [a.hash(), b.hash()] {
        assert_eq!(key.len(), 64, "sha256 hex");
    }
    a.add_key("base-digest");
    a.add_key("RUN echo hi");
    b.add_key("base-digest");
    b.add_key("RUN echo hi");
    assert_eq!(a.hash(), b.hash());
}

#[test]
fn test_key_is_order_sensitive() {
    let mut a = CompositeKey::new(FileHasher::Full);
    let mut b = CompositeKey::new(FileHasher::Full);
    a.add_key("one");
    a.add_key("two");
    b.add_key("two");
    b.add_key("one");
    assert_ne!(a.hash(), b.hash());
}

#[test]
fn test_key_contribution_boundaries_matter() {
    let mut a = CompositeKey::new(FileHasher::Full);
    let mut b = CompositeKey::new(FileHasher::Full);
    a.add_key("ab");
    a.add_key("c");
    b.add_key("a");
    b.add_key("bc");
    assert_ne!(a.hash(), b.hash(), "length prefixes keep contributions distinct");
}

#[test]
fn test_key_tracks_context_file_content() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("ctx");
    fs::write(&file, "v1").unwrap();

    let mut before = CompositeKey::new(FileHasher::Full);
    before.add_key("COPY ctx /ctx");
    before.add_path(&file).unwrap();
    let before = before.hash();

    fs::write(&file, "v2").unwrap();
    let mut after = CompositeKey::new(FileHasher::Full);
    after.add_key("COPY ctx /ctx");
    after.add_path(&file).unwrap();
    assert_ne!(before, after.hash());
}

// =============================================================================
// Local Layer Cache
// =============================================================================

#[test]
fn test_push_then_retrieve_layer() {
    let dir = TempDir::new().unwrap();
    let cache = LocalLayerCache::new(dir.path().join("cache")).unwrap();
    let layer = Layer::from_tar(&single_file_tar(b"cached")).unwrap();

    let key = "a".repeat(64);
    cache.push_layer(&key, &layer, "RUN build-step").unwrap();

    let image = cache.retrieve_layer(&key).expect("hit after push");
    assert_eq!(image.layers().len(), 1);
    assert_eq!(image.layers()[0].digest(), layer.digest());
    assert_eq!(
        image.config_file().history[0].created_by.as_deref(),
        Some("RUN build-step")
    );
}

#[test]
fn test_miss_returns_none() {
    let dir = TempDir::new().unwrap();
    let cache = LocalLayerCache::new(dir.path().join("cache")).unwrap();
    assert!(cache.retrieve_layer(&"f".repeat(64)).is_none());
}

#[test]
fn test_push_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let cache = LocalLayerCache::new(dir.path().join("cache")).unwrap();
    let layer = Layer::from_tar(&single_file_tar(b"same")).unwrap();

    let key = "b".repeat(64);
    cache.push_layer(&key, &layer, "RUN x").unwrap();
    cache.push_layer(&key, &layer, "RUN x").unwrap();

    assert!(cache.retrieve_layer(&key).is_some());
}

#[test]
fn test_store_image_keyed_by_digest() {
    let dir = TempDir::new().unwrap();
    let cache = LocalLayerCache::new(dir.path().join("cache")).unwrap();

    let mut image = Image::empty();
    image.append_layer(
        Layer::from_tar(&single_file_tar(b"base")).unwrap(),
        strata::image::History::default(),
    );
    let digest = image.digest().unwrap();

    cache.store_image(&digest, &image).unwrap();
    let reloaded = cache.retrieve_image(&digest).expect("hit");
    assert_eq!(reloaded.digest().unwrap(), digest);
}
