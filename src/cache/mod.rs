//! Layer cache: fingerprint-keyed storage of intermediate layers.
//!
//! A cached entry is a single-layer image. A miss is never an error, and a
//! failed push is logged but does not fail the build; pushes are idempotent
//! because keys are content-derived.

mod key;

pub use key::CompositeKey;

use std::fs;
use std::path::PathBuf;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::constants::{AUTHOR, CACHE_TAG_PREFIX};
use crate::error::{Error, Result};
use crate::image::{tarball, History, Image, Layer};
use crate::registry::RegistryClient;

/// Fingerprint-keyed layer store.
pub trait LayerCache {
    /// Looks up a layer by key. `None` on miss or on any retrieval failure.
    fn retrieve_layer(&self, key: &str) -> Option<Image>;

    /// Stores a layer under `key`. Concurrent pushes for the same key may
    /// race; the last writer wins and both report success.
    fn push_layer(&self, key: &str, layer: &Layer, created_by: &str) -> Result<()>;
}

/// Wraps one layer in a minimal image so caches can reuse image plumbing.
fn single_layer_image(layer: &Layer, created_by: &str) -> Image {
    let mut image = Image::new(Default::default(), Vec::new());
    image.append_layer(
        layer.clone(),
        History {
            created: Some(Utc::now()),
            author: Some(AUTHOR.to_string()),
            created_by: Some(created_by.to_string()),
            ..Default::default()
        },
    );
    image
}

// =============================================================================
// Local Filesystem Cache
// =============================================================================

/// `<cache_dir>/<key>` single-layer image tarballs. Also holds base images
/// keyed by their digest hex.
#[derive(Debug, Clone)]
pub struct LocalLayerCache {
    cache_dir: PathBuf,
}

impl LocalLayerCache {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Result<Self> {
        let cache_dir = cache_dir.into();
        fs::create_dir_all(&cache_dir).map_err(|e| Error::fs(&cache_dir, e))?;
        Ok(Self { cache_dir })
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        // Digest keys carry an algorithm prefix; strip it for the filename.
        let key = key.strip_prefix("sha256:").unwrap_or(key);
        self.cache_dir.join(key)
    }

    /// Retrieves any image (not just single layers) stored under `key`.
    pub fn retrieve_image(&self, key: &str) -> Option<Image> {
        let path = self.entry_path(key);
        if !path.exists() {
            debug!(key, "local cache miss");
            return None;
        }
        match tarball::read_image(&path) {
            Ok(image) => {
                info!(key, "local cache hit");
                Some(image)
            }
            Err(e) => {
                warn!(key, error = %e, "discarding unreadable cache entry");
                None
            }
        }
    }

    /// Stores an image under `key` atomically (write-then-rename).
    pub fn store_image(&self, key: &str, image: &Image) -> Result<()> {
        let path = self.entry_path(key);
        let tmp = path.with_extension("tmp");
        tarball::write_image(&tmp, image)?;
        fs::rename(&tmp, &path).map_err(|e| Error::fs(&path, e))?;
        debug!(key, path = %path.display(), "stored cache entry");
        Ok(())
    }
}

impl LayerCache for LocalLayerCache {
    fn retrieve_layer(&self, key: &str) -> Option<Image> {
        self.retrieve_image(key)
    }

    fn push_layer(&self, key: &str, layer: &Layer, created_by: &str) -> Result<()> {
        self.store_image(key, &single_layer_image(layer, created_by))
    }
}

// =============================================================================
// Registry-Backed Cache
// =============================================================================

/// Stores layers as tagged single-layer images under a cache repository;
/// the tag is derived from the composite key.
pub struct RegistryLayerCache {
    client: RegistryClient,
    cache_repo: String,
}

impl RegistryLayerCache {
    pub fn new(client: RegistryClient, cache_repo: impl Into<String>) -> Self {
        Self {
            client,
            cache_repo: cache_repo.into(),
        }
    }

    fn reference(&self, key: &str) -> String {
        let key = key.strip_prefix("sha256:").unwrap_or(key);
        format!("{}:{}{}", self.cache_repo, CACHE_TAG_PREFIX, key)
    }
}

impl LayerCache for RegistryLayerCache {
    fn retrieve_layer(&self, key: &str) -> Option<Image> {
        let reference = self.reference(key);
        match self.client.pull_image(&reference) {
            Ok(image) => {
                info!(key, reference, "cache hit in registry");
                Some(image)
            }
            Err(e) => {
                debug!(key, reference, error = %e, "registry cache miss");
                None
            }
        }
    }

    fn push_layer(&self, key: &str, layer: &Layer, created_by: &str) -> Result<()> {
        let reference = self.reference(key);
        self.client
            .push_image(&reference, &single_layer_image(layer, created_by))
    }
}
