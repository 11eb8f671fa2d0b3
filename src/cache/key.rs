//! Running fingerprint identifying an intermediate layer.
//!
//! Seeded with the base image digest and the user's build args, then fed
//! every instruction's text and the hash of every context file it reads.
//! Two builds that agree on the prefix of contributions agree on the key.

use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::fsutil::FileHasher;

/// Ordered sequence of cache-key contributions.
#[derive(Debug, Clone)]
pub struct CompositeKey {
    hasher: FileHasher,
    parts: Vec<String>,
}

impl CompositeKey {
    pub fn new(hasher: FileHasher) -> Self {
        Self {
            hasher,
            parts: Vec::new(),
        }
    }

    /// Appends a literal contribution (instruction text, digest, build arg).
    pub fn add_key(&mut self, part: &str) {
        self.parts.push(part.to_string());
    }

    /// Appends the fingerprint of a file or subtree, using the build's
    /// selected hasher so cache identity matches snapshot identity.
    pub fn add_path(&mut self, path: &Path) -> Result<()> {
        let hash = self.hasher.hash_path(path)?;
        self.parts.push(hash);
        Ok(())
    }

    /// sha256 hex over the length-prefixed concatenation of contributions.
    /// Length prefixes keep `["ab","c"]` and `["a","bc"]` distinct.
    pub fn hash(&self) -> String {
        let mut digest = Sha256::new();
        for part in &self.parts {
            digest.update(part.len().to_le_bytes());
            digest.update(part.as_bytes());
        }
        hex::encode(digest.finalize())
    }
}
