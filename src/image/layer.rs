//! A single image layer: a gzipped tar blob addressed two ways.
//!
//! The `digest` hashes the compressed bytes (what the registry stores); the
//! `diff_id` hashes the uncompressed tar (what the config's rootfs lists).

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};

use crate::error::Result;

/// Content-addressed gzipped tar blob.
#[derive(Debug, Clone)]
pub struct Layer {
    compressed: Vec<u8>,
    digest: String,
    diff_id: String,
}

impl Layer {
    /// Compresses an uncompressed tar stream into a layer.
    pub fn from_tar(tar_bytes: &[u8]) -> Result<Self> {
        let diff_id = sha256_hex(tar_bytes);
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(tar_bytes)?;
        let compressed = encoder.finish()?;
        let digest = sha256_hex(&compressed);
        Ok(Self {
            compressed,
            digest,
            diff_id,
        })
    }

    /// Wraps an already-compressed blob, decompressing once to learn the
    /// diff id.
    pub fn from_compressed(compressed: Vec<u8>) -> Result<Self> {
        let digest = sha256_hex(&compressed);
        let mut decoder = GzDecoder::new(&compressed[..]);
        let mut tar_bytes = Vec::new();
        decoder.read_to_end(&mut tar_bytes)?;
        let diff_id = sha256_hex(&tar_bytes);
        Ok(Self {
            compressed,
            digest,
            diff_id,
        })
    }

    /// `sha256:<hex>` of the compressed blob.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// `sha256:<hex>` of the uncompressed tar.
    pub fn diff_id(&self) -> &str {
        &self.diff_id
    }

    /// Compressed size in bytes.
    pub fn size(&self) -> u64 {
        self.compressed.len() as u64
    }

    /// The compressed blob.
    pub fn compressed(&self) -> &[u8] {
        &self.compressed
    }

    /// Decompresses back to the raw tar stream.
    pub fn uncompressed(&self) -> Result<Vec<u8>> {
        let mut decoder = GzDecoder::new(&self.compressed[..]);
        let mut tar_bytes = Vec::new();
        decoder.read_to_end(&mut tar_bytes)?;
        Ok(tar_bytes)
    }
}

/// `sha256:<hex>` of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(bytes)))
}
