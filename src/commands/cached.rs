//! Cache-hit substitute: restores a cached layer's files instead of
//! executing the original instruction.
//!
//! Swapped in at the top of the build loop, so the loop itself stays free
//! of cache-aware branches. Reports the extracted paths as snapshot files,
//! which re-materializes the identical layer in the output image.

use std::path::PathBuf;

use tracing::info;

use super::ExecEnv;
use crate::error::Result;
use crate::image::Image;

#[derive(Debug, Clone)]
pub struct CachedCommand {
    layer_image: Image,
    text: String,
    snapshot_files: Vec<PathBuf>,
}

impl CachedCommand {
    pub fn new(layer_image: Image, text: String) -> Self {
        Self {
            layer_image,
            text,
            snapshot_files: Vec::new(),
        }
    }

    /// The original instruction's text, so history records stay identical
    /// across cached and uncached builds.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn snapshot_files(&self) -> Vec<PathBuf> {
        self.snapshot_files.clone()
    }

    pub fn execute(&mut self, env: &ExecEnv<'_>) -> Result<()> {
        info!(cmd = %self.text, "using cached layer");
        for layer in self.layer_image.layers() {
            let written = env.fs.extract_tar(&layer.uncompressed()?)?;
            self.snapshot_files.extend(written);
        }
        Ok(())
    }
}
