//! Single-file image persistence for saved intermediate stages.
//!
//! Layout inside the tarball: `manifest.json`, `config.json`, and one
//! `<hex>.tar.gz` blob per layer, named by the hex part of its digest.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use tar::{Archive, Builder, Header};
use tracing::debug;

use super::{ConfigFile, Image, Layer, Manifest};
use crate::error::{Error, Result};

const MANIFEST_NAME: &str = "manifest.json";
const CONFIG_NAME: &str = "config.json";

/// Writes `image` to a single tarball at `path`.
pub fn write_image(path: &Path, image: &Image) -> Result<()> {
    let file = File::create(path).map_err(|e| Error::fs(path, e))?;
    let mut builder = Builder::new(file);

    let config_bytes = image.config_bytes()?;
    let manifest_bytes = serde_json::to_vec(&image.manifest()?)?;

    append_blob(&mut builder, MANIFEST_NAME, &manifest_bytes)?;
    append_blob(&mut builder, CONFIG_NAME, &config_bytes)?;
    for layer in image.layers() {
        append_blob(&mut builder, &blob_name(layer.digest()), layer.compressed())?;
    }
    builder.finish()?;
    debug!(path = %path.display(), layers = image.layers().len(), "wrote image tarball");
    Ok(())
}

/// Reads an image previously written by [`write_image`].
pub fn read_image(path: &Path) -> Result<Image> {
    let file = File::open(path).map_err(|e| Error::fs(path, e))?;
    let mut archive = Archive::new(file);

    let mut blobs: HashMap<String, Vec<u8>> = HashMap::new();
    for entry in archive.entries()? {
        let mut entry = entry?;
        let name = entry.path()?.to_string_lossy().into_owned();
        let mut data = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut data)?;
        blobs.insert(name, data);
    }

    let manifest_bytes = blobs
        .remove(MANIFEST_NAME)
        .ok_or_else(|| Error::fs(path, "tarball has no manifest.json"))?;
    let config_bytes = blobs
        .remove(CONFIG_NAME)
        .ok_or_else(|| Error::fs(path, "tarball has no config.json"))?;

    let manifest: Manifest = serde_json::from_slice(&manifest_bytes)?;
    let config_file: ConfigFile = serde_json::from_slice(&config_bytes)?;

    let mut layers = Vec::with_capacity(manifest.layers.len());
    for descriptor in &manifest.layers {
        let blob = blobs
            .remove(&blob_name(&descriptor.digest))
            .ok_or_else(|| Error::fs(path, format!("missing layer blob {}", descriptor.digest)))?;
        let layer = Layer::from_compressed(blob)?;
        if layer.digest() != descriptor.digest {
            return Err(Error::Integrity {
                digest: descriptor.digest.clone(),
                actual: layer.digest().to_string(),
            });
        }
        layers.push(layer);
    }

    Ok(Image::new(config_file, layers))
}

fn blob_name(digest: &str) -> String {
    let hex = digest.strip_prefix("sha256:").unwrap_or(digest);
    format!("{hex}.tar.gz")
}

fn append_blob<W: std::io::Write>(builder: &mut Builder<W>, name: &str, data: &[u8]) -> Result<()> {
    let mut header = Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(0);
    header.set_cksum();
    builder.append_data(&mut header, name, data)?;
    Ok(())
}
