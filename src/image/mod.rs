//! In-memory image model.
//!
//! An [`Image`] is a config blob plus an ordered list of layers. The struct
//! enforces the accounting invariants the wire formats demand: every
//! non-empty history entry pairs with exactly one layer, and the config's
//! `rootfs.diff_ids` always mirrors the layer list.

mod config;
mod layer;
mod manifest;
pub mod tarball;

use std::io::Read;

use chrono::{DateTime, Utc};
use tar::{Archive, Builder};

pub use config::{epoch, Config, ConfigFile, EmptyObject, HealthCheck, History, RootFs};
pub use layer::{sha256_hex, Layer};
pub use manifest::{Descriptor, Manifest};

use crate::constants::SCRATCH_ENV;
use crate::error::Result;

/// A container image: config plus ordered layers.
#[derive(Debug, Clone)]
pub struct Image {
    config_file: ConfigFile,
    layers: Vec<Layer>,
}

impl Image {
    /// The empty image (`FROM scratch`), with the default PATH seeded so
    /// RUN has something to resolve binaries against.
    pub fn empty() -> Self {
        let mut config_file = ConfigFile::default();
        config_file.config.env = SCRATCH_ENV.iter().map(|s| s.to_string()).collect();
        Self {
            config_file,
            layers: Vec::new(),
        }
    }

    /// Assembles an image from parts, trusting the caller's accounting.
    pub fn new(config_file: ConfigFile, layers: Vec<Layer>) -> Self {
        Self {
            config_file,
            layers,
        }
    }

    pub fn config_file(&self) -> &ConfigFile {
        &self.config_file
    }

    pub fn config_file_mut(&mut self) -> &mut ConfigFile {
        &mut self.config_file
    }

    /// Replaces the runtime config section wholesale.
    pub fn set_config(&mut self, config: Config) {
        self.config_file.config = config;
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Appends a layer together with its history entry, keeping `diff_ids`
    /// in step.
    pub fn append_layer(&mut self, layer: Layer, history: History) {
        self.config_file
            .rootfs
            .diff_ids
            .push(layer.diff_id().to_string());
        self.config_file.history.push(History {
            empty_layer: false,
            ..history
        });
        self.layers.push(layer);
    }

    /// Records a history entry for an instruction that changed nothing on
    /// disk.
    pub fn append_empty_layer(&mut self, history: History) {
        self.config_file.history.push(History {
            empty_layer: true,
            ..history
        });
    }

    /// Serialized config blob.
    pub fn config_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.config_file)?)
    }

    /// Manifest referencing the current config and layers.
    pub fn manifest(&self) -> Result<Manifest> {
        let config_bytes = self.config_bytes()?;
        Ok(Manifest::new(&config_bytes, &self.layers))
    }

    /// `sha256:<hex>` of the serialized manifest. This is the image identity
    /// used for tags, cache keys, and reproducibility checks.
    pub fn digest(&self) -> Result<String> {
        let manifest = self.manifest()?;
        Ok(sha256_hex(&serde_json::to_vec(&manifest)?))
    }

    pub fn set_created(&mut self, created: DateTime<Utc>) {
        self.config_file.created = Some(created);
    }

    /// Rewrites the image into canonical form: epoch timestamps on the
    /// config and every history entry, and every layer tar re-rolled with
    /// zeroed mtime and ownership. Two canonical builds of the same inputs
    /// serialize to identical bytes.
    pub fn canonicalize(&mut self) -> Result<()> {
        self.config_file.created = Some(epoch());
        for entry in &mut self.config_file.history {
            entry.created = Some(epoch());
        }

        let mut canonical_layers = Vec::with_capacity(self.layers.len());
        self.config_file.rootfs.diff_ids.clear();
        for layer in &self.layers {
            let normalized = normalize_tar(&layer.uncompressed()?)?;
            let layer = Layer::from_tar(&normalized)?;
            self.config_file
                .rootfs
                .diff_ids
                .push(layer.diff_id().to_string());
            canonical_layers.push(layer);
        }
        self.layers = canonical_layers;
        Ok(())
    }
}

/// Re-rolls a tar stream with zeroed mtime, uid/gid, and owner names.
fn normalize_tar(tar_bytes: &[u8]) -> Result<Vec<u8>> {
    let mut archive = Archive::new(tar_bytes);
    let mut builder = Builder::new(Vec::new());

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        let mut header = entry.header().clone();
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        let _ = header.set_username("");
        let _ = header.set_groupname("");

        if header.entry_type().is_symlink() || header.entry_type().is_hard_link() {
            let target = match entry.link_name()? {
                Some(target) => target.into_owned(),
                None => std::path::PathBuf::new(),
            };
            builder.append_link(&mut header, &path, &target)?;
        } else {
            let mut data = Vec::new();
            entry.read_to_end(&mut data)?;
            header.set_size(data.len() as u64);
            builder.append_data(&mut header, &path, data.as_slice())?;
        }
    }

    Ok(builder.into_inner()?)
}
