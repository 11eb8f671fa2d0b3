//! Image manifest (Docker schema 2).

use serde::{Deserialize, Serialize};

use crate::constants::{CONFIG_MEDIA_TYPE, LAYER_MEDIA_TYPE, MANIFEST_MEDIA_TYPE};

/// Manifest referencing the config blob and each layer by digest and size.
///
/// The image digest is the sha256 of this structure's serialized bytes, so
/// field order here is load-bearing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub schema_version: u32,
    pub media_type: String,
    pub config: Descriptor,
    pub layers: Vec<Descriptor>,
}

/// A content-addressed blob reference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub size: u64,
    pub digest: String,
}

impl Manifest {
    /// Builds a manifest from the config blob bytes and layer descriptors.
    pub fn new(config_bytes: &[u8], layers: &[super::Layer]) -> Self {
        Self {
            schema_version: 2,
            media_type: MANIFEST_MEDIA_TYPE.to_string(),
            config: Descriptor {
                media_type: CONFIG_MEDIA_TYPE.to_string(),
                size: config_bytes.len() as u64,
                digest: super::layer::sha256_hex(config_bytes),
            },
            layers: layers
                .iter()
                .map(|l| Descriptor {
                    media_type: LAYER_MEDIA_TYPE.to_string(),
                    size: l.size(),
                    digest: l.digest().to_string(),
                })
                .collect(),
        }
    }
}
