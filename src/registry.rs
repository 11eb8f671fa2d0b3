//! Registry client: pull and push images over the OCI distribution
//! protocol.
//!
//! The build engine is synchronous, so this module owns a current-thread
//! tokio runtime and drives `oci-distribution` through `block_on`. Every
//! operation carries a transport timeout and a bounded retry loop;
//! transient failures surface as [`Error::Network`] only after the retries
//! are spent.

use std::time::Duration;

use oci_distribution::client::{ClientConfig, ClientProtocol, Config as OciConfig, ImageLayer};
use oci_distribution::secrets::RegistryAuth;
use oci_distribution::{Client, Reference};
use tracing::{debug, info, warn};

use crate::constants::{CONFIG_MEDIA_TYPE, LAYER_MEDIA_TYPE, REGISTRY_RETRIES, REGISTRY_TIMEOUT};
use crate::error::{Error, Result};
use crate::image::{ConfigFile, Image, Layer};

/// Connection options for registry access.
#[derive(Debug, Clone, Default)]
pub struct RegistryOptions {
    /// Use plain HTTP instead of TLS.
    pub insecure: bool,
    /// Keep TLS but skip certificate verification.
    pub skip_tls_verify: bool,
    /// Basic-auth credentials, if the keychain resolved any.
    pub credentials: Option<(String, String)>,
}

/// Blocking facade over the async OCI distribution client.
pub struct RegistryClient {
    runtime: tokio::runtime::Runtime,
    client: Client,
    auth: RegistryAuth,
}

impl RegistryClient {
    pub fn new(options: RegistryOptions) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::Config(format!("failed to start registry runtime: {e}")))?;

        let protocol = if options.insecure {
            ClientProtocol::Http
        } else {
            ClientProtocol::Https
        };
        let client = Client::new(ClientConfig {
            protocol,
            accept_invalid_certificates: options.skip_tls_verify,
            ..Default::default()
        });

        let auth = match options.credentials {
            Some((user, password)) => RegistryAuth::Basic(user, password),
            None => RegistryAuth::Anonymous,
        };

        Ok(Self {
            runtime,
            client,
            auth,
        })
    }

    /// Pulls `reference` and converts it into the builder's image model.
    pub fn pull_image(&self, reference: &str) -> Result<Image> {
        let parsed: Reference = reference.parse().map_err(|e| Error::Network {
            reference: reference.to_string(),
            reason: format!("invalid reference: {e}"),
        })?;
        info!(reference, "pulling image");

        let media_types = vec![
            oci_distribution::manifest::IMAGE_LAYER_MEDIA_TYPE,
            oci_distribution::manifest::IMAGE_LAYER_GZIP_MEDIA_TYPE,
            oci_distribution::manifest::IMAGE_DOCKER_LAYER_TAR_MEDIA_TYPE,
            oci_distribution::manifest::IMAGE_DOCKER_LAYER_GZIP_MEDIA_TYPE,
        ];

        let data = self.with_retries(reference, || {
            self.runtime.block_on(async {
                tokio::time::timeout(
                    REGISTRY_TIMEOUT,
                    self.client.pull(&parsed, &self.auth, media_types.clone()),
                )
                .await
            })
        })?;

        let config_file: ConfigFile = serde_json::from_slice(&data.config.data)?;
        let mut layers = Vec::with_capacity(data.layers.len());
        for layer in data.layers {
            let layer = if layer.media_type.ends_with("gzip") {
                Layer::from_compressed(layer.data)?
            } else {
                Layer::from_tar(&layer.data)?
            };
            layers.push(layer);
        }
        debug!(reference, layers = layers.len(), "pull complete");
        Ok(Image::new(config_file, layers))
    }

    /// Pushes `image` to `reference`.
    pub fn push_image(&self, reference: &str, image: &Image) -> Result<()> {
        let parsed: Reference = reference.parse().map_err(|e| Error::Network {
            reference: reference.to_string(),
            reason: format!("invalid reference: {e}"),
        })?;
        info!(reference, layers = image.layers().len(), "pushing image");

        let layers: Vec<ImageLayer> = image
            .layers()
            .iter()
            .map(|l| ImageLayer::new(l.compressed().to_vec(), LAYER_MEDIA_TYPE.to_string(), None))
            .collect();
        let config = OciConfig::new(image.config_bytes()?, CONFIG_MEDIA_TYPE.to_string(), None);

        self.with_retries(reference, || {
            self.runtime.block_on(async {
                tokio::time::timeout(
                    REGISTRY_TIMEOUT,
                    self.client
                        .push(&parsed, &layers, config.clone(), &self.auth, None),
                )
                .await
            })
        })?;
        info!(reference, "push complete");
        Ok(())
    }

    /// Bounded retry with linear backoff. Auth failures are terminal
    /// immediately; everything else retries.
    fn with_retries<T, E: std::fmt::Display>(
        &self,
        reference: &str,
        mut operation: impl FnMut() -> std::result::Result<std::result::Result<T, E>, tokio::time::error::Elapsed>,
    ) -> Result<T> {
        let mut last_error = String::new();
        for attempt in 1..=REGISTRY_RETRIES {
            match operation() {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => {
                    let reason = e.to_string();
                    if is_auth_failure(&reason) {
                        return Err(Error::Auth {
                            registry: registry_host(reference),
                            reason,
                        });
                    }
                    last_error = reason;
                }
                Err(_) => {
                    last_error = format!("timed out after {REGISTRY_TIMEOUT:?}");
                }
            }
            if attempt < REGISTRY_RETRIES {
                warn!(reference, attempt, error = %last_error, "registry operation failed, retrying");
                std::thread::sleep(Duration::from_millis(500 * attempt as u64));
            }
        }
        Err(Error::Network {
            reference: reference.to_string(),
            reason: last_error,
        })
    }
}

fn is_auth_failure(reason: &str) -> bool {
    reason.contains("401") || reason.contains("403") || reason.to_lowercase().contains("unauthorized")
}

fn registry_host(reference: &str) -> String {
    reference
        .split('/')
        .next()
        .unwrap_or(reference)
        .to_string()
}
