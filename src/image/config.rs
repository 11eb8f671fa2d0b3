//! Image configuration types (Docker schema 2 / OCI v1).
//!
//! Collection fields use `BTreeMap` so serialization order is stable; the
//! image digest is the hash of these bytes, so iteration order matters.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Top-level image config blob.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfigFile {
    pub architecture: String,
    pub os: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub config: Config,
    pub rootfs: RootFs,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<History>,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            architecture: "amd64".to_string(),
            os: "linux".to_string(),
            created: None,
            config: Config::default(),
            rootfs: RootFs::default(),
            history: Vec::new(),
        }
    }
}

/// Runtime configuration section of the config blob.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(rename = "Env", default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    #[serde(rename = "Cmd", skip_serializing_if = "Option::is_none")]
    pub cmd: Option<Vec<String>>,
    #[serde(rename = "Entrypoint", skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<Vec<String>>,
    #[serde(rename = "WorkingDir", default, skip_serializing_if = "String::is_empty")]
    pub working_dir: String,
    #[serde(rename = "User", default, skip_serializing_if = "String::is_empty")]
    pub user: String,
    #[serde(rename = "Volumes", skip_serializing_if = "Option::is_none")]
    pub volumes: Option<BTreeMap<String, EmptyObject>>,
    #[serde(rename = "ExposedPorts", skip_serializing_if = "Option::is_none")]
    pub exposed_ports: Option<BTreeMap<String, EmptyObject>>,
    #[serde(rename = "Labels", skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,
    #[serde(rename = "OnBuild", skip_serializing_if = "Option::is_none")]
    pub on_build: Option<Vec<String>>,
    #[serde(rename = "Shell", skip_serializing_if = "Option::is_none")]
    pub shell: Option<Vec<String>>,
    #[serde(rename = "ArgsEscaped", default, skip_serializing_if = "is_false")]
    pub args_escaped: bool,
    #[serde(rename = "StopSignal", skip_serializing_if = "Option::is_none")]
    pub stop_signal: Option<String>,
    #[serde(rename = "Healthcheck", skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<HealthCheck>,
}

/// `HEALTHCHECK` metadata. Recorded, not enforced.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct HealthCheck {
    #[serde(rename = "Test", default, skip_serializing_if = "Vec::is_empty")]
    pub test: Vec<String>,
    #[serde(rename = "Interval", skip_serializing_if = "Option::is_none")]
    pub interval: Option<i64>,
    #[serde(rename = "Timeout", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<i64>,
    #[serde(rename = "StartPeriod", skip_serializing_if = "Option::is_none")]
    pub start_period: Option<i64>,
    #[serde(rename = "Retries", skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
}

/// JSON `{}`; the value side of the `Volumes` and `ExposedPorts` sets.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct EmptyObject {}

/// Layer accounting section of the config blob.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RootFs {
    #[serde(rename = "type")]
    pub fs_type: String,
    pub diff_ids: Vec<String>,
}

impl Default for RootFs {
    fn default() -> Self {
        Self {
            fs_type: "layers".to_string(),
            diff_ids: Vec::new(),
        }
    }
}

/// One history record. Non-empty entries pair 1:1 with layers, in order.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct History {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub empty_layer: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// The epoch timestamp written everywhere in reproducible mode.
pub fn epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(0, 0).unwrap()
}

impl Config {
    /// Inserts or replaces `key=value` in `env`, preserving first-seen order.
    pub fn set_env(&mut self, key: &str, value: &str) {
        let binding = format!("{key}={value}");
        for existing in self.env.iter_mut() {
            if existing.split('=').next() == Some(key) {
                *existing = binding;
                return;
            }
        }
        self.env.push(binding);
    }

    /// Adds a path to the `Volumes` set.
    pub fn add_volume(&mut self, path: &str) {
        self.volumes
            .get_or_insert_with(BTreeMap::new)
            .insert(path.to_string(), EmptyObject {});
    }

    /// Adds a `port/proto` entry to the `ExposedPorts` set.
    pub fn expose_port(&mut self, port_proto: &str) {
        self.exposed_ports
            .get_or_insert_with(BTreeMap::new)
            .insert(port_proto.to_string(), EmptyObject {});
    }

    /// Paths currently declared as volumes.
    pub fn volume_paths(&self) -> Vec<String> {
        self.volumes
            .as_ref()
            .map(|v| v.keys().cloned().collect())
            .unwrap_or_default()
    }
}
