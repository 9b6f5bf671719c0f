//! Typed views of the `spec` documents the reconciler acts on.
//!
//! Unknown fields are ignored and missing ones take their defaults, so UI
//! additions never break an agent.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;

use crate::Document;
use crate::ResourceError;
use crate::Result;

/// Desired power state of a machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerState {
    #[default]
    Running,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Topology {
    pub cores: u32,
    pub threads: u32,
    /// Bytes
    pub memory: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineBoot {
    pub order: Vec<String>,
    pub kernel: Option<String>,
    pub initramfs: Option<String>,
    pub cmdline: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineDisk {
    pub device: String,
    #[serde(rename = "type")]
    pub disk_type: String,
    pub key: String,
    pub volume: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineInterface {
    pub mac: String,
    pub model: String,
    pub network: Option<String>,
    pub bridge: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineSpec {
    pub name: String,
    pub topology: Topology,
    pub boot: MachineBoot,
    pub disks: Vec<MachineDisk>,
    pub interfaces: Vec<MachineInterface>,
    pub power: PowerState,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageVolumeSpec {
    pub name: String,
    /// `image` or `iso`
    #[serde(rename = "type")]
    pub volume_type: String,
    pub capacity: u64,
    pub allocation: u64,
    pub key: String,
    pub pool: String,
}

/// Pool as discovered on a host. Sizes are bytes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoragePoolSpec {
    pub name: String,
    /// Backend type, e.g. `dir` or `rbd`
    #[serde(rename = "type")]
    pub pool_type: String,
    pub capacity: u64,
    pub allocation: u64,
    pub available: u64,
}

/// Decodes a typed spec, mapping shape errors to `InvalidArgument`.
pub fn decode_spec<T: DeserializeOwned>(doc: &Document) -> Result<T> {
    serde_json::from_value(doc.clone())
        .map_err(|e| ResourceError::InvalidArgument(format!("spec does not decode: {e}")).into())
}
