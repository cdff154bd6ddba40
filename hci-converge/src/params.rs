//! Inbound parameter sets, one per resource kind.
//!
//! These mirror the flat parameter tables the invocation host supplies.
//! Deserialisation only checks shape; semantic validation happens in the
//! spec builders.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use crate::config::DEFAULT_TIMEOUT_SECS;
use crate::model::{ResourceIdentity, ResourceKind};

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_namespace() -> String {
    "default".to_string()
}

/// Connection settings shared by every kind.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionParams {
    pub host: String,
    pub token: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default = "default_true")]
    pub verify_ssl: bool,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Seconds between status polls.
    pub poll_interval: Option<u64>,
    pub poll_attempts: Option<u32>,
}

/// Lifecycle states accepted for VMs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmState {
    #[default]
    Present,
    Absent,
    Started,
    Stopped,
    Restarted,
}

/// Lifecycle states accepted for images, volumes and networks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    #[default]
    Present,
    Absent,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiskParams {
    pub name: Option<String>,
    /// Disk bus, `virtio` when omitted.
    pub bus: Option<String>,
    /// Existing volume (claim) to attach.
    pub volume_name: Option<String>,
    /// Image to clone a fresh volume from; requires `size`.
    pub image: Option<String>,
    pub size: Option<String>,
    pub storage_class: Option<String>,
    pub boot_order: Option<u32>,
    /// Attach as a CD-ROM instead of a disk.
    #[serde(default)]
    pub cdrom: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CloudInitParams {
    /// Mapping rendered to YAML with a `#cloud-config` header.
    pub user_data: Option<Value>,
    /// Raw user data; takes precedence over `user_data`.
    pub user_data_raw: Option<String>,
    pub network_data: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VmParams {
    #[serde(flatten)]
    pub connection: ConnectionParams,
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub state: VmState,
    /// Initial power state when the VM is created.
    pub running: Option<bool>,
    pub cpu_cores: Option<u32>,
    pub dedicated_cpu_placement: Option<bool>,
    pub memory: Option<String>,
    pub disks: Option<Vec<DiskParams>>,
    pub networks: Option<Vec<Value>>,
    pub interfaces: Option<Vec<Value>>,
    pub labels: Option<BTreeMap<String, String>>,
    pub annotations: Option<BTreeMap<String, String>>,
    /// Complete VM spec; bypasses structural diffing.
    pub spec: Option<Value>,
    pub cloud_init: Option<CloudInitParams>,
    #[serde(default)]
    pub check_mode: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageSourceType {
    #[default]
    Download,
    Upload,
}

impl ImageSourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageSourceType::Download => "download",
            ImageSourceType::Upload => "upload",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageParams {
    #[serde(flatten)]
    pub connection: ConnectionParams,
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub state: Presence,
    pub url: Option<String>,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub source_type: Option<ImageSourceType>,
    pub storage_class: Option<String>,
    pub labels: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub check_mode: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum AccessMode {
    ReadWriteOnce,
    ReadOnlyMany,
    ReadWriteMany,
    ReadWriteOncePod,
}

impl AccessMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessMode::ReadWriteOnce => "ReadWriteOnce",
            AccessMode::ReadOnlyMany => "ReadOnlyMany",
            AccessMode::ReadWriteMany => "ReadWriteMany",
            AccessMode::ReadWriteOncePod => "ReadWriteOncePod",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum VolumeMode {
    Filesystem,
    Block,
}

impl VolumeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            VolumeMode::Filesystem => "Filesystem",
            VolumeMode::Block => "Block",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VolumeParams {
    #[serde(flatten)]
    pub connection: ConnectionParams,
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub state: Presence,
    /// Requested size, e.g. `10Gi`.
    pub storage: Option<String>,
    pub access_modes: Option<Vec<AccessMode>>,
    pub storage_class: Option<String>,
    pub volume_mode: Option<VolumeMode>,
    pub labels: Option<BTreeMap<String, String>>,
    /// Image to clone the volume from.
    pub image: Option<String>,
    /// Pre-existing persistent volume to bind.
    pub volume_name: Option<String>,
    #[serde(default)]
    pub check_mode: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkParams {
    #[serde(flatten)]
    pub connection: ConnectionParams,
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub state: Presence,
    /// CNI config as a mapping or a JSON string.
    pub config: Option<Value>,
    pub labels: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub check_mode: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VmInfoParams {
    #[serde(flatten)]
    pub connection: ConnectionParams,
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Also fetch the running VirtualMachineInstance.
    #[serde(default = "default_true")]
    pub gather_instance: bool,
}

/// One invocation's parameters, discriminated by `kind`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModuleParams {
    Vm(VmParams),
    Image(ImageParams),
    Volume(VolumeParams),
    Network(NetworkParams),
    VmInfo(VmInfoParams),
}

impl ModuleParams {
    pub fn connection(&self) -> &ConnectionParams {
        match self {
            ModuleParams::Vm(p) => &p.connection,
            ModuleParams::Image(p) => &p.connection,
            ModuleParams::Volume(p) => &p.connection,
            ModuleParams::Network(p) => &p.connection,
            ModuleParams::VmInfo(p) => &p.connection,
        }
    }

    pub fn connection_mut(&mut self) -> &mut ConnectionParams {
        match self {
            ModuleParams::Vm(p) => &mut p.connection,
            ModuleParams::Image(p) => &mut p.connection,
            ModuleParams::Volume(p) => &mut p.connection,
            ModuleParams::Network(p) => &mut p.connection,
            ModuleParams::VmInfo(p) => &mut p.connection,
        }
    }

    pub fn set_check_mode(&mut self, check_mode: bool) {
        match self {
            ModuleParams::Vm(p) => p.check_mode = check_mode,
            ModuleParams::Image(p) => p.check_mode = check_mode,
            ModuleParams::Volume(p) => p.check_mode = check_mode,
            ModuleParams::Network(p) => p.check_mode = check_mode,
            ModuleParams::VmInfo(_) => {}
        }
    }
}

impl VmParams {
    pub fn identity(&self) -> ResourceIdentity {
        ResourceIdentity::new(ResourceKind::Vm, &self.namespace, &self.name)
    }
}

impl ImageParams {
    pub fn identity(&self) -> ResourceIdentity {
        ResourceIdentity::new(ResourceKind::Image, &self.namespace, &self.name)
    }
}

impl VolumeParams {
    pub fn identity(&self) -> ResourceIdentity {
        ResourceIdentity::new(ResourceKind::Volume, &self.namespace, &self.name)
    }
}

impl NetworkParams {
    pub fn identity(&self) -> ResourceIdentity {
        ResourceIdentity::new(ResourceKind::Network, &self.namespace, &self.name)
    }
}

impl VmInfoParams {
    pub fn identity(&self) -> ResourceIdentity {
        ResourceIdentity::new(ResourceKind::Vm, &self.namespace, &self.name)
    }
}
