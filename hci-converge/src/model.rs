//! Resource identities and observed control-plane documents.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The four managed resource kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Vm,
    Image,
    Volume,
    Network,
}

impl ResourceKind {
    /// API group/version prefix for this kind.
    fn api_prefix(&self) -> &'static str {
        match self {
            ResourceKind::Vm => "/apis/kubevirt.io/v1",
            ResourceKind::Image => "/apis/harvesterhci.io/v1beta1",
            ResourceKind::Volume => "/api/v1",
            ResourceKind::Network => "/apis/k8s.cni.cncf.io/v1",
        }
    }

    /// Plural resource name used in REST paths.
    fn plural(&self) -> &'static str {
        match self {
            ResourceKind::Vm => "virtualmachines",
            ResourceKind::Image => "virtualmachineimages",
            ResourceKind::Volume => "persistentvolumeclaims",
            ResourceKind::Network => "network-attachment-definitions",
        }
    }

    pub fn api_version(&self) -> &'static str {
        match self {
            ResourceKind::Vm => "kubevirt.io/v1",
            ResourceKind::Image => "harvesterhci.io/v1beta1",
            ResourceKind::Volume => "v1",
            ResourceKind::Network => "k8s.cni.cncf.io/v1",
        }
    }

    /// Object `kind` field on the control plane.
    pub fn object_kind(&self) -> &'static str {
        match self {
            ResourceKind::Vm => "VirtualMachine",
            ResourceKind::Image => "VirtualMachineImage",
            ResourceKind::Volume => "PersistentVolumeClaim",
            ResourceKind::Network => "NetworkAttachmentDefinition",
        }
    }

    pub fn collection_path(&self, namespace: &str) -> String {
        format!(
            "{}/namespaces/{}/{}",
            self.api_prefix(),
            namespace,
            self.plural()
        )
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceKind::Vm => "VM",
            ResourceKind::Image => "Image",
            ResourceKind::Volume => "Volume",
            ResourceKind::Network => "Network",
        };
        f.write_str(s)
    }
}

/// Uniquely addresses one resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceIdentity {
    pub kind: ResourceKind,
    pub namespace: String,
    pub name: String,
}

impl ResourceIdentity {
    pub fn new(kind: ResourceKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn item_path(&self) -> String {
        format!("{}/{}", self.kind.collection_path(&self.namespace), self.name)
    }

    /// Path of the VirtualMachineInstance backing a VM.
    pub fn instance_path(&self) -> String {
        format!(
            "/apis/kubevirt.io/v1/namespaces/{}/virtualmachineinstances/{}",
            self.namespace, self.name
        )
    }

    /// Path of a kubevirt power-action subresource.
    pub fn subresource_path(&self, action: PowerAction) -> String {
        format!(
            "/apis/subresources.kubevirt.io/v1/namespaces/{}/virtualmachines/{}/{}",
            self.namespace,
            self.name,
            action.as_str()
        )
    }
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// Imperative VM power operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerAction {
    Start,
    Stop,
    Restart,
}

impl PowerAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PowerAction::Start => "start",
            PowerAction::Stop => "stop",
            PowerAction::Restart => "restart",
        }
    }
}

/// VM lifecycle phase as reported by `status.printableStatus`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmPhase {
    Stopped,
    Starting,
    Running,
    Paused,
    Stopping,
    Terminating,
    Error(String),
    /// No status reported yet, or a status this crate does not know.
    Unknown,
}

impl VmPhase {
    pub fn from_printable_status(status: &str) -> Self {
        match status {
            "Stopped" => VmPhase::Stopped,
            "Provisioning" | "Starting" | "WaitingForVolumeBinding" | "Migrating" => {
                VmPhase::Starting
            }
            "Running" => VmPhase::Running,
            "Paused" => VmPhase::Paused,
            "Stopping" => VmPhase::Stopping,
            "Terminating" => VmPhase::Terminating,
            s if s.starts_with("Error")
                || s.starts_with("ErrImage")
                || matches!(
                    s,
                    "CrashLoopBackOff" | "ImagePullBackOff" | "Unschedulable" | "DataVolumeError"
                ) =>
            {
                VmPhase::Error(s.to_string())
            }
            _ => VmPhase::Unknown,
        }
    }

    /// Whether the phase is expected to change without intervention.
    pub fn is_transitional(&self) -> bool {
        matches!(
            self,
            VmPhase::Starting | VmPhase::Stopping | VmPhase::Terminating | VmPhase::Unknown
        )
    }
}

impl fmt::Display for VmPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmPhase::Error(s) => f.write_str(s),
            other => write!(f, "{other:?}"),
        }
    }
}

/// Whether an observed resource has settled after a mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    Pending(String),
    Failed(String),
}

/// The control plane's current representation of a resource.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedResource {
    pub kind: ResourceKind,
    pub document: Value,
}

impl ObservedResource {
    pub fn new(kind: ResourceKind, document: Value) -> Self {
        Self { kind, document }
    }

    fn str_at(&self, pointer: &str) -> Option<&str> {
        self.document.pointer(pointer).and_then(Value::as_str)
    }

    pub fn name(&self) -> Option<&str> {
        self.str_at("/metadata/name")
    }

    pub fn namespace(&self) -> Option<&str> {
        self.str_at("/metadata/namespace")
    }

    /// Optimistic-concurrency token echoed back on update.
    pub fn version_token(&self) -> Option<&str> {
        self.str_at("/metadata/resourceVersion")
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.document
            .get("metadata")
            .and_then(|m| m.get("annotations"))
            .and_then(|a| a.get(key))
            .and_then(Value::as_str)
    }

    /// Set once deletion has been requested on the control plane.
    pub fn is_terminating(&self) -> bool {
        self.document.pointer("/metadata/deletionTimestamp").is_some()
            || matches!(self.vm_phase(), VmPhase::Terminating)
    }

    /// VM phase; `Unknown` for other kinds.
    pub fn vm_phase(&self) -> VmPhase {
        if self.kind != ResourceKind::Vm {
            return VmPhase::Unknown;
        }
        self.str_at("/status/printableStatus")
            .map(VmPhase::from_printable_status)
            .unwrap_or(VmPhase::Unknown)
    }

    /// Readiness after a create, per kind.
    pub fn readiness(&self) -> Readiness {
        match self.kind {
            ResourceKind::Vm => match self.vm_phase() {
                VmPhase::Error(status) => Readiness::Failed(self.vm_failure_message(&status)),
                phase if phase.is_transitional() => Readiness::Pending(phase.to_string()),
                _ => Readiness::Ready,
            },
            ResourceKind::Image => self.image_readiness(),
            ResourceKind::Volume => match self.str_at("/status/phase") {
                Some("Lost") => Readiness::Failed("claim lost its underlying volume".into()),
                _ => Readiness::Ready,
            },
            ResourceKind::Network => Readiness::Ready,
        }
    }

    fn vm_failure_message(&self, status: &str) -> String {
        let detail = self
            .conditions()
            .find(|c| c.get("status").and_then(Value::as_str) == Some("False"))
            .and_then(|c| c.get("message").and_then(Value::as_str));
        match detail {
            Some(msg) if !msg.is_empty() => format!("{status}: {msg}"),
            _ => status.to_string(),
        }
    }

    fn conditions(&self) -> impl Iterator<Item = &Value> {
        self.document
            .pointer("/status/conditions")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
    }

    fn image_readiness(&self) -> Readiness {
        if self.str_at("/spec/sourceType") == Some("upload") {
            return Readiness::Ready;
        }
        let imported = self
            .conditions()
            .find(|c| c.get("type").and_then(Value::as_str) == Some("Imported"));
        match imported.and_then(|c| c.get("status").and_then(Value::as_str)) {
            Some("True") => Readiness::Ready,
            Some("False") => {
                let message = imported
                    .and_then(|c| c.get("message").and_then(Value::as_str))
                    .unwrap_or("image import failed");
                Readiness::Failed(message.to_string())
            }
            _ => {
                let progress = self
                    .document
                    .pointer("/status/progress")
                    .and_then(Value::as_u64)
                    .unwrap_or(0);
                Readiness::Pending(format!("importing ({progress}%)"))
            }
        }
    }
}
