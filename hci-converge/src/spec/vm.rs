//! VirtualMachine documents.

use std::collections::HashSet;

use serde_json::{Value, json};

use super::{
    DesiredSpec, FieldPath, IMAGE_ID_ANNOTATION, ImageReference, OpaqueField, PowerTarget,
    ReferenceTarget, ResolvedImage, validate_identity, validate_name,
};
use crate::error::{Error, Result};
use crate::params::{CloudInitParams, DiskParams, VmParams, VmState};
use crate::quantity::Quantity;

pub const SSH_NAMES_ANNOTATION: &str = "harvesterhci.io/sshNames";
pub const VOLUME_CLAIM_TEMPLATES_ANNOTATION: &str = "harvesterhci.io/volumeClaimTemplates";
/// Records the raw spec override applied last, for opaque comparison.
pub const LAST_APPLIED_ANNOTATION: &str = "hci-converge.io/last-applied-spec";

const DEFAULT_CPU_CORES: u32 = 2;
const DEFAULT_MEMORY: &str = "4Gi";
const CLOUD_INIT_DISK: &str = "cloudinitdisk";

const DEVICES: [&str; 5] = ["spec", "template", "spec", "domain", "devices"];

/// Build the desired VirtualMachine for `params`.
pub fn build(params: &VmParams) -> Result<DesiredSpec> {
    let identity = params.identity();
    validate_identity(&identity)?;

    let mut desired = DesiredSpec::new(identity);
    desired.power = match params.state {
        VmState::Started => Some(PowerTarget::Running),
        VmState::Stopped => Some(PowerTarget::Stopped),
        VmState::Restarted => Some(PowerTarget::Restarted),
        VmState::Present | VmState::Absent => None,
    };

    desired.set_labels(&["metadata", "labels"], &params.labels);
    if let Some(annotations) = &params.annotations {
        for (key, value) in annotations {
            desired.set(
                &["metadata", "annotations", key.as_str()],
                Value::String(value.clone()),
            );
        }
    }

    match &params.spec {
        Some(raw) => build_override(&mut desired, raw)?,
        None => build_structured(&mut desired, params)?,
    }
    Ok(desired)
}

/// Running flag sent at creation: the power target wins over `running`.
fn initial_running(params: &VmParams) -> bool {
    match params.state {
        VmState::Stopped => false,
        VmState::Started | VmState::Restarted => true,
        _ => params.running.unwrap_or(true),
    }
}

fn build_override(desired: &mut DesiredSpec, raw: &Value) -> Result<()> {
    if !raw.is_object() {
        return Err(Error::invalid("spec must be a mapping"));
    }
    let recorded = serde_json::to_string(raw)
        .map_err(|e| Error::invalid(format!("spec cannot be serialised: {e}")))?;
    desired.set(&["spec"], raw.clone());
    desired.set(
        &["metadata", "annotations", LAST_APPLIED_ANNOTATION],
        Value::String(recorded),
    );
    desired.policy.json_strings.insert(FieldPath::new([
        "metadata",
        "annotations",
        LAST_APPLIED_ANNOTATION,
    ]));
    desired.policy.opaque = Some(OpaqueField {
        path: FieldPath::new(["spec"]),
        annotation: LAST_APPLIED_ANNOTATION.to_string(),
    });
    Ok(())
}

fn build_structured(desired: &mut DesiredSpec, params: &VmParams) -> Result<()> {
    if params.cpu_cores == Some(0) {
        return Err(Error::invalid("cpu_cores must be greater than 0"));
    }
    if let Some(memory) = &params.memory {
        let parsed: Quantity = memory
            .parse()
            .map_err(|e| Error::invalid(format!("memory: {e}")))?;
        if !parsed.is_positive() {
            return Err(Error::invalid("memory must be greater than 0"));
        }
    }

    let cores = params.cpu_cores.map(Value::from);
    let cpu_limit = params.cpu_cores.map(|c| Value::String(c.to_string()));
    let memory = params.memory.clone().map(Value::String);

    desired.set_create_only(&["spec", "running"], Value::Bool(initial_running(params)));
    desired.set_create_only(
        &["spec", "template", "metadata", "annotations", SSH_NAMES_ANNOTATION],
        json!("[]"),
    );
    desired.set_labels(&["spec", "template", "metadata", "labels"], &params.labels);

    let domain = |leaf: &[&'static str]| -> Vec<&'static str> {
        let mut path = vec!["spec", "template", "spec", "domain"];
        path.extend_from_slice(leaf);
        path
    };

    desired.set_or_default(&domain(&["cpu", "cores"]), cores, json!(DEFAULT_CPU_CORES));
    if let Some(dedicated) = params.dedicated_cpu_placement {
        desired.set(&domain(&["cpu", "dedicatedCpuPlacement"]), Value::Bool(dedicated));
    }
    desired.set_or_default(&domain(&["memory", "guest"]), memory.clone(), json!(DEFAULT_MEMORY));
    desired.set_or_default(
        &domain(&["resources", "limits", "cpu"]),
        cpu_limit,
        json!(DEFAULT_CPU_CORES.to_string()),
    );
    desired.set_or_default(
        &domain(&["resources", "limits", "memory"]),
        memory,
        json!(DEFAULT_MEMORY),
    );
    desired.set_create_only(&domain(&["features", "acpi", "enabled"]), json!(true));
    desired.set_create_only(&domain(&["machine", "type"]), json!("q35"));

    for quantity in [
        domain(&["memory", "guest"]),
        domain(&["resources", "limits", "cpu"]),
        domain(&["resources", "limits", "memory"]),
    ] {
        desired.mark_quantity(&quantity);
    }

    build_storage(desired, params)?;
    build_networking(desired, params)?;
    Ok(())
}

fn build_storage(desired: &mut DesiredSpec, params: &VmParams) -> Result<()> {
    let mut devices = Vec::new();
    let mut volumes = Vec::new();
    let mut names = HashSet::new();

    for (index, disk) in params.disks.iter().flatten().enumerate() {
        let name = disk.name.clone().unwrap_or_else(|| format!("disk{index}"));
        validate_name("disk name", &name)?;
        if name == CLOUD_INIT_DISK {
            return Err(Error::invalid(format!("disk name '{name}' is reserved")));
        }
        if !names.insert(name.clone()) {
            return Err(Error::invalid(format!("duplicate disk name '{name}'")));
        }

        devices.push(disk_device(&name, disk));

        let claim = match (&disk.volume_name, &disk.image) {
            (Some(volume), None) => volume.clone(),
            (None, Some(image)) => {
                let size = disk.size.clone().ok_or_else(|| {
                    Error::invalid(format!("disk '{name}' created from an image needs a size"))
                })?;
                let parsed: Quantity = size
                    .parse()
                    .map_err(|e| Error::invalid(format!("disk '{name}' size: {e}")))?;
                if !parsed.is_positive() {
                    return Err(Error::invalid(format!("disk '{name}' size must be positive")));
                }
                let claim = format!("{}-{}", params.name, name);
                desired.references.push(ImageReference {
                    image: image.clone(),
                    target: ReferenceTarget::VmDisk {
                        disk: name.clone(),
                        claim: claim.clone(),
                        size,
                        storage_class: disk.storage_class.clone(),
                    },
                });
                claim
            }
            (Some(_), Some(_)) => {
                return Err(Error::invalid(format!(
                    "disk '{name}' sets both volume_name and image"
                )));
            }
            (None, None) => {
                return Err(Error::invalid(format!(
                    "disk '{name}' needs either volume_name or image"
                )));
            }
        };
        volumes.push(json!({"name": name, "persistentVolumeClaim": {"claimName": claim}}));
    }

    if let Some(config) = &params.cloud_init {
        if let Some((device, volume)) = cloud_init(config)? {
            devices.push(device);
            volumes.push(volume);
        }
    }

    let mut disks_path = DEVICES.to_vec();
    disks_path.push("disks");
    let volumes_path = ["spec", "template", "spec", "volumes"];
    if params.disks.is_some() {
        desired.set(&disks_path, Value::Array(devices));
        desired.set(&volumes_path, Value::Array(volumes));
    } else {
        desired.set_create_only(&disks_path, Value::Array(devices));
        desired.set_create_only(&volumes_path, Value::Array(volumes));
    }
    Ok(())
}

fn disk_device(name: &str, disk: &DiskParams) -> Value {
    let mut device = if disk.cdrom {
        let bus = disk.bus.clone().unwrap_or_else(|| "sata".to_string());
        json!({"name": name, "cdrom": {"bus": bus}})
    } else {
        let bus = disk.bus.clone().unwrap_or_else(|| "virtio".to_string());
        json!({"name": name, "disk": {"bus": bus}})
    };
    if let Some(order) = disk.boot_order {
        device["bootOrder"] = json!(order);
    }
    device
}

/// Render the NoCloud disk; `None` when no data was supplied.
fn cloud_init(config: &CloudInitParams) -> Result<Option<(Value, Value)>> {
    let mut source = serde_json::Map::new();

    let user_data = match (&config.user_data_raw, &config.user_data) {
        (Some(raw), _) if raw.starts_with("#cloud-config") => Some(raw.clone()),
        (Some(raw), _) => Some(format!("#cloud-config\n{raw}")),
        (None, Some(data)) => {
            if !data.is_object() {
                return Err(Error::invalid("cloud_init.user_data must be a mapping"));
            }
            Some(format!("#cloud-config\n{}", to_yaml(data)?))
        }
        (None, None) => None,
    };
    if let Some(user_data) = user_data {
        source.insert("userData".into(), Value::String(user_data));
    }

    match &config.network_data {
        Some(Value::String(raw)) => {
            source.insert("networkData".into(), Value::String(raw.clone()));
        }
        Some(data) if data.is_object() => {
            source.insert("networkData".into(), Value::String(to_yaml(data)?));
        }
        Some(_) => return Err(Error::invalid("cloud_init.network_data must be a mapping")),
        None => {}
    }

    if source.is_empty() {
        return Ok(None);
    }
    Ok(Some((
        json!({"name": CLOUD_INIT_DISK, "disk": {"bus": "virtio"}}),
        json!({"name": CLOUD_INIT_DISK, "cloudInitNoCloud": Value::Object(source)}),
    )))
}

fn to_yaml(value: &Value) -> Result<String> {
    serde_yaml::to_string(value)
        .map_err(|e| Error::invalid(format!("cloud-init data cannot be rendered as YAML: {e}")))
}

fn build_networking(desired: &mut DesiredSpec, params: &VmParams) -> Result<()> {
    let networks = match &params.networks {
        Some(networks) => networks.clone(),
        None => vec![json!({"name": "default", "pod": {}})],
    };
    let mut names = HashSet::new();
    for network in &networks {
        let name = network
            .get("name")
            .and_then(Value::as_str)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::invalid("every network needs a name"))?;
        if !names.insert(name.to_string()) {
            return Err(Error::invalid(format!("duplicate network name '{name}'")));
        }
    }

    let interfaces = match &params.interfaces {
        Some(interfaces) => {
            for interface in interfaces {
                let name = interface.get("name").and_then(Value::as_str);
                if !name.is_some_and(|n| names.contains(n)) {
                    return Err(Error::invalid(
                        "every interface needs the name of a configured network",
                    ));
                }
            }
            interfaces.clone()
        }
        None => networks.iter().map(derive_interface).collect(),
    };

    let mut interfaces_path = DEVICES.to_vec();
    interfaces_path.push("interfaces");
    let networks_path = ["spec", "template", "spec", "networks"];
    if params.networks.is_some() || params.interfaces.is_some() {
        desired.set(&networks_path, Value::Array(networks));
        desired.set(&interfaces_path, Value::Array(interfaces));
    } else {
        desired.set_create_only(&networks_path, Value::Array(networks));
        desired.set_create_only(&interfaces_path, Value::Array(interfaces));
    }
    Ok(())
}

/// Pod networks are masqueraded, everything else is bridged.
fn derive_interface(network: &Value) -> Value {
    let name = network.get("name").cloned().unwrap_or(Value::Null);
    if network.get("pod").is_some() {
        json!({"name": name, "masquerade": {}, "model": "virtio"})
    } else {
        json!({"name": name, "bridge": {}, "model": "virtio"})
    }
}

/// Emit one claim template per image-backed disk.
pub(super) fn bind_images(
    desired: &mut DesiredSpec,
    resolved: &[(ImageReference, ResolvedImage)],
) -> Result<()> {
    let mut templates = Vec::new();
    for (reference, image) in resolved {
        let ReferenceTarget::VmDisk {
            claim,
            size,
            storage_class,
            ..
        } = &reference.target
        else {
            continue;
        };
        let storage_class = storage_class.clone().unwrap_or_else(|| image.storage_class());
        templates.push(json!({
            "metadata": {
                "name": claim,
                "annotations": {IMAGE_ID_ANNOTATION: image.id()},
            },
            "spec": {
                "accessModes": ["ReadWriteMany"],
                "resources": {"requests": {"storage": size}},
                "volumeMode": "Block",
                "storageClassName": storage_class,
            },
        }));
    }
    if templates.is_empty() {
        return Ok(());
    }

    let rendered = serde_json::to_string(&templates)
        .map_err(|e| Error::invalid(format!("claim templates cannot be serialised: {e}")))?;
    desired.set_create_only(
        &["metadata", "annotations", VOLUME_CLAIM_TEMPLATES_ANNOTATION],
        Value::String(rendered),
    );
    Ok(())
}
