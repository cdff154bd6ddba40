//! State Differ.
//!
//! Compares a desired document against the observed one. Only the fields the
//! desired document sets are looked at, so anything the control plane adds
//! or defaults never shows up as drift. The comparison rules for individual
//! paths come from the [`DiffPolicy`] the spec builder attached.

use std::collections::BTreeMap;

use serde_json::{Map, Value, json};

use crate::model::{ObservedResource, PowerAction, VmPhase};
use crate::quantity::json_quantities_equal;
use crate::spec::{DesiredSpec, DiffPolicy, FieldPath, PowerTarget};

/// The work needed to converge one resource.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Delta {
    pub requires_create: bool,
    pub requires_delete: bool,
    /// Drifted paths and the desired value for each.
    pub update_fields: BTreeMap<FieldPath, Value>,
    pub requires_power_action: Option<PowerAction>,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        !self.requires_create
            && !self.requires_delete
            && self.update_fields.is_empty()
            && self.requires_power_action.is_none()
    }

    /// Render the structural updates as a JSON merge patch pinned to
    /// `version`.
    pub fn merge_patch(&self, version: &str) -> Value {
        let mut patch = json!({"metadata": {"resourceVersion": version}});
        for (path, value) in &self.update_fields {
            path.insert(&mut patch, value.clone());
        }
        patch
    }
}

/// Compare `desired` against `observed` (absent when `None`).
pub fn diff(desired: &DesiredSpec, observed: Option<&ObservedResource>) -> Delta {
    let Some(observed) = observed else {
        return Delta {
            requires_create: true,
            ..Delta::default()
        };
    };

    let mut delta = Delta::default();
    let mut walker = Walker {
        policy: &desired.policy,
        observed,
        updates: &mut delta.update_fields,
    };
    walker.walk(&FieldPath::root(), &desired.document, Some(&observed.document));

    delta.requires_power_action = desired
        .power
        .and_then(|target| power_action(target, &observed.vm_phase()));
    delta
}

/// Delta for `state=absent`.
pub fn diff_for_removal(observed: Option<&ObservedResource>) -> Delta {
    Delta {
        requires_delete: observed.is_some(),
        ..Delta::default()
    }
}

/// Power action needed to move from `phase` to `target`, if any. A restart
/// is always needed.
pub fn power_action(target: PowerTarget, phase: &VmPhase) -> Option<PowerAction> {
    match target {
        PowerTarget::Restarted => Some(PowerAction::Restart),
        PowerTarget::Running => match phase {
            VmPhase::Running | VmPhase::Starting | VmPhase::Paused => None,
            _ => Some(PowerAction::Start),
        },
        PowerTarget::Stopped => match phase {
            VmPhase::Stopped | VmPhase::Stopping => None,
            _ => Some(PowerAction::Stop),
        },
    }
}

struct Walker<'a> {
    policy: &'a DiffPolicy,
    observed: &'a ObservedResource,
    updates: &'a mut BTreeMap<FieldPath, Value>,
}

impl Walker<'_> {
    fn walk(&mut self, path: &FieldPath, desired: &Value, observed: Option<&Value>) {
        if self.policy.create_only.contains(path) {
            return;
        }
        if let Some(opaque) = self.policy.opaque.as_ref().filter(|o| &o.path == path) {
            let recorded = self
                .observed
                .annotation(&opaque.annotation)
                .and_then(|raw| serde_json::from_str::<Value>(raw).ok());
            if recorded.as_ref() != Some(desired) {
                let value = match observed {
                    Some(previous) => replacement(desired, previous),
                    None => desired.clone(),
                };
                self.updates.insert(path.clone(), value);
            }
            return;
        }
        // The control plane omits zero values, so an absent field matches one.
        if observed.is_none() && is_zero_value(desired) {
            return;
        }

        let equal = if self.policy.quantities.contains(path) {
            observed.is_some_and(|o| json_quantities_equal(desired, o))
        } else if self.policy.json_strings.contains(path) {
            observed.is_some_and(|o| json_strings_equal(desired, o))
        } else if self.policy.unordered.contains(path) {
            observed.is_some_and(|o| same_multiset(desired, o))
        } else if let Value::Object(fields) = desired {
            match observed {
                Some(Value::Object(_)) | None if !fields.is_empty() => {
                    for (key, value) in fields {
                        let child = observed.and_then(|o| o.get(key));
                        self.walk(&path.child(key), value, child);
                    }
                    return;
                }
                Some(o) => o.is_object() && fields.is_empty(),
                None => false,
            }
        } else {
            observed.is_some_and(|o| covers(desired, o))
        };

        if !equal {
            self.updates.insert(path.clone(), desired.clone());
        }
    }
}

/// Whether `observed` contains everything `desired` sets. Lists must match
/// element by element, in order.
fn covers(desired: &Value, observed: &Value) -> bool {
    match (desired, observed) {
        (Value::Object(d), Value::Object(o)) => d
            .iter()
            .all(|(key, value)| match o.get(key) {
                Some(ov) => covers(value, ov),
                // Empty maps inside list elements are markers (an interface
                // binding, a pod network), so only scalars may be omitted.
                None => !value.is_object() && !value.is_array() && is_zero_value(value),
            }),
        (Value::Array(d), Value::Array(o)) => {
            d.len() == o.len() && d.iter().zip(o).all(|(dv, ov)| covers(dv, ov))
        }
        (Value::Number(_), Value::Number(_)) => {
            desired.as_f64().is_some() && desired.as_f64() == observed.as_f64()
        }
        _ => desired == observed,
    }
}

/// Values a server drops from its representation (`omitempty`).
fn is_zero_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
    }
}

fn same_multiset(desired: &Value, observed: &Value) -> bool {
    let (Value::Array(d), Value::Array(o)) = (desired, observed) else {
        return desired == observed;
    };
    if d.len() != o.len() {
        return false;
    }
    let mut remaining: Vec<&Value> = o.iter().collect();
    for item in d {
        match remaining.iter().position(|candidate| *candidate == item) {
            Some(index) => {
                remaining.swap_remove(index);
            }
            None => return false,
        }
    }
    true
}

fn json_strings_equal(desired: &Value, observed: &Value) -> bool {
    let parse = |v: &Value| v.as_str().and_then(|s| serde_json::from_str::<Value>(s).ok());
    match (parse(desired), parse(observed)) {
        (Some(d), Some(o)) => d == o,
        _ => desired == observed,
    }
}

/// Merge-patch value that turns `observed` into exactly `desired`: keys
/// missing from `desired` are nulled at every depth.
fn replacement(desired: &Value, observed: &Value) -> Value {
    let (Value::Object(d), Value::Object(o)) = (desired, observed) else {
        return desired.clone();
    };
    let mut result = Map::new();
    for (key, value) in d {
        let merged = match o.get(key) {
            Some(previous) => replacement(value, previous),
            None => value.clone(),
        };
        result.insert(key.clone(), merged);
    }
    for key in o.keys() {
        if !d.contains_key(key) {
            result.insert(key.clone(), Value::Null);
        }
    }
    Value::Object(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ResourceIdentity, ResourceKind};
    use crate::params::{
        AccessMode, ConnectionParams, DiskParams, Presence, VmParams, VmState, VolumeParams,
    };
    use crate::spec::{self, vm::LAST_APPLIED_ANNOTATION};

    fn connection() -> ConnectionParams {
        ConnectionParams {
            host: "https://harvester.local".into(),
            token: Some("t".into()),
            username: None,
            password: None,
            verify_ssl: true,
            timeout: 30,
            poll_interval: None,
            poll_attempts: None,
        }
    }

    fn vm_params() -> VmParams {
        VmParams {
            connection: connection(),
            name: "my-vm".into(),
            namespace: "default".into(),
            state: VmState::Present,
            running: None,
            cpu_cores: Some(2),
            dedicated_cpu_placement: None,
            memory: Some("4Gi".into()),
            disks: None,
            networks: None,
            interfaces: None,
            labels: None,
            annotations: None,
            spec: None,
            cloud_init: None,
            check_mode: false,
        }
    }

    /// What the control plane returns after creating `desired`: the same
    /// document plus server-managed fields.
    fn observed_from(desired: &DesiredSpec, phase: &str) -> ObservedResource {
        let mut doc = desired.document.clone();
        doc["metadata"]["resourceVersion"] = json!("1001");
        doc["metadata"]["uid"] = json!("6f1c7a2e");
        doc["metadata"]["labels"]["harvesterhci.io/creator"] = json!("harvester");
        doc["status"] = json!({"printableStatus": phase});
        ObservedResource::new(desired.identity.kind, doc)
    }

    #[test]
    fn absent_requires_create_only() {
        let desired = spec::vm::build(&vm_params()).unwrap();
        let delta = diff(&desired, None);
        assert!(delta.requires_create);
        assert!(delta.update_fields.is_empty());
        assert!(delta.requires_power_action.is_none());
        assert!(!delta.requires_delete);
    }

    #[test]
    fn freshly_created_resource_has_no_drift() {
        let desired = spec::vm::build(&vm_params()).unwrap();
        let observed = observed_from(&desired, "Running");
        let delta = diff(&desired, Some(&observed));
        assert!(delta.is_empty(), "{delta:?}");
    }

    #[test]
    fn omitted_fields_never_drift() {
        let mut params = vm_params();
        params.cpu_cores = None;
        params.memory = None;
        let desired = spec::vm::build(&params).unwrap();
        let mut observed = observed_from(&desired, "Running");
        observed.document["spec"]["template"]["spec"]["domain"]["cpu"]["cores"] = json!(8);
        observed.document["spec"]["template"]["spec"]["domain"]["memory"]["guest"] =
            json!("16Gi");
        observed.document["spec"]["running"] = json!(false);
        assert!(diff(&desired, Some(&observed)).is_empty());
    }

    #[test]
    fn quantities_compare_by_value() {
        let desired = spec::vm::build(&vm_params()).unwrap();
        let mut observed = observed_from(&desired, "Running");
        let domain = &mut observed.document["spec"]["template"]["spec"]["domain"];
        domain["memory"]["guest"] = json!("4096Mi");
        domain["resources"]["limits"]["memory"] = json!("4096Mi");
        domain["resources"]["limits"]["cpu"] = json!(2);
        assert!(diff(&desired, Some(&observed)).is_empty());

        observed.document["spec"]["template"]["spec"]["domain"]["memory"]["guest"] =
            json!("8Gi");
        let delta = diff(&desired, Some(&observed));
        let path = FieldPath::new(["spec", "template", "spec", "domain", "memory", "guest"]);
        assert_eq!(delta.update_fields.get(&path), Some(&json!("4Gi")));
        assert_eq!(delta.update_fields.len(), 1);
    }

    #[test]
    fn disk_order_matters() {
        let mut params = vm_params();
        params.disks = Some(vec![
            DiskParams {
                name: Some("a".into()),
                volume_name: Some("vol-a".into()),
                ..Default::default()
            },
            DiskParams {
                name: Some("b".into()),
                volume_name: Some("vol-b".into()),
                ..Default::default()
            },
        ]);
        let desired = spec::vm::build(&params).unwrap();
        let mut observed = observed_from(&desired, "Running");
        let disks = &mut observed.document["spec"]["template"]["spec"]["domain"]["devices"]
            ["disks"];
        let swapped = json!([disks[1].clone(), disks[0].clone()]);
        *disks = swapped;

        let delta = diff(&desired, Some(&observed));
        let path = FieldPath::new(["spec", "template", "spec", "domain", "devices", "disks"]);
        assert!(delta.update_fields.contains_key(&path));
    }

    #[test]
    fn access_mode_order_does_not_matter() {
        let params = VolumeParams {
            connection: connection(),
            name: "data".into(),
            namespace: "default".into(),
            state: Presence::Present,
            storage: Some("10Gi".into()),
            access_modes: Some(vec![AccessMode::ReadWriteOnce, AccessMode::ReadOnlyMany]),
            storage_class: None,
            volume_mode: None,
            labels: None,
            image: None,
            volume_name: None,
            check_mode: false,
        };
        let desired = spec::volume::build(&params).unwrap();
        let mut observed = observed_from(&desired, "Bound");
        observed.document["spec"]["accessModes"] = json!(["ReadOnlyMany", "ReadWriteOnce"]);
        observed.document["spec"]["resources"]["requests"]["storage"] = json!("10240Mi");
        assert!(diff(&desired, Some(&observed)).is_empty());

        observed.document["spec"]["accessModes"] = json!(["ReadWriteOnce"]);
        assert!(!diff(&desired, Some(&observed)).is_empty());
    }

    #[test]
    fn labels_are_additive() {
        let mut params = vm_params();
        params.labels = Some([("team".to_string(), "infra".to_string())].into());
        let desired = spec::vm::build(&params).unwrap();
        let mut observed = observed_from(&desired, "Running");
        observed.document["metadata"]["labels"]["extra"] = json!("kept");
        assert!(diff(&desired, Some(&observed)).is_empty());

        observed.document["metadata"]["labels"]["team"] = json!("storage");
        let delta = diff(&desired, Some(&observed));
        let path = FieldPath::new(["metadata", "labels", "team"]);
        assert_eq!(delta.update_fields.get(&path), Some(&json!("infra")));

        let patch = delta.merge_patch("1001");
        assert_eq!(patch["metadata"]["resourceVersion"], "1001");
        assert_eq!(patch["metadata"]["labels"], json!({"team": "infra"}));
    }

    #[test]
    fn omitted_zero_values_are_not_drift() {
        let mut params = vm_params();
        params.dedicated_cpu_placement = Some(false);
        params.labels = Some(BTreeMap::new());
        let desired = spec::vm::build(&params).unwrap();
        let mut observed = observed_from(&desired, "Running");
        let template = &mut observed.document["spec"]["template"];
        template["spec"]["domain"]["cpu"]
            .as_object_mut()
            .unwrap()
            .remove("dedicatedCpuPlacement");
        template["metadata"].as_object_mut().unwrap().remove("labels");
        assert!(diff(&desired, Some(&observed)).is_empty());

        observed.document["spec"]["template"]["spec"]["domain"]["cpu"]["dedicatedCpuPlacement"] =
            json!(true);
        let delta = diff(&desired, Some(&observed));
        let path = FieldPath::new([
            "spec",
            "template",
            "spec",
            "domain",
            "cpu",
            "dedicatedCpuPlacement",
        ]);
        assert_eq!(delta.update_fields.get(&path), Some(&json!(false)));
    }

    #[test]
    fn list_element_markers_must_be_present() {
        let desired = json!([{"name": "default", "masquerade": {}, "primary": false}]);
        assert!(covers(&desired, &json!([{"name": "default", "masquerade": {}}])));
        assert!(!covers(&desired, &json!([{"name": "default", "bridge": {}}])));
    }

    #[test]
    fn power_targets_against_phases() {
        assert_eq!(power_action(PowerTarget::Running, &VmPhase::Running), None);
        assert_eq!(power_action(PowerTarget::Running, &VmPhase::Starting), None);
        assert_eq!(
            power_action(PowerTarget::Running, &VmPhase::Stopped),
            Some(PowerAction::Start)
        );
        assert_eq!(power_action(PowerTarget::Stopped, &VmPhase::Stopped), None);
        assert_eq!(
            power_action(PowerTarget::Stopped, &VmPhase::Running),
            Some(PowerAction::Stop)
        );
        assert_eq!(
            power_action(PowerTarget::Restarted, &VmPhase::Running),
            Some(PowerAction::Restart)
        );
    }

    #[test]
    fn restart_is_never_a_no_op() {
        let mut params = vm_params();
        params.state = VmState::Restarted;
        let desired = spec::vm::build(&params).unwrap();
        let observed = observed_from(&desired, "Running");
        let delta = diff(&desired, Some(&observed));
        assert_eq!(delta.requires_power_action, Some(PowerAction::Restart));
        assert!(delta.update_fields.is_empty());
    }

    #[test]
    fn opaque_override_compares_last_applied() {
        let mut params = vm_params();
        params.spec = Some(json!({"running": true, "template": {"spec": {"a": 1}}}));
        let desired = spec::vm::build(&params).unwrap();

        // The server expands the spec; the recorded override still matches.
        let mut observed = observed_from(&desired, "Running");
        observed.document["spec"]["template"]["spec"]["domain"] = json!({"cpu": {"cores": 1}});
        assert!(diff(&desired, Some(&observed)).is_empty());

        params.spec = Some(json!({"running": true, "template": {"spec": {"b": 2}}}));
        let changed = spec::vm::build(&params).unwrap();
        let delta = diff(&changed, Some(&observed));
        let replacement = &delta.update_fields[&FieldPath::new(["spec"])];
        assert_eq!(
            replacement,
            &json!({"running": true, "template": {"spec": {"a": null, "b": 2, "domain": null}}})
        );
        assert!(
            delta
                .update_fields
                .keys()
                .any(|p| p.segments().last().map(String::as_str) == Some(LAST_APPLIED_ANNOTATION))
        );
    }

    #[test]
    fn json_string_fields_compare_structurally() {
        let identity = ResourceIdentity::new(ResourceKind::Network, "default", "vlan10");
        let params = crate::params::NetworkParams {
            connection: connection(),
            name: identity.name.clone(),
            namespace: identity.namespace.clone(),
            state: Presence::Present,
            config: Some(json!({"type": "bridge", "vlan": 10})),
            labels: None,
            check_mode: false,
        };
        let desired = spec::network::build(&params).unwrap();
        let mut observed = observed_from(&desired, "");
        observed.document["spec"]["config"] = json!("{ \"vlan\": 10, \"type\": \"bridge\" }");
        assert!(diff(&desired, Some(&observed)).is_empty());
    }

    #[test]
    fn removal_only_deletes_what_exists() {
        assert!(diff_for_removal(None).is_empty());
        let observed = ObservedResource::new(ResourceKind::Volume, json!({}));
        assert!(diff_for_removal(Some(&observed)).requires_delete);
    }
}
