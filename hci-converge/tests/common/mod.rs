//! Shared test utilities for hci-converge integration tests.
//!
//! [`FakeControlPlane`] keeps resources in memory and simulates the
//! asynchronous parts of the real control plane: VMs move through
//! transitional phases one observation at a time, images import over a
//! couple of polls, and deletions linger for one read.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hci_converge::config::PollConfig;
use hci_converge::model::{ObservedResource, PowerAction, ResourceIdentity, ResourceKind};
use hci_converge::{ControlPlane, Error, ModuleParams, Result};
use serde_json::{Value, json};

/// Every call the reconcilers made, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Get(ResourceIdentity),
    List(ResourceKind, String),
    Create(ResourceIdentity, Value),
    Update(ResourceIdentity, Value),
    Delete(ResourceIdentity),
    Power(ResourceIdentity, PowerAction),
    GetInstance(ResourceIdentity),
}

impl Call {
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Call::Create(..) | Call::Update(..) | Call::Delete(..) | Call::Power(..)
        )
    }
}

type Key = (ResourceKind, String, String);

fn key(identity: &ResourceIdentity) -> Key {
    (
        identity.kind,
        identity.namespace.clone(),
        identity.name.clone(),
    )
}

struct Stored {
    document: Value,
    /// Status applied after the next observation.
    next_status: Option<Value>,
    deleting: bool,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<Key, Stored>,
    calls: Vec<Call>,
    version: u64,
    conflict_on_update: bool,
    image_failure: Option<String>,
    slow_boot: bool,
    frozen: bool,
}

impl State {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }
}

/// In-memory control plane.
#[derive(Default)]
pub struct FakeControlPlane {
    state: Mutex<State>,
}

impl FakeControlPlane {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Insert a resource as if it had been created out of band.
    pub fn seed(&self, kind: ResourceKind, namespace: &str, name: &str, mut document: Value) {
        let mut state = self.state.lock().unwrap();
        document["metadata"]["name"] = json!(name);
        document["metadata"]["namespace"] = json!(namespace);
        document["metadata"]["resourceVersion"] = json!(state.next_version());
        state.objects.insert(
            (kind, namespace.to_string(), name.to_string()),
            Stored {
                document,
                next_status: None,
                deleting: false,
            },
        );
    }

    /// Current stored document, without recording a call.
    pub fn document(&self, kind: ResourceKind, namespace: &str, name: &str) -> Option<Value> {
        let state = self.state.lock().unwrap();
        state
            .objects
            .get(&(kind, namespace.to_string(), name.to_string()))
            .map(|s| s.document.clone())
    }

    pub fn set_vm_phase(&self, namespace: &str, name: &str, phase: &str) {
        let mut state = self.state.lock().unwrap();
        let stored = state
            .objects
            .get_mut(&(ResourceKind::Vm, namespace.to_string(), name.to_string()))
            .expect("vm not seeded");
        stored.document["status"]["printableStatus"] = json!(phase);
        stored.next_status = None;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn mutating_calls(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_mutating).collect()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    /// Reject every update with a version conflict.
    pub fn conflict_on_update(&self) {
        self.state.lock().unwrap().conflict_on_update = true;
    }

    /// Make every image import fail with `message`.
    pub fn fail_image_imports(&self, message: &str) {
        self.state.lock().unwrap().image_failure = Some(message.to_string());
    }

    /// Report new running VMs as `Stopped` for one read before they boot.
    pub fn slow_boot(&self) {
        self.state.lock().unwrap().slow_boot = true;
    }

    /// Stop all pending transitions from completing.
    pub fn freeze(&self) {
        self.state.lock().unwrap().frozen = true;
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }
}

/// Status right after creation, and the status it settles into.
fn initial_status(kind: ResourceKind, document: &Value, state: &State) -> (Value, Option<Value>) {
    match kind {
        ResourceKind::Vm => {
            let running = document
                .pointer("/spec/running")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            if running {
                let first = if state.slow_boot { "Stopped" } else { "Starting" };
                (
                    json!({"printableStatus": first}),
                    Some(json!({"printableStatus": "Running", "ready": true})),
                )
            } else {
                (json!({"printableStatus": "Stopped"}), None)
            }
        }
        ResourceKind::Image => {
            let settled = match &state.image_failure {
                Some(message) => json!({
                    "progress": 12,
                    "conditions": [{"type": "Imported", "status": "False", "message": message}]
                }),
                None => json!({
                    "progress": 100,
                    "conditions": [{"type": "Imported", "status": "True"}]
                }),
            };
            (json!({"progress": 0}), Some(settled))
        }
        ResourceKind::Volume => (json!({"phase": "Bound"}), None),
        ResourceKind::Network => (Value::Null, None),
    }
}

/// RFC 7386 merge patch.
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(fields) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = json!({});
    }
    let object = target.as_object_mut().unwrap();
    for (k, v) in fields {
        if v.is_null() {
            object.remove(k);
        } else {
            merge_patch(object.entry(k.clone()).or_insert(Value::Null), v);
        }
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn get(&self, identity: &ResourceIdentity) -> Result<Option<ObservedResource>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Get(identity.clone()));
        let frozen = state.frozen;
        let k = key(identity);

        let Some(stored) = state.objects.get_mut(&k) else {
            return Ok(None);
        };
        let snapshot = stored.document.clone();
        if stored.deleting && !frozen {
            state.objects.remove(&k);
        } else if !frozen {
            if let Some(status) = stored.next_status.take() {
                stored.document["status"] = status;
            }
        }
        Ok(Some(ObservedResource::new(identity.kind, snapshot)))
    }

    async fn list(&self, kind: ResourceKind, namespace: &str) -> Result<Vec<ObservedResource>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::List(kind, namespace.to_string()));
        Ok(state
            .objects
            .iter()
            .filter(|((k, ns, _), _)| *k == kind && ns == namespace)
            .map(|(_, stored)| ObservedResource::new(kind, stored.document.clone()))
            .collect())
    }

    async fn create(
        &self,
        identity: &ResourceIdentity,
        document: &Value,
    ) -> Result<ObservedResource> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(Call::Create(identity.clone(), document.clone()));
        let k = key(identity);
        if state.objects.contains_key(&k) {
            return Err(Error::Conflict(format!("{} already exists", identity.name)));
        }

        let mut stored = document.clone();
        stored["metadata"]["resourceVersion"] = json!(state.next_version());
        stored["metadata"]["uid"] = json!(format!("uid-{}", state.version));
        stored["metadata"]["labels"]["harvesterhci.io/creator"] = json!("harvester");
        if let Some(interfaces) = stored
            .pointer_mut("/spec/template/spec/domain/devices/interfaces")
            .and_then(Value::as_array_mut)
        {
            for (i, interface) in interfaces.iter_mut().enumerate() {
                interface["macAddress"] = json!(format!("52:54:00:00:00:{i:02x}"));
            }
        }

        let (status, next_status) = initial_status(identity.kind, document, &state);
        if !status.is_null() {
            stored["status"] = status;
        }
        state.objects.insert(
            k,
            Stored {
                document: stored.clone(),
                next_status,
                deleting: false,
            },
        );
        Ok(ObservedResource::new(identity.kind, stored))
    }

    async fn update(
        &self,
        identity: &ResourceIdentity,
        patch: &Value,
        version: &str,
    ) -> Result<ObservedResource> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Update(identity.clone(), patch.clone()));
        if state.conflict_on_update {
            return Err(Error::Conflict("the object has been modified".into()));
        }
        let new_version = state.next_version();
        let stored = state
            .objects
            .get_mut(&key(identity))
            .ok_or_else(|| Error::Api {
                status: 404,
                body: "not found".into(),
            })?;
        if stored.document.pointer("/metadata/resourceVersion") != Some(&json!(version)) {
            return Err(Error::Conflict("stale resourceVersion".into()));
        }
        merge_patch(&mut stored.document, patch);
        stored.document["metadata"]["resourceVersion"] = json!(new_version);
        Ok(ObservedResource::new(identity.kind, stored.document.clone()))
    }

    async fn delete(&self, identity: &ResourceIdentity) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Delete(identity.clone()));
        if let Some(stored) = state.objects.get_mut(&key(identity)) {
            stored.deleting = true;
            stored.document["metadata"]["deletionTimestamp"] = json!("2026-01-01T00:00:00Z");
        }
        Ok(())
    }

    async fn power_action(&self, identity: &ResourceIdentity, action: PowerAction) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Power(identity.clone(), action));
        let stored = state
            .objects
            .get_mut(&key(identity))
            .ok_or_else(|| Error::Api {
                status: 404,
                body: "not found".into(),
            })?;
        let (now, next) = match action {
            PowerAction::Start => ("Starting", "Running"),
            PowerAction::Stop => ("Stopping", "Stopped"),
            PowerAction::Restart => ("Starting", "Running"),
        };
        stored.document["spec"]["running"] = json!(next == "Running");
        stored.document["status"] = json!({"printableStatus": now});
        stored.next_status = Some(json!({"printableStatus": next}));
        Ok(())
    }

    async fn get_vm_instance(&self, identity: &ResourceIdentity) -> Result<Option<Value>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::GetInstance(identity.clone()));
        let running = state
            .objects
            .get(&key(identity))
            .and_then(|s| s.document.pointer("/status/printableStatus").cloned())
            == Some(json!("Running"));
        Ok(running.then(|| {
            json!({
                "metadata": {"name": identity.name, "namespace": identity.namespace},
                "status": {"phase": "Running", "nodeName": "harvester-node-0"}
            })
        }))
    }
}

/// Tight polling bounds for tests.
pub fn fast_poll() -> PollConfig {
    PollConfig {
        interval: Duration::from_millis(1),
        max_attempts: 20,
        budget: Duration::from_secs(2),
    }
}

/// Parse module parameters, filling in connection defaults.
pub fn module_params(mut value: Value) -> ModuleParams {
    value["host"] = json!("https://harvester.test");
    value["token"] = json!("test-token");
    serde_json::from_value(value).expect("valid module params")
}

/// A VM document as the control plane would return it.
pub fn vm_document(phase: &str) -> Value {
    json!({
        "apiVersion": "kubevirt.io/v1",
        "kind": "VirtualMachine",
        "metadata": {"labels": {"harvesterhci.io/creator": "harvester"}},
        "spec": {
            "running": phase == "Running",
            "template": {
                "spec": {
                    "domain": {
                        "cpu": {"cores": 2},
                        "memory": {"guest": "4096Mi"},
                        "resources": {"limits": {"cpu": "2", "memory": "4Gi"}},
                        "devices": {
                            "disks": [],
                            "interfaces": [{"name": "default", "masquerade": {}, "model": "virtio"}]
                        }
                    },
                    "networks": [{"name": "default", "pod": {}}],
                    "volumes": []
                }
            }
        },
        "status": {"printableStatus": phase}
    })
}
