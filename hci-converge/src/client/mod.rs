//! Access to the HCI control plane.
//!
//! The reconcilers only talk to the [`ControlPlane`] trait so that tests can
//! substitute an in-memory control plane. [`HarvesterClient`] is the real,
//! HTTP-backed implementation.

mod harvester;

pub use harvester::HarvesterClient;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::{ObservedResource, PowerAction, ResourceIdentity, ResourceKind};
use crate::spec::validate_name;

/// Request/response contract against the control plane.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Fetch a resource; `None` when it does not exist.
    async fn get(&self, identity: &ResourceIdentity) -> Result<Option<ObservedResource>>;

    /// List every resource of `kind` in `namespace`.
    async fn list(&self, kind: ResourceKind, namespace: &str) -> Result<Vec<ObservedResource>>;

    async fn create(
        &self,
        identity: &ResourceIdentity,
        document: &Value,
    ) -> Result<ObservedResource>;

    /// Apply a merge patch. The server rejects it with a conflict unless
    /// `version` is still current.
    async fn update(
        &self,
        identity: &ResourceIdentity,
        patch: &Value,
        version: &str,
    ) -> Result<ObservedResource>;

    /// Request deletion. Deleting an absent resource succeeds.
    async fn delete(&self, identity: &ResourceIdentity) -> Result<()>;

    async fn power_action(&self, identity: &ResourceIdentity, action: PowerAction) -> Result<()>;

    /// Fetch the running instance of a VM; `None` when it is not running.
    async fn get_vm_instance(&self, identity: &ResourceIdentity) -> Result<Option<Value>>;

    /// Resolve `reference` (`name`, `namespace/name` or a display name) to
    /// the identity of an existing resource.
    async fn resolve_reference(
        &self,
        kind: ResourceKind,
        namespace: &str,
        reference: &str,
    ) -> Result<Option<ResourceIdentity>> {
        let (namespace, name) = reference
            .split_once('/')
            .unwrap_or((namespace, reference));

        if validate_name("reference", name).is_ok() {
            let identity = ResourceIdentity::new(kind, namespace, name);
            if self.get(&identity).await?.is_some() {
                return Ok(Some(identity));
            }
        }

        debug!(kind = %kind, namespace, name, "Looking up reference by display name");
        let matches: Vec<ObservedResource> = self
            .list(kind, namespace)
            .await?
            .into_iter()
            .filter(|r| {
                r.document
                    .pointer("/spec/displayName")
                    .and_then(Value::as_str)
                    == Some(name)
            })
            .collect();

        match matches.as_slice() {
            [] => Ok(None),
            [found] => Ok(found
                .name()
                .map(|found| ResourceIdentity::new(kind, namespace, found))),
            _ => Err(Error::ReferenceNotFound(format!(
                "{kind} reference '{reference}' matches {} resources by display name",
                matches.len()
            ))),
        }
    }
}

/// Put the version token into a merge patch.
pub(crate) fn pin_version(patch: &Value, version: &str) -> Value {
    let mut patch = patch.clone();
    if !patch.is_object() {
        patch = Value::Object(Default::default());
    }
    patch["metadata"]["resourceVersion"] = Value::String(version.to_string());
    patch
}
