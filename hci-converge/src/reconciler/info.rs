//! Read-only VM query.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::client::ControlPlane;
use crate::error::Result;
use crate::params::VmInfoParams;
use crate::report::Outcome;
use crate::spec;

/// Reports a VM and, optionally, its running instance. Never mutates.
pub struct VmInfoQuery {
    api: Arc<dyn ControlPlane>,
}

impl VmInfoQuery {
    pub fn new(api: Arc<dyn ControlPlane>) -> Self {
        Self { api }
    }

    pub async fn query(&self, params: &VmInfoParams) -> Result<Outcome> {
        let identity = params.identity();
        spec::validate_identity(&identity)?;
        debug!("Querying VM {}/{}", identity.namespace, identity.name);

        let vm = self.api.get(&identity).await?;
        let exists = vm.is_some();
        let mut outcome = Outcome::unchanged(vm).with("exists", Value::Bool(exists));

        if params.gather_instance && exists {
            let instance = self.api.get_vm_instance(&identity).await?;
            outcome = outcome
                .with("instance_exists", Value::Bool(instance.is_some()))
                .with("instance", instance.unwrap_or(Value::Null));
        }
        Ok(outcome)
    }
}
