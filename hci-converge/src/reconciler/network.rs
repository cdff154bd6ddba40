//! Network reconciler - network attachment definitions.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::{Lifecycle, Reconciler};
use crate::client::ControlPlane;
use crate::config::PollConfig;
use crate::error::Result;
use crate::model::ResourceIdentity;
use crate::params::{NetworkParams, Presence};
use crate::report::Outcome;
use crate::spec;

pub struct NetworkReconciler {
    api: Arc<dyn ControlPlane>,
    poll: PollConfig,
}

impl NetworkReconciler {
    pub fn new(api: Arc<dyn ControlPlane>, poll: PollConfig) -> Self {
        Self { api, poll }
    }
}

#[async_trait]
impl Reconciler for NetworkReconciler {
    type Params = NetworkParams;

    async fn reconcile(&self, params: &Self::Params) -> Result<Outcome> {
        let identity = params.identity();
        if params.state == Presence::Absent {
            spec::validate_identity(&identity)?;
            return self.finalize(&identity, params.check_mode).await;
        }

        let desired = spec::network::build(params)?;
        info!("Reconciling network {}/{}", identity.namespace, identity.name);

        let lifecycle = Lifecycle::new(self.api.as_ref(), &self.poll, params.check_mode);
        let observed = lifecycle.observe(&identity).await?;
        let converged = lifecycle.ensure_present(desired, observed).await?;
        Ok(Outcome {
            changed: converged.changed,
            ..Outcome::unchanged(converged.resource)
        })
    }

    async fn finalize(&self, identity: &ResourceIdentity, check_mode: bool) -> Result<Outcome> {
        info!("Finalizing (deleting) network {}/{}", identity.namespace, identity.name);
        let lifecycle = Lifecycle::new(self.api.as_ref(), &self.poll, check_mode);
        let observed = lifecycle.observe(identity).await?;
        lifecycle.ensure_absent(identity, observed).await
    }
}
