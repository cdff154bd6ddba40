//! Image reconciler - imports are asynchronous on the control plane.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};

use super::{Lifecycle, Reconciler};
use crate::client::ControlPlane;
use crate::config::PollConfig;
use crate::error::{Error, Result};
use crate::model::{Readiness, ResourceIdentity};
use crate::params::{ImageParams, Presence};
use crate::report::Outcome;
use crate::spec;

pub struct ImageReconciler {
    api: Arc<dyn ControlPlane>,
    poll: PollConfig,
}

impl ImageReconciler {
    pub fn new(api: Arc<dyn ControlPlane>, poll: PollConfig) -> Self {
        Self { api, poll }
    }
}

#[async_trait]
impl Reconciler for ImageReconciler {
    type Params = ImageParams;

    async fn reconcile(&self, params: &Self::Params) -> Result<Outcome> {
        let identity = params.identity();
        if params.state == Presence::Absent {
            spec::validate_identity(&identity)?;
            return self.finalize(&identity, params.check_mode).await;
        }

        let desired = spec::image::build(params)?;
        info!("Reconciling image {}/{}", identity.namespace, identity.name);

        let lifecycle = Lifecycle::new(self.api.as_ref(), &self.poll, params.check_mode);
        let observed = lifecycle.observe(&identity).await?;

        // A failed import stays failed; reporting it as converged would hide it.
        if let Some(Readiness::Failed(message)) = observed.as_ref().map(|o| o.readiness()) {
            error!("Image {}/{} failed to import: {}", identity.namespace, identity.name, message);
            return Err(Error::ProvisioningFailed(message));
        }

        let converged = lifecycle.ensure_present(desired, observed).await?;
        Ok(Outcome {
            changed: converged.changed,
            ..Outcome::unchanged(converged.resource)
        })
    }

    async fn finalize(&self, identity: &ResourceIdentity, check_mode: bool) -> Result<Outcome> {
        info!("Finalizing (deleting) image {}/{}", identity.namespace, identity.name);
        let lifecycle = Lifecycle::new(self.api.as_ref(), &self.poll, check_mode);
        let observed = lifecycle.observe(identity).await?;
        lifecycle.ensure_absent(identity, observed).await
    }
}
