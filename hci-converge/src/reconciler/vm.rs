//! VM reconciler - structural convergence plus power transitions.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use super::{Lifecycle, Reconciler};
use crate::client::ControlPlane;
use crate::config::PollConfig;
use crate::error::{Error, Result};
use crate::model::{ObservedResource, PowerAction, ResourceIdentity, VmPhase};
use crate::params::{VmParams, VmState};
use crate::poll::{Probe, wait_for};
use crate::report::Outcome;
use crate::spec::{self, PowerTarget};

/// VM reconciler backed by the control plane.
pub struct VmReconciler {
    api: Arc<dyn ControlPlane>,
    poll: PollConfig,
}

impl VmReconciler {
    pub fn new(api: Arc<dyn ControlPlane>, poll: PollConfig) -> Self {
        Self { api, poll }
    }

    fn lifecycle(&self, check_mode: bool) -> Lifecycle<'_> {
        Lifecycle::new(self.api.as_ref(), &self.poll, check_mode)
    }

    /// Issue `action` and block until the VM reaches the matching phase.
    /// A restart is a stop-wait followed by a start-wait.
    async fn transition(
        &self,
        identity: &ResourceIdentity,
        action: PowerAction,
        current: &ObservedResource,
    ) -> Result<ObservedResource> {
        let snapshot = Some(current.document.clone());
        match action {
            PowerAction::Start => {
                self.power(identity, PowerAction::Start, VmPhase::Running, snapshot)
                    .await
            }
            PowerAction::Stop => {
                self.power(identity, PowerAction::Stop, VmPhase::Stopped, snapshot)
                    .await
            }
            PowerAction::Restart => {
                let needs_stop = current.vm_phase() != VmPhase::Stopped;
                if needs_stop {
                    self.power(identity, PowerAction::Stop, VmPhase::Stopped, snapshot.clone())
                        .await?;
                }
                self.power(identity, PowerAction::Start, VmPhase::Running, snapshot.clone())
                    .await
                    .map_err(|e| if needs_stop { e.after_mutation(snapshot) } else { e })
            }
        }
    }

    async fn power(
        &self,
        identity: &ResourceIdentity,
        action: PowerAction,
        target: VmPhase,
        snapshot: Option<Value>,
    ) -> Result<ObservedResource> {
        info!("{} VM {}/{}", action_verb(action), identity.namespace, identity.name);
        self.api.power_action(identity, action).await?;
        wait_for_phase(self.api.as_ref(), &self.poll, identity, target)
            .await
            .map_err(|e| e.after_mutation(snapshot))
    }
}

fn action_verb(action: PowerAction) -> &'static str {
    match action {
        PowerAction::Start => "Starting",
        PowerAction::Stop => "Stopping",
        PowerAction::Restart => "Restarting",
    }
}

/// Poll until the VM reports `target`. An error phase or a VM that
/// disappears ends the wait as a provisioning failure.
async fn wait_for_phase(
    api: &dyn ControlPlane,
    poll: &PollConfig,
    identity: &ResourceIdentity,
    target: VmPhase,
) -> Result<ObservedResource> {
    let what = format!("VM {}/{} reaching {target}", identity.namespace, identity.name);
    let target = &target;
    wait_for(poll, &what, || async move {
        let Some(current) = api.get(identity).await? else {
            return Err(Error::ProvisioningFailed(format!(
                "VM {}/{} disappeared while waiting for {target}",
                identity.namespace, identity.name
            )));
        };
        match current.vm_phase() {
            phase if &phase == target => Ok(Probe::Done(current)),
            VmPhase::Error(status) => Err(Error::ProvisioningFailed(format!(
                "VM {}/{} entered {status}",
                identity.namespace, identity.name
            ))),
            phase => Ok(Probe::Pending(phase.to_string())),
        }
    })
    .await
}

#[async_trait]
impl Reconciler for VmReconciler {
    type Params = VmParams;

    async fn reconcile(&self, params: &Self::Params) -> Result<Outcome> {
        let identity = params.identity();
        if params.state == VmState::Absent {
            spec::validate_identity(&identity)?;
            return self.finalize(&identity, params.check_mode).await;
        }

        let desired = spec::vm::build(params)?;
        info!("Reconciling VM {}/{} ({:?})", identity.namespace, identity.name, params.state);

        let power = desired.power;
        let lifecycle = self.lifecycle(params.check_mode);
        let observed = lifecycle.observe(&identity).await?;
        let converged = lifecycle.ensure_present(desired, observed).await?;

        // A freshly created VM already carries the requested running flag.
        // Settling only means it left the transitional phases, so wait for
        // the phase the state asks for.
        if converged.created {
            let target = power.map(|p| match p {
                PowerTarget::Running | PowerTarget::Restarted => VmPhase::Running,
                PowerTarget::Stopped => VmPhase::Stopped,
            });
            let (target, created) = match (target, converged.resource) {
                (Some(target), Some(created)) if created.vm_phase() != target => (target, created),
                (_, resource) => return Ok(Outcome::changed(resource)),
            };
            let settled = wait_for_phase(self.api.as_ref(), &self.poll, &identity, target)
                .await
                .map_err(|e| e.after_mutation(Some(created.document)))?;
            return Ok(Outcome::changed(Some(settled)));
        }

        let Some(action) = converged.delta.requires_power_action else {
            return Ok(Outcome {
                changed: converged.changed,
                ..Outcome::unchanged(converged.resource)
            });
        };
        let Some(current) = converged.resource.as_ref() else {
            return Ok(Outcome::changed(None));
        };

        if params.check_mode {
            info!("Would {} VM {}/{}", action.as_str(), identity.namespace, identity.name);
            return Ok(Outcome::changed(converged.resource));
        }
        if current.vm_phase().is_transitional() && action != PowerAction::Restart {
            warn!(
                phase = %current.vm_phase(),
                "VM {}/{} is mid-transition, issuing {} anyway",
                identity.namespace,
                identity.name,
                action.as_str()
            );
        }

        let settled = self
            .transition(&identity, action, current)
            .await
            .map_err(|e| {
                if converged.changed {
                    e.after_mutation(Some(current.document.clone()))
                } else {
                    e
                }
            })?;
        Ok(Outcome::changed(Some(settled)))
    }

    async fn finalize(&self, identity: &ResourceIdentity, check_mode: bool) -> Result<Outcome> {
        info!("Finalizing (deleting) VM {}/{}", identity.namespace, identity.name);
        let lifecycle = self.lifecycle(check_mode);
        let observed = lifecycle.observe(identity).await?;
        lifecycle.ensure_absent(identity, observed).await
    }
}
