//! State-machine steps shared by every kind.

use tracing::{debug, info};

use crate::client::ControlPlane;
use crate::config::PollConfig;
use crate::diff::{Delta, diff, diff_for_removal};
use crate::error::{Error, Result};
use crate::model::{ObservedResource, Readiness, ResourceIdentity};
use crate::poll::{Probe, wait_for};
use crate::report::Outcome;
use crate::resolver;
use crate::spec::DesiredSpec;

/// Result of [`Lifecycle::ensure_present`].
#[derive(Debug)]
pub struct Converged {
    pub changed: bool,
    pub created: bool,
    /// Latest known state; `None` only for a create skipped in check mode.
    pub resource: Option<ObservedResource>,
    pub delta: Delta,
}

/// One invocation's view of the control plane.
pub struct Lifecycle<'a> {
    pub api: &'a dyn ControlPlane,
    pub poll: &'a PollConfig,
    pub check_mode: bool,
}

impl<'a> Lifecycle<'a> {
    pub fn new(api: &'a dyn ControlPlane, poll: &'a PollConfig, check_mode: bool) -> Self {
        Self {
            api,
            poll,
            check_mode,
        }
    }

    /// The single fresh read every reconciliation starts with.
    pub async fn observe(&self, identity: &ResourceIdentity) -> Result<Option<ObservedResource>> {
        debug!(
            kind = %identity.kind,
            namespace = %identity.namespace,
            name = %identity.name,
            "Observing"
        );
        self.api.get(identity).await
    }

    /// Create the resource or patch its drifted fields. Power actions are
    /// left to the caller.
    pub async fn ensure_present(
        &self,
        mut desired: DesiredSpec,
        observed: Option<ObservedResource>,
    ) -> Result<Converged> {
        let identity = desired.identity.clone();
        if observed.as_ref().is_some_and(ObservedResource::is_terminating) {
            return Err(Error::Conflict(format!(
                "{} {}/{} is being deleted",
                identity.kind, identity.namespace, identity.name
            )));
        }

        let delta = diff(&desired, observed.as_ref());

        if delta.requires_create {
            resolver::resolve(self.api, &mut desired).await?;
            if self.check_mode {
                info!("Would create {} {}/{}", identity.kind, identity.namespace, identity.name);
                return Ok(Converged {
                    changed: true,
                    created: true,
                    resource: None,
                    delta,
                });
            }

            info!("Creating {} {}/{}", identity.kind, identity.namespace, identity.name);
            let created = self.api.create(&identity, &desired.document).await?;
            let settled = self
                .wait_settled(&identity)
                .await
                .map_err(|e| e.after_mutation(Some(created.document.clone())))?;
            return Ok(Converged {
                changed: true,
                created: true,
                resource: Some(settled),
                delta,
            });
        }

        let Some(current) = observed else {
            return Err(Error::Conflict(format!(
                "{} {}/{} vanished during reconciliation",
                identity.kind, identity.namespace, identity.name
            )));
        };
        if delta.update_fields.is_empty() {
            return Ok(Converged {
                changed: false,
                created: false,
                resource: Some(current),
                delta,
            });
        }

        let fields: Vec<String> = delta.update_fields.keys().map(|p| p.to_string()).collect();
        let Some(version) = current.version_token().map(str::to_string) else {
            return Err(Error::Conflict(format!(
                "{} {}/{} carries no resourceVersion",
                identity.kind, identity.namespace, identity.name
            )));
        };
        if self.check_mode {
            info!(
                fields = ?fields,
                "Would update {} {}/{}",
                identity.kind,
                identity.namespace,
                identity.name
            );
            return Ok(Converged {
                changed: true,
                created: false,
                resource: Some(current),
                delta,
            });
        }

        info!(
            fields = ?fields,
            "Updating {} {}/{}",
            identity.kind,
            identity.namespace,
            identity.name
        );
        let patch = delta.merge_patch(&version);
        let updated = self.api.update(&identity, &patch, &version).await?;
        Ok(Converged {
            changed: true,
            created: false,
            resource: Some(updated),
            delta,
        })
    }

    /// Delete the resource if it exists and wait until it is gone.
    pub async fn ensure_absent(
        &self,
        identity: &ResourceIdentity,
        observed: Option<ObservedResource>,
    ) -> Result<Outcome> {
        let delta = diff_for_removal(observed.as_ref());
        if !delta.requires_delete {
            debug!("{} {}/{} already absent", identity.kind, identity.namespace, identity.name);
            return Ok(Outcome::unchanged(None));
        }
        if self.check_mode {
            info!("Would delete {} {}/{}", identity.kind, identity.namespace, identity.name);
            return Ok(Outcome::changed(None));
        }

        info!("Deleting {} {}/{}", identity.kind, identity.namespace, identity.name);
        self.api.delete(identity).await?;
        let what = format!(
            "deletion of {} {}/{}",
            identity.kind, identity.namespace, identity.name
        );
        wait_for(self.poll, &what, || async move {
            Ok(match self.api.get(identity).await? {
                None => Probe::Done(()),
                Some(_) => Probe::Pending("present".to_string()),
            })
        })
        .await
        .map_err(|e| e.after_mutation(observed.map(|o| o.document)))?;
        Ok(Outcome::changed(None))
    }

    /// Wait until a freshly created resource is no longer transitional.
    pub async fn wait_settled(&self, identity: &ResourceIdentity) -> Result<ObservedResource> {
        let what = format!("{} {}/{}", identity.kind, identity.namespace, identity.name);
        wait_for(self.poll, &what, || async move {
            let Some(current) = self.api.get(identity).await? else {
                return Ok(Probe::Pending("not yet visible".to_string()));
            };
            match current.readiness() {
                Readiness::Ready => Ok(Probe::Done(current)),
                Readiness::Pending(state) => Ok(Probe::Pending(state)),
                Readiness::Failed(message) => Err(Error::ProvisioningFailed(message)),
            }
        })
        .await
    }
}
