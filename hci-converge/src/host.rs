//! Invocation host: turns one parameter set into one result.

use std::sync::Arc;

use tracing::{error, info};

use crate::client::{ControlPlane, HarvesterClient};
use crate::config::{ClientConfig, PollConfig};
use crate::error::Result;
use crate::params::ModuleParams;
use crate::reconciler::{
    ImageReconciler, NetworkReconciler, Reconciler, VmInfoQuery, VmReconciler, VolumeReconciler,
};
use crate::report::{Outcome, ReconciliationResult};

/// Run one invocation against the control plane named in `params`.
pub async fn execute(params: ModuleParams) -> ReconciliationResult {
    let result = match connect(&params) {
        Ok((api, poll)) => dispatch(api, poll, &params).await,
        Err(e) => Err(e),
    };
    if let Err(e) = &result {
        error!(kind = ?e.kind(), "Reconciliation failed: {}", e);
    }
    result.into()
}

fn connect(params: &ModuleParams) -> Result<(Arc<dyn ControlPlane>, PollConfig)> {
    let config = ClientConfig::from_params(params.connection())?;
    info!(host = %config.host, verify_ssl = config.verify_ssl, "Connecting to control plane");
    let poll = config.poll;
    let client = HarvesterClient::new(config)?;
    Ok((Arc::new(client), poll))
}

/// Route `params` to the reconciler for its kind.
pub async fn dispatch(
    api: Arc<dyn ControlPlane>,
    poll: PollConfig,
    params: &ModuleParams,
) -> Result<Outcome> {
    match params {
        ModuleParams::Vm(p) => VmReconciler::new(api, poll).reconcile(p).await,
        ModuleParams::Image(p) => ImageReconciler::new(api, poll).reconcile(p).await,
        ModuleParams::Volume(p) => VolumeReconciler::new(api, poll).reconcile(p).await,
        ModuleParams::Network(p) => NetworkReconciler::new(api, poll).reconcile(p).await,
        ModuleParams::VmInfo(p) => VmInfoQuery::new(api).query(p).await,
    }
}
