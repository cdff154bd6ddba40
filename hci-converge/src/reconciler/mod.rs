//! Reconcilers for the different resource kinds.
//!
//! Each reconciler builds the desired spec from its parameters, observes the
//! resource once, and drives it toward the desired state through the shared
//! [`Lifecycle`] steps.

pub mod image;
pub mod info;
mod lifecycle;
pub mod network;
pub mod vm;
pub mod volume;

pub use image::ImageReconciler;
pub use info::VmInfoQuery;
pub use lifecycle::{Converged, Lifecycle};
pub use network::NetworkReconciler;
pub use vm::VmReconciler;
pub use volume::VolumeReconciler;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::ResourceIdentity;
use crate::report::Outcome;

/// Trait for resource reconcilers.
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// The inbound parameter set for this kind.
    type Params: Sync;

    /// Converge the resource toward `params`.
    async fn reconcile(&self, params: &Self::Params) -> Result<Outcome>;

    /// Remove the resource and wait until it is gone.
    async fn finalize(&self, identity: &ResourceIdentity, check_mode: bool) -> Result<Outcome>;
}
