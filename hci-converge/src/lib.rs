//! Declarative reconciliation of VMs, images, volumes and networks against
//! a Harvester HCI control plane.
//!
//! Each invocation builds a desired spec from a flat parameter set, observes
//! the resource once, computes the delta and applies it, polling wherever
//! the control plane converges asynchronously. The result reports whether
//! anything changed so repeated invocations stay idempotent.

pub mod client;
pub mod config;
pub mod diff;
pub mod error;
pub mod host;
pub mod model;
pub mod params;
pub mod poll;
pub mod quantity;
pub mod reconciler;
pub mod report;
pub mod resolver;
pub mod spec;

pub use client::{ControlPlane, HarvesterClient};
pub use config::{Auth, ClientConfig, PollConfig};
pub use error::{Error, ErrorKind, Result};
pub use params::ModuleParams;
pub use report::{Outcome, ReconciliationResult};
