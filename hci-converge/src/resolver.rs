//! Annotation/Reference Resolver.
//!
//! Image references in a desired spec are symbolic until they are looked up
//! on the control plane and written back as concrete identifiers.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::client::ControlPlane;
use crate::error::{Error, Result};
use crate::model::ResourceKind;
use crate::spec::{DesiredSpec, ResolvedImage};

/// Resolve every image reference in `desired` and bind the results into
/// its document. Without references this makes no calls at all.
pub async fn resolve(api: &dyn ControlPlane, desired: &mut DesiredSpec) -> Result<()> {
    if desired.references.is_empty() {
        return Ok(());
    }

    let namespace = desired.identity.namespace.clone();
    let mut cache: BTreeMap<String, ResolvedImage> = BTreeMap::new();
    let mut resolved = Vec::with_capacity(desired.references.len());

    for reference in &desired.references {
        let image = match cache.get(&reference.image) {
            Some(image) => image.clone(),
            None => {
                let identity = api
                    .resolve_reference(ResourceKind::Image, &namespace, &reference.image)
                    .await?
                    .ok_or_else(|| {
                        Error::ReferenceNotFound(format!(
                            "image '{}' does not exist in namespace '{namespace}'",
                            reference.image
                        ))
                    })?;
                let image = ResolvedImage::from_identity(&identity);
                info!(
                    reference = %reference.image,
                    image = %image.id(),
                    "Resolved image reference"
                );
                cache.insert(reference.image.clone(), image.clone());
                image
            }
        };
        resolved.push((reference.clone(), image));
    }

    debug!(count = resolved.len(), "Binding resolved images");
    desired.bind_images(&resolved)
}
