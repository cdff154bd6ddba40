use serde_json::{Value, json};

use super::{
    DesiredSpec, FieldPath, IMAGE_ID_ANNOTATION, ImageReference, ReferenceTarget, ResolvedImage,
    validate_identity, validate_name,
};
use crate::error::{Error, Result};
use crate::params::{AccessMode, VolumeMode, VolumeParams};
use crate::quantity::Quantity;

const DEFAULT_STORAGE: &str = "10Gi";

pub fn build(params: &VolumeParams) -> Result<DesiredSpec> {
    let identity = params.identity();
    validate_identity(&identity)?;

    if let Some(storage) = &params.storage {
        let size: Quantity = storage
            .parse()
            .map_err(|e| Error::invalid(format!("storage: {e}")))?;
        if !size.is_positive() {
            return Err(Error::invalid("storage must be greater than 0"));
        }
    }
    if params.access_modes.as_ref().is_some_and(Vec::is_empty) {
        return Err(Error::invalid("access_modes cannot be empty"));
    }
    if let Some(volume_name) = &params.volume_name {
        validate_name("volume_name", volume_name)?;
    }
    if params.image.is_some() && params.volume_name.is_some() {
        return Err(Error::invalid("image and volume_name are mutually exclusive"));
    }

    // Image-backed claims are block devices shared across nodes.
    let from_image = params.image.is_some();
    let (default_modes, default_mode) = if from_image {
        (vec![AccessMode::ReadWriteMany], VolumeMode::Block)
    } else {
        (vec![AccessMode::ReadWriteOnce], VolumeMode::Filesystem)
    };

    let mut desired = DesiredSpec::new(identity);
    desired.set_labels(&["metadata", "labels"], &params.labels);

    desired.set_or_default(
        &["spec", "resources", "requests", "storage"],
        params.storage.clone().map(Value::String),
        json!(DEFAULT_STORAGE),
    );
    desired.mark_quantity(&["spec", "resources", "requests", "storage"]);

    desired.set_or_default(
        &["spec", "accessModes"],
        params.access_modes.as_deref().map(access_modes),
        access_modes(&default_modes),
    );
    desired
        .policy
        .unordered
        .insert(FieldPath::new(["spec", "accessModes"]));

    desired.set_or_default(
        &["spec", "volumeMode"],
        params.volume_mode.map(|m| json!(m.as_str())),
        json!(default_mode.as_str()),
    );
    if let Some(class) = &params.storage_class {
        desired.set(&["spec", "storageClassName"], Value::String(class.clone()));
    }
    if let Some(volume_name) = &params.volume_name {
        desired.set(&["spec", "volumeName"], Value::String(volume_name.clone()));
    }
    if let Some(image) = &params.image {
        desired.references.push(ImageReference {
            image: image.clone(),
            target: ReferenceTarget::Volume,
        });
    }
    Ok(desired)
}

fn access_modes(modes: &[AccessMode]) -> Value {
    Value::Array(modes.iter().map(|m| json!(m.as_str())).collect())
}

/// Point the claim at its source image. An explicit storage class wins.
pub(super) fn bind_image(desired: &mut DesiredSpec, image: &ResolvedImage) {
    desired.set_create_only(
        &["metadata", "annotations", IMAGE_ID_ANNOTATION],
        Value::String(image.id()),
    );
    let class = FieldPath::new(["spec", "storageClassName"]);
    if class.get(&desired.document).is_none() {
        desired.set_create_only(
            &["spec", "storageClassName"],
            Value::String(image.storage_class()),
        );
    }
}
