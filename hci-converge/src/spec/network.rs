use serde_json::Value;

use super::{DesiredSpec, FieldPath, validate_identity};
use crate::error::{Error, Result};
use crate::params::NetworkParams;

/// The attachment's CNI config is stored as a JSON string and compared as a
/// document, so key order and whitespace never count as drift.
pub fn build(params: &NetworkParams) -> Result<DesiredSpec> {
    let identity = params.identity();
    validate_identity(&identity)?;

    let config = match &params.config {
        None => return Err(Error::invalid("config is required")),
        Some(Value::String(raw)) => serde_json::from_str::<Value>(raw)
            .map_err(|e| Error::invalid(format!("config is not valid JSON: {e}")))?,
        Some(other) => other.clone(),
    };
    if !config.is_object() {
        return Err(Error::invalid("config must be a JSON object"));
    }
    let rendered = serde_json::to_string(&config)
        .map_err(|e| Error::invalid(format!("config cannot be serialised: {e}")))?;

    let mut desired = DesiredSpec::new(identity);
    desired.set_labels(&["metadata", "labels"], &params.labels);
    desired.set(&["spec", "config"], Value::String(rendered));
    desired
        .policy
        .json_strings
        .insert(FieldPath::new(["spec", "config"]));
    Ok(desired)
}
