//! Result Reporter: the uniform contract handed back to the invocation host.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{Error, ErrorKind, Result};
use crate::model::ObservedResource;

/// What a successful reconciliation did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outcome {
    pub changed: bool,
    pub resource: Option<Value>,
    /// Kind-specific fields merged into the result.
    pub extra: Map<String, Value>,
}

impl Outcome {
    pub fn unchanged(resource: Option<ObservedResource>) -> Self {
        Self {
            changed: false,
            resource: resource.map(|r| r.document),
            extra: Map::new(),
        }
    }

    pub fn changed(resource: Option<ObservedResource>) -> Self {
        Self {
            changed: true,
            ..Self::unchanged(resource)
        }
    }

    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.extra.insert(key.to_string(), value);
        self
    }
}

/// `{changed, failed, resource, msg}` plus the error discriminant.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReconciliationResult {
    pub changed: bool,
    pub failed: bool,
    pub resource: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ReconciliationResult {
    pub fn failure(error: Error) -> Self {
        let kind = error.kind();
        let msg = error.to_string();
        let (changed, resource) = match error {
            Error::Partial { resource, .. } => (true, resource),
            _ => (false, None),
        };
        Self {
            changed,
            failed: true,
            resource,
            msg: Some(msg),
            error_kind: Some(kind),
            extra: Map::new(),
        }
    }
}

impl From<Outcome> for ReconciliationResult {
    fn from(outcome: Outcome) -> Self {
        Self {
            changed: outcome.changed,
            failed: false,
            resource: outcome.resource,
            msg: None,
            error_kind: None,
            extra: outcome.extra,
        }
    }
}

impl From<Result<Outcome>> for ReconciliationResult {
    fn from(result: Result<Outcome>) -> Self {
        match result {
            Ok(outcome) => outcome.into(),
            Err(error) => Self::failure(error),
        }
    }
}
