//! Error taxonomy for reconciliation.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Discriminant reported to the invocation host alongside the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidSpec,
    ReferenceNotFound,
    ApiError,
    Conflict,
    Timeout,
    ProvisioningFailed,
    Unauthorized,
    Transport,
}

/// Errors that can occur while reconciling a resource.
#[derive(Debug, Error)]
pub enum Error {
    /// Desired input failed local validation; never reaches the API.
    #[error("invalid spec: {0}")]
    InvalidSpec(String),

    /// A symbolic reference could not be resolved.
    #[error("reference not found: {0}")]
    ReferenceNotFound(String),

    /// Non-2xx, non-404 response from the control plane.
    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    /// Version token mismatch on update.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A poll loop exhausted its attempt or time budget.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The control plane reported a failed asynchronous operation.
    #[error("provisioning failed: {0}")]
    ProvisioningFailed(String),

    /// Credentials were rejected (401/403).
    #[error("authentication failed: {0}")]
    Unauthorized(String),

    /// Request never produced an HTTP response.
    #[error("transport error: {0}")]
    Transport(String),

    /// A failure that happened after the resource was already mutated.
    /// The resource is left in place; the caller may re-invoke.
    #[error("{source}")]
    Partial {
        source: Box<Error>,
        resource: Option<Value>,
    },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidSpec(_) => ErrorKind::InvalidSpec,
            Error::ReferenceNotFound(_) => ErrorKind::ReferenceNotFound,
            Error::Api { .. } => ErrorKind::ApiError,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::ProvisioningFailed(_) => ErrorKind::ProvisioningFailed,
            Error::Unauthorized(_) => ErrorKind::Unauthorized,
            Error::Transport(_) => ErrorKind::Transport,
            Error::Partial { source, .. } => source.kind(),
        }
    }

    /// Mark this error as having occurred after a successful mutation.
    pub fn after_mutation(self, resource: Option<Value>) -> Self {
        match self {
            Error::Partial { .. } => self,
            other => Error::Partial {
                source: Box::new(other),
                resource,
            },
        }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidSpec(msg.into())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Transport(e.to_string())
    }
}

/// Result type for reconciliation operations.
pub type Result<T> = std::result::Result<T, Error>;
