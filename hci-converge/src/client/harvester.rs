//! HTTP client for the Harvester / KubeVirt REST API.

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode, header};
use serde_json::Value;
use tracing::debug;

use super::{ControlPlane, pin_version};
use crate::config::{Auth, ClientConfig};
use crate::error::{Error, Result};
use crate::model::{ObservedResource, PowerAction, ResourceIdentity, ResourceKind};

const MERGE_PATCH: &str = "application/merge-patch+json";

/// Authenticated client bound to one control plane.
pub struct HarvesterClient {
    http: reqwest::Client,
    config: ClientConfig,
}

impl HarvesterClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(!config.verify_ssl)
            .build()?;
        Ok(Self { http, config })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        debug!(%method, path, "Control plane request");
        let builder = self
            .http
            .request(method, format!("{}{}", self.config.host, path))
            .header(header::ACCEPT, "application/json");
        match &self.config.auth {
            Auth::Bearer(token) => builder.bearer_auth(token),
            Auth::Basic { username, password } => builder.basic_auth(username, Some(password)),
        }
    }

    /// Send a request and decode the JSON body. `None` means not found.
    async fn send(&self, builder: RequestBuilder) -> Result<Option<Value>> {
        let response = builder.send().await?;
        match check_status(response).await? {
            None => Ok(None),
            Some(response) => {
                let bytes = response.bytes().await?;
                if bytes.is_empty() {
                    return Ok(Some(Value::Null));
                }
                let body = serde_json::from_slice(&bytes).map_err(|e| Error::Api {
                    status: 200,
                    body: format!("undecodable response body: {e}"),
                })?;
                Ok(Some(body))
            }
        }
    }

    async fn send_expecting(&self, builder: RequestBuilder, what: &str) -> Result<Value> {
        self.send(builder).await?.ok_or_else(|| Error::Api {
            status: StatusCode::NOT_FOUND.as_u16(),
            body: format!("{what} not found"),
        })
    }
}

/// Map non-success statuses onto the error taxonomy. 404 becomes `None`.
async fn check_status(response: Response) -> Result<Option<Response>> {
    let status = response.status();
    if status.is_success() {
        return Ok(Some(response));
    }
    if status == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    let body = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Error::Unauthorized(format!("{status}: {body}"))
        }
        StatusCode::CONFLICT => Error::Conflict(body),
        _ => Error::Api {
            status: status.as_u16(),
            body,
        },
    })
}

#[async_trait]
impl ControlPlane for HarvesterClient {
    async fn get(&self, identity: &ResourceIdentity) -> Result<Option<ObservedResource>> {
        let body = self
            .send(self.request(Method::GET, &identity.item_path()))
            .await?;
        Ok(body.map(|doc| ObservedResource::new(identity.kind, doc)))
    }

    async fn list(&self, kind: ResourceKind, namespace: &str) -> Result<Vec<ObservedResource>> {
        let body = self
            .send(self.request(Method::GET, &kind.collection_path(namespace)))
            .await?;
        let items = body
            .as_ref()
            .and_then(|b| b.get("items"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(items
            .into_iter()
            .map(|doc| ObservedResource::new(kind, doc))
            .collect())
    }

    async fn create(
        &self,
        identity: &ResourceIdentity,
        document: &Value,
    ) -> Result<ObservedResource> {
        let path = identity.kind.collection_path(&identity.namespace);
        let body = self
            .send_expecting(self.request(Method::POST, &path).json(document), &path)
            .await?;
        Ok(ObservedResource::new(identity.kind, body))
    }

    async fn update(
        &self,
        identity: &ResourceIdentity,
        patch: &Value,
        version: &str,
    ) -> Result<ObservedResource> {
        let path = identity.item_path();
        let patch = pin_version(patch, version);
        let builder = self
            .request(Method::PATCH, &path)
            .header(header::CONTENT_TYPE, MERGE_PATCH)
            .body(patch.to_string());
        let body = self.send_expecting(builder, &path).await?;
        Ok(ObservedResource::new(identity.kind, body))
    }

    async fn delete(&self, identity: &ResourceIdentity) -> Result<()> {
        self.send(self.request(Method::DELETE, &identity.item_path()))
            .await
            .map(|_| ())
    }

    async fn power_action(&self, identity: &ResourceIdentity, action: PowerAction) -> Result<()> {
        let path = identity.subresource_path(action);
        self.send_expecting(self.request(Method::PUT, &path), &path)
            .await
            .map(|_| ())
    }

    async fn get_vm_instance(&self, identity: &ResourceIdentity) -> Result<Option<Value>> {
        self.send(self.request(Method::GET, &identity.instance_path()))
            .await
    }
}
