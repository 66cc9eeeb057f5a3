//! REST collaborators built on `reqwest`.
//!
//! # Object store
//!
//! ```text
//! HEAD {endpoint}/n/{namespace}/b/{bucket}/o/{object}
//! GET  {endpoint}/n/{namespace}/b/{bucket}/o/{object}
//! ```
//!
//! # Control plane
//!
//! ```text
//! GET  {endpoint}/loadBalancers/{id}
//! POST {endpoint}/loadBalancers/{id}/certificates
//! PUT  {endpoint}/loadBalancers/{id}/listeners/{name}
//! GET  {endpoint}/loadBalancerWorkRequests/{work_request_id}
//! ```
//!
//! Mutating calls answer with the work request handle in the
//! `opc-work-request-id` header. Bodies are camelCase JSON.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, trace};
use url::Url;

use lbcert_common::{
    CertificateName, ListenerConfig, ListenerState, LoadBalancerSnapshot, WorkRequestId,
    WorkRequestState, WorkRequestStatus,
};

use super::{ControlPlane, ObjectStore};
use crate::error::RemoteError;

/// Response header carrying the handle of an asynchronous operation
pub const WORK_REQUEST_HEADER: &str = "opc-work-request-id";

// ============================================================================
// Shared Helpers
// ============================================================================

fn parse_endpoint(endpoint: &str) -> Result<Url, RemoteError> {
    Url::parse(endpoint)
        .map_err(|e| RemoteError::Request(format!("invalid endpoint '{}': {}", endpoint, e)))
}

/// Append percent-encoded path segments to `base`
fn endpoint_url(base: &Url, segments: &[&str]) -> Result<Url, RemoteError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| RemoteError::Request(format!("endpoint '{}' cannot carry a path", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn authorize(request: RequestBuilder, auth_token: &Option<String>) -> RequestBuilder {
    match auth_token {
        Some(token) => request.bearer_auth(token),
        None => request,
    }
}

/// Map 404 and other non-success statuses to errors
async fn check(response: Response) -> Result<Response, RemoteError> {
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Err(RemoteError::NotFound(response.url().to_string()));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(RemoteError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}

// ============================================================================
// Object Store
// ============================================================================

#[derive(Debug, Clone)]
pub struct HttpObjectStore {
    client: Client,
    base: Url,
    auth_token: Option<String>,
}

impl HttpObjectStore {
    pub fn new(endpoint: &str, auth_token: Option<String>) -> Result<Self, RemoteError> {
        Ok(Self {
            client: Client::new(),
            base: parse_endpoint(endpoint)?,
            auth_token,
        })
    }

    fn object_url(&self, namespace: &str, bucket: &str, object: &str) -> Result<Url, RemoteError> {
        endpoint_url(&self.base, &["n", namespace, "b", bucket, "o", object])
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn head(&self, namespace: &str, bucket: &str, object: &str) -> Result<bool, RemoteError> {
        let url = self.object_url(namespace, bucket, object)?;
        trace!(url = %url, "HEAD object");

        let response = authorize(self.client.head(url), &self.auth_token)
            .send()
            .await?;

        match check(response).await {
            Ok(_) => Ok(true),
            Err(RemoteError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn get(&self, namespace: &str, bucket: &str, object: &str) -> Result<Bytes, RemoteError> {
        let url = self.object_url(namespace, bucket, object)?;
        debug!(url = %url, "Downloading object");

        let response = authorize(self.client.get(url), &self.auth_token)
            .send()
            .await?;
        Ok(check(response).await?.bytes().await?)
    }
}

// ============================================================================
// Control Plane
// ============================================================================

#[derive(Debug, Deserialize)]
struct LoadBalancerBody {
    #[serde(default)]
    certificates: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    listeners: BTreeMap<String, ListenerConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateCertificateBody<'a> {
    certificate_name: &'a str,
    public_certificate: &'a str,
    private_key: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkRequestBody {
    lifecycle_state: WorkRequestState,
    #[serde(default)]
    time_accepted: Option<DateTime<Utc>>,
    #[serde(default)]
    time_finished: Option<DateTime<Utc>>,
    #[serde(default)]
    error_details: Vec<ErrorDetail>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorDetail {
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl WorkRequestBody {
    fn into_status(self) -> WorkRequestStatus {
        let details: Vec<String> = self
            .error_details
            .into_iter()
            .map(|d| match (d.error_code, d.message) {
                (Some(code), Some(message)) => format!("{}: {}", code, message),
                (Some(code), None) => code,
                (None, Some(message)) => message,
                (None, None) => "unknown error".to_string(),
            })
            .collect();

        let error_detail = if details.is_empty() {
            self.message
                .filter(|_| self.lifecycle_state == WorkRequestState::Failed)
        } else {
            Some(details.join("; "))
        };

        WorkRequestStatus {
            state: self.lifecycle_state,
            started_at: self.time_accepted,
            finished_at: self.time_finished,
            error_detail,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpControlPlane {
    client: Client,
    base: Url,
    auth_token: Option<String>,
}

impl HttpControlPlane {
    pub fn new(endpoint: &str, auth_token: Option<String>) -> Result<Self, RemoteError> {
        Ok(Self {
            client: Client::new(),
            base: parse_endpoint(endpoint)?,
            auth_token,
        })
    }

    fn work_request_id(response: &Response) -> Result<WorkRequestId, RemoteError> {
        response
            .headers()
            .get(WORK_REQUEST_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(WorkRequestId::new)
            .ok_or_else(|| {
                RemoteError::InvalidResponse(format!("missing {} header", WORK_REQUEST_HEADER))
            })
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn get_state(&self, load_balancer_id: &str) -> Result<LoadBalancerSnapshot, RemoteError> {
        let url = endpoint_url(&self.base, &["loadBalancers", load_balancer_id])?;
        trace!(url = %url, "Fetching load balancer");

        let response = authorize(self.client.get(url), &self.auth_token)
            .send()
            .await?;
        let body: LoadBalancerBody = check(response).await?.json().await?;

        let listeners = body
            .listeners
            .into_iter()
            .map(|(name, mut config)| {
                // The name is the map key and is not part of an update body
                config.other.remove("name");
                ListenerState::new(name, config)
            })
            .collect();

        Ok(LoadBalancerSnapshot {
            certificates: body
                .certificates
                .into_keys()
                .map(CertificateName::from)
                .collect(),
            listeners,
        })
    }

    async fn create_certificate(
        &self,
        load_balancer_id: &str,
        name: &CertificateName,
        public_chain_pem: &str,
        private_key_pem: &str,
    ) -> Result<WorkRequestId, RemoteError> {
        let url = endpoint_url(&self.base, &["loadBalancers", load_balancer_id, "certificates"])?;
        debug!(url = %url, name = %name, "Creating certificate");

        let body = CreateCertificateBody {
            certificate_name: name.as_str(),
            public_certificate: public_chain_pem,
            private_key: private_key_pem,
        };
        let response = authorize(self.client.post(url).json(&body), &self.auth_token)
            .send()
            .await?;
        Self::work_request_id(&check(response).await?)
    }

    async fn get_work_request(&self, id: &WorkRequestId) -> Result<WorkRequestStatus, RemoteError> {
        let url = endpoint_url(&self.base, &["loadBalancerWorkRequests", id.as_str()])?;
        trace!(url = %url, "Polling work request");

        let response = authorize(self.client.get(url), &self.auth_token)
            .send()
            .await?;
        let body: WorkRequestBody = check(response).await?.json().await?;
        Ok(body.into_status())
    }

    async fn update_listener(
        &self,
        load_balancer_id: &str,
        listener: &str,
        config: &ListenerConfig,
    ) -> Result<WorkRequestId, RemoteError> {
        let url = endpoint_url(
            &self.base,
            &["loadBalancers", load_balancer_id, "listeners", listener],
        )?;
        debug!(url = %url, listener = %listener, "Updating listener");

        let response = authorize(self.client.put(url).json(config), &self.auth_token)
            .send()
            .await?;
        Self::work_request_id(&check(response).await?)
    }
}
