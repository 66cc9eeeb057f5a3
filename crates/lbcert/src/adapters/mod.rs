//! Collaborator interfaces and their implementations
//!
//! The rotation pipeline talks to two remote systems through the traits
//! defined here:
//!
//! - [`ObjectStore`] - where the issuance tool publishes certificate bundles
//! - [`ControlPlane`] - the load balancer management API
//!
//! Implementations:
//!
//! - [`MemoryObjectStore`], [`MemoryControlPlane`] - in-process fakes that record calls
//! - [`FsObjectStore`] - bundles laid out on the local filesystem
//! - [`HttpObjectStore`], [`HttpControlPlane`] - REST clients built on `reqwest`

mod fs;
mod http;
mod memory;

pub use fs::FsObjectStore;
pub use http::{HttpControlPlane, HttpObjectStore, WORK_REQUEST_HEADER};
pub use memory::{ControlPlaneCall, MemoryControlPlane, MemoryObjectStore};

use async_trait::async_trait;
use bytes::Bytes;

use lbcert_common::{
    CertificateName, ListenerConfig, LoadBalancerSnapshot, WorkRequestId, WorkRequestStatus,
};

use crate::error::RemoteError;

/// Read access to the bucket holding certificate bundles.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Whether the object exists.
    ///
    /// Lets callers tell "not published yet" apart from transient failures.
    async fn head(&self, namespace: &str, bucket: &str, object: &str) -> Result<bool, RemoteError>;

    /// Download the whole object
    async fn get(&self, namespace: &str, bucket: &str, object: &str) -> Result<Bytes, RemoteError>;
}

/// Load balancer management API.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Fetch installed certificate names and listener configuration
    async fn get_state(&self, load_balancer_id: &str) -> Result<LoadBalancerSnapshot, RemoteError>;

    /// Upload a certificate; completes asynchronously
    async fn create_certificate(
        &self,
        load_balancer_id: &str,
        name: &CertificateName,
        public_chain_pem: &str,
        private_key_pem: &str,
    ) -> Result<WorkRequestId, RemoteError>;

    /// Poll an asynchronous operation
    async fn get_work_request(&self, id: &WorkRequestId) -> Result<WorkRequestStatus, RemoteError>;

    /// Replace a listener's configuration; completes asynchronously
    async fn update_listener(
        &self,
        load_balancer_id: &str,
        listener: &str,
        config: &ListenerConfig,
    ) -> Result<WorkRequestId, RemoteError>;
}
