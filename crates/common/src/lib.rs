//! Shared types for lbcert.
//!
//! - [`ids`]: identifier newtypes (certificate names, work request handles)
//! - [`types`]: the load balancer data model seen by the rotation pipeline

pub mod ids;
pub mod types;

pub use ids::{CertificateName, WorkRequestId, CERTIFICATE_NAME_PREFIX};
pub use types::{
    ListenerConfig, ListenerState, LoadBalancerSnapshot, SslConfiguration, WorkRequestState,
    WorkRequestStatus,
};
