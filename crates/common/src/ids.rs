//! Type-safe identifier newtypes for lbcert.
//!
//! These types keep certificate names and work request handles from being
//! mixed up with the many other strings flowing through a rotation run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix shared by every certificate name lbcert installs.
pub const CERTIFICATE_NAME_PREFIX: &str = "cert_";

/// Name of a certificate resource on the load balancer.
///
/// Names lbcert creates are derived from the certificate itself (domain and
/// expiry date), so resolving the same archive snapshot twice always yields
/// the same name. That makes "is this certificate installed" a plain set
/// membership check against the load balancer state.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CertificateName(String);

impl CertificateName {
    /// Derive the deterministic name for a certificate of `domain` expiring at `not_after`.
    ///
    /// Format: `cert_{domain}_{YYYYMMDD}` using the UTC calendar date of expiry.
    pub fn derive(domain: &str, not_after: DateTime<Utc>) -> Self {
        Self(format!(
            "{}{}_{}",
            CERTIFICATE_NAME_PREFIX,
            domain,
            not_after.format("%Y%m%d")
        ))
    }

    /// Wrap a name reported by the load balancer
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CertificateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for CertificateName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CertificateName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Opaque handle of an asynchronous operation on the control plane.
///
/// Every mutating call returns one; it is polled until the remote side
/// reports a terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkRequestId(String);

impl WorkRequestId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkRequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
