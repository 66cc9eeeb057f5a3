//! Load balancer data model shared by the planner, reconciler and adapters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use tracing::trace;

use crate::ids::CertificateName;

// ============================================================================
// Load Balancer State
// ============================================================================

/// Read-only view of a load balancer, fetched once per run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadBalancerSnapshot {
    /// Names of every certificate resource installed on the load balancer
    #[serde(default)]
    pub certificates: BTreeSet<CertificateName>,
    /// Listeners in a stable order
    #[serde(default)]
    pub listeners: Vec<ListenerState>,
}

impl LoadBalancerSnapshot {
    /// Check whether a certificate with this name is already installed
    pub fn has_certificate(&self, name: &CertificateName) -> bool {
        self.certificates.contains(name)
    }

    /// Listeners that terminate TLS and therefore reference a certificate
    pub fn tls_listeners(&self) -> impl Iterator<Item = &ListenerState> {
        self.listeners.iter().filter(|l| l.has_tls())
    }
}

/// A single listener and its full current configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListenerState {
    pub name: String,
    pub config: ListenerConfig,
}

impl ListenerState {
    pub fn new(name: impl Into<String>, config: ListenerConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    /// Whether this listener terminates TLS
    pub fn has_tls(&self) -> bool {
        self.config.ssl_configuration.is_some()
    }

    /// Certificate currently referenced, if any
    pub fn current_certificate_name(&self) -> Option<&str> {
        self.config
            .ssl_configuration
            .as_ref()
            .and_then(|ssl| ssl.certificate_name.as_deref())
    }

    /// Build the update for this listener that points it at `certificate`.
    ///
    /// The current configuration is the base; only the certificate reference
    /// changes. Returns `None` for listeners without TLS.
    pub fn with_certificate(&self, certificate: &CertificateName) -> Option<ListenerConfig> {
        let mut config = self.config.clone();
        let ssl = config.ssl_configuration.as_mut()?;

        trace!(
            listener = %self.name,
            from = ?ssl.certificate_name,
            to = %certificate,
            "Rewriting listener certificate reference"
        );

        ssl.certificate_name = Some(certificate.as_str().to_string());
        Some(config)
    }
}

/// Listener configuration as understood by the control plane.
///
/// Only the TLS block is modelled; every other field is carried through
/// verbatim so a read-modify-write never drops settings lbcert does not know.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_configuration: Option<SslConfiguration>,

    #[serde(flatten)]
    pub other: Map<String, Value>,
}

/// TLS settings of a listener.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SslConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_name: Option<String>,

    #[serde(flatten)]
    pub other: Map<String, Value>,
}

// ============================================================================
// Work Requests
// ============================================================================

/// Lifecycle state of an asynchronous control plane operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkRequestState {
    Accepted,
    InProgress,
    Succeeded,
    Failed,
}

impl WorkRequestState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkRequestState::Succeeded | WorkRequestState::Failed)
    }
}

/// Result of polling a work request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkRequestStatus {
    pub state: WorkRequestState,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error_detail: Option<String>,
}

impl WorkRequestStatus {
    pub fn new(state: WorkRequestState) -> Self {
        Self {
            state,
            started_at: None,
            finished_at: None,
            error_detail: None,
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            error_detail: Some(detail.into()),
            ..Self::new(WorkRequestState::Failed)
        }
    }
}
