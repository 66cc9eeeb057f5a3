//! Rotation planning
//!
//! Certificate names are derived from the certificate itself, so "is this
//! certificate already installed" reduces to a set membership check against
//! the load balancer snapshot. No separate tracking store is needed.

use tracing::{debug, info};

use lbcert_common::{CertificateName, LoadBalancerSnapshot};

use crate::inspect::ResolvedCertificate;

/// What a rotation run has to do
#[derive(Debug, Clone, PartialEq)]
pub enum RotationPlan {
    /// The certificate is already installed; nothing to do
    Skip { name: CertificateName },
    /// Install the certificate and repoint TLS listeners at it
    Install(Installation),
}

/// Material for a certificate that is not installed yet
#[derive(Clone, PartialEq)]
pub struct Installation {
    pub name: CertificateName,
    pub public_chain_pem: String,
    pub private_key_pem: String,
}

impl std::fmt::Debug for Installation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Installation")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl RotationPlan {
    pub fn name(&self) -> &CertificateName {
        match self {
            RotationPlan::Skip { name } => name,
            RotationPlan::Install(installation) => &installation.name,
        }
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, RotationPlan::Skip { .. })
    }
}

/// Decide whether `certificate` has to be installed
pub fn plan(snapshot: &LoadBalancerSnapshot, certificate: &ResolvedCertificate) -> RotationPlan {
    let name = certificate.name();

    if snapshot.has_certificate(&name) {
        info!(name = %name, "Certificate already installed, nothing to do");
        return RotationPlan::Skip { name };
    }

    debug!(
        name = %name,
        installed = snapshot.certificates.len(),
        tls_listeners = snapshot.tls_listeners().count(),
        "Certificate not installed yet"
    );

    RotationPlan::Install(Installation {
        name,
        public_chain_pem: certificate.public_chain_pem.clone(),
        private_key_pem: certificate.private_key_pem.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn certificate() -> ResolvedCertificate {
        ResolvedCertificate {
            domain: "example.com".to_string(),
            not_after: Utc.with_ymd_and_hms(2030, 1, 15, 8, 30, 0).unwrap(),
            public_chain_pem: "chain".to_string(),
            private_key_pem: "key".to_string(),
        }
    }

    #[test]
    fn test_skip_when_installed() {
        let snapshot = LoadBalancerSnapshot {
            certificates: [
                CertificateName::new("cert_example.com_20291015"),
                CertificateName::new("cert_example.com_20300115"),
            ]
            .into_iter()
            .collect(),
            listeners: Vec::new(),
        };

        let plan = plan(&snapshot, &certificate());
        assert!(plan.is_skip());
        assert_eq!(plan.name().as_str(), "cert_example.com_20300115");
    }

    #[test]
    fn test_install_when_absent() {
        let snapshot = LoadBalancerSnapshot {
            certificates: [CertificateName::new("cert_example.com_20291015")]
                .into_iter()
                .collect(),
            listeners: Vec::new(),
        };

        match plan(&snapshot, &certificate()) {
            RotationPlan::Install(installation) => {
                assert_eq!(installation.name.as_str(), "cert_example.com_20300115");
                assert_eq!(installation.public_chain_pem, "chain");
                assert_eq!(installation.private_key_pem, "key");
                assert!(!format!("{:?}", installation).contains("private_key_pem"));
            }
            other => panic!("expected Install, got {:?}", other),
        }
    }
}
