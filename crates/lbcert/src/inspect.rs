//! Certificate inspection
//!
//! Extracts the expiry of the leaf certificate in a PEM chain and checks that
//! private key material is well formed.

use chrono::{DateTime, Utc};
use tracing::debug;

use lbcert_common::CertificateName;

use crate::archive::LivePair;
use crate::error::{RotationError, RotationResult};

const CERTIFICATE_TAG: &str = "CERTIFICATE";
const PRIVATE_KEY_TAG_SUFFIX: &str = "PRIVATE KEY";

/// Not-after time of the first certificate in `pem_text`.
///
/// The time is returned verbatim, without clamping or timezone adjustment.
pub fn expiry_of(pem_text: &str) -> RotationResult<DateTime<Utc>> {
    let block =
        pem::parse(pem_text).map_err(|e| RotationError::invalid_pem("certificate chain", e))?;

    if block.tag() != CERTIFICATE_TAG {
        return Err(RotationError::invalid_pem(
            "certificate chain",
            format!("expected a {} block, found {}", CERTIFICATE_TAG, block.tag()),
        ));
    }

    let (_, cert) = x509_parser::parse_x509_certificate(block.contents())
        .map_err(|e| RotationError::invalid_pem("certificate chain", e))?;

    let not_after = &cert.validity().not_after;
    DateTime::from_timestamp(not_after.timestamp(), 0).ok_or_else(|| {
        RotationError::invalid_pem(
            "certificate chain",
            format!("not-after {} is out of range", not_after),
        )
    })
}

/// Check that `pem_text` holds a private key block
pub fn validate_private_key(pem_text: &str) -> RotationResult<()> {
    let block = pem::parse(pem_text).map_err(|e| RotationError::invalid_pem("private key", e))?;

    if !block.tag().ends_with(PRIVATE_KEY_TAG_SUFFIX) {
        return Err(RotationError::invalid_pem(
            "private key",
            format!("expected a private key block, found {}", block.tag()),
        ));
    }

    if block.contents().is_empty() {
        return Err(RotationError::invalid_pem("private key", "empty key block"));
    }

    Ok(())
}

/// Live certificate of a domain with its expiry.
///
/// `not_after` is always derived from `public_chain_pem`.
#[derive(Clone, PartialEq)]
pub struct ResolvedCertificate {
    pub domain: String,
    pub not_after: DateTime<Utc>,
    pub public_chain_pem: String,
    pub private_key_pem: String,
}

impl ResolvedCertificate {
    /// Inspect a resolved live pair
    pub fn from_pair(domain: &str, pair: LivePair) -> RotationResult<Self> {
        let not_after = expiry_of(&pair.fullchain)?;
        validate_private_key(&pair.privkey)?;

        debug!(domain = %domain, not_after = %not_after, "Inspected live certificate");

        Ok(Self {
            domain: domain.to_string(),
            not_after,
            public_chain_pem: pair.fullchain,
            private_key_pem: pair.privkey,
        })
    }

    /// Deterministic name of this certificate on the load balancer
    pub fn name(&self) -> CertificateName {
        CertificateName::derive(&self.domain, self.not_after)
    }
}

impl std::fmt::Debug for ResolvedCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedCertificate")
            .field("domain", &self.domain)
            .field("not_after", &self.not_after)
            .field("private_key_pem", &"<redacted>")
            .finish_non_exhaustive()
    }
}
