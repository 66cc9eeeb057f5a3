//! Rotation pipeline
//!
//! [`Rotator`] wires the components together for one load balancer and one
//! domain:
//!
//! 1. Check the bundle exists and download it
//! 2. Resolve the domain's live certificate and key
//! 3. Derive the certificate name from its expiry
//! 4. Compare against the load balancer snapshot
//! 5. If missing, create the certificate and wait for it
//! 6. Repoint every TLS listener at it
//!
//! Certificate creation always completes before any listener is touched.

use bytes::Bytes;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use lbcert_common::{CertificateName, LoadBalancerSnapshot};
use lbcert_config::RotationConfig;

use crate::adapters::{ControlPlane, ObjectStore};
use crate::archive;
use crate::error::{RotationError, RotationResult};
use crate::inspect::ResolvedCertificate;
use crate::plan::{plan, Installation, RotationPlan};
use crate::reconcile::{summarize, ListenerReconciler};
use crate::waiter::{cancellable, CompletionWaiter};

/// What a successful run did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationReport {
    /// The certificate was already present; no changes were made
    AlreadyInstalled { name: CertificateName },
    /// The certificate was created and these listeners now reference it
    Installed {
        name: CertificateName,
        listeners: Vec<String>,
    },
}

impl RotationReport {
    pub fn name(&self) -> &CertificateName {
        match self {
            RotationReport::AlreadyInstalled { name } => name,
            RotationReport::Installed { name, .. } => name,
        }
    }
}

/// Runs the rotation pipeline against a pair of collaborators.
pub struct Rotator {
    config: RotationConfig,
    store: Arc<dyn ObjectStore>,
    control: Arc<dyn ControlPlane>,
    cancel: CancellationToken,
}

impl Rotator {
    pub fn new(
        config: RotationConfig,
        store: Arc<dyn ObjectStore>,
        control: Arc<dyn ControlPlane>,
    ) -> Self {
        Self {
            config,
            store,
            control,
            cancel: CancellationToken::new(),
        }
    }

    /// Abort in-flight requests and polls when `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn waiter(&self) -> CompletionWaiter {
        CompletionWaiter::new(self.config.poll_interval(), self.config.max_poll_attempts)
            .with_cancellation(self.cancel.clone())
    }

    /// Download the bundle, failing with `ArchiveNotFound` if it was never published
    pub async fn fetch_archive(&self) -> RotationResult<Bytes> {
        let namespace = &self.config.namespace;
        let bucket = &self.config.bucket;
        let object = self.config.archive_object_name();

        let exists = cancellable(&self.cancel, self.store.head(namespace, bucket, &object))
            .await?
            .map_err(|e| RotationError::remote("head archive", e))?;

        if !exists {
            return Err(RotationError::ArchiveNotFound {
                namespace: namespace.clone(),
                bucket: bucket.clone(),
                object,
            });
        }

        let bytes = cancellable(&self.cancel, self.store.get(namespace, bucket, &object))
            .await?
            .map_err(|e| RotationError::remote("download archive", e))?;

        info!(object = %object, size = bytes.len(), "Downloaded certificate archive");
        Ok(bytes)
    }

    /// Resolve and inspect the live certificate for the configured domain
    pub async fn resolve(&self) -> RotationResult<ResolvedCertificate> {
        let bytes = self.fetch_archive().await?;
        let pair = archive::resolve(&bytes, &self.config.domain)?;
        let certificate = ResolvedCertificate::from_pair(&self.config.domain, pair)?;

        info!(
            domain = %certificate.domain,
            not_after = %certificate.not_after,
            name = %certificate.name(),
            "Resolved live certificate"
        );
        Ok(certificate)
    }

    /// Work out what a run would do without changing anything
    pub async fn plan(&self) -> RotationResult<(LoadBalancerSnapshot, RotationPlan)> {
        let certificate = self.resolve().await?;

        let snapshot = cancellable(
            &self.cancel,
            self.control.get_state(&self.config.load_balancer_id),
        )
        .await?
        .map_err(|e| RotationError::remote("get load balancer", e))?;

        debug!(
            certificates = snapshot.certificates.len(),
            listeners = snapshot.listeners.len(),
            "Fetched load balancer state"
        );

        let plan = plan(&snapshot, &certificate);
        Ok((snapshot, plan))
    }

    /// Run the full pipeline, bounded by the configured deadline
    pub async fn run(&self) -> RotationResult<RotationReport> {
        self.config.validate()?;

        match self.config.deadline() {
            Some(deadline) => tokio::time::timeout(deadline, self.execute())
                .await
                .map_err(|_| {
                    warn!(deadline_secs = deadline.as_secs(), "Rotation deadline reached");
                    RotationError::DeadlineExceeded(deadline)
                })?,
            None => self.execute().await,
        }
    }

    async fn execute(&self) -> RotationResult<RotationReport> {
        info!(
            load_balancer = %self.config.load_balancer_id,
            domain = %self.config.domain,
            poll_budget = %self.waiter().budget(),
            "Starting certificate rotation"
        );

        let (snapshot, plan) = self.plan().await?;

        match plan {
            RotationPlan::Skip { name } => Ok(RotationReport::AlreadyInstalled { name }),
            RotationPlan::Install(installation) => self.install(&snapshot, installation).await,
        }
    }

    async fn install(
        &self,
        snapshot: &LoadBalancerSnapshot,
        installation: Installation,
    ) -> RotationResult<RotationReport> {
        let Installation {
            name,
            public_chain_pem,
            private_key_pem,
        } = installation;
        let waiter = self.waiter();

        let work_request = cancellable(
            &self.cancel,
            self.control.create_certificate(
                &self.config.load_balancer_id,
                &name,
                &public_chain_pem,
                &private_key_pem,
            ),
        )
        .await?
        .map_err(|e| RotationError::remote("create certificate", e))?;

        info!(name = %name, work_request = %work_request, "Certificate creation requested");
        waiter
            .wait_for_success(self.control.as_ref(), &work_request)
            .await?;
        info!(name = %name, "Certificate created");

        let reconciler = ListenerReconciler::new(
            self.control.clone(),
            self.config.load_balancer_id.clone(),
            waiter,
        )
        .with_cancellation(self.cancel.clone());

        let outcomes = reconciler.reconcile(snapshot, &name).await?;
        let listeners = summarize(outcomes)?;

        info!(
            name = %name,
            listeners = listeners.len(),
            "Certificate rotation complete"
        );
        Ok(RotationReport::Installed { name, listeners })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{MemoryControlPlane, MemoryObjectStore};

    fn config() -> RotationConfig {
        RotationConfig::new("lb", "ns", "certs", "letsencrypt", "example.com")
    }

    #[tokio::test]
    async fn test_missing_archive_makes_no_control_plane_calls() {
        let control = Arc::new(MemoryControlPlane::new("lb", LoadBalancerSnapshot::default()));
        let rotator = Rotator::new(config(), Arc::new(MemoryObjectStore::new()), control.clone());

        let err = rotator.run().await.unwrap_err();

        assert!(err.is_archive_not_found());
        assert!(err.to_string().contains("letsencrypt-example.com.tar.gz"));
        assert!(control.calls().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected_before_any_call() {
        let mut config = config();
        config.max_poll_attempts = 0;

        let store = Arc::new(MemoryObjectStore::new());
        let control = Arc::new(MemoryControlPlane::new("lb", LoadBalancerSnapshot::default()));
        let rotator = Rotator::new(config, store.clone(), control.clone());

        assert!(matches!(rotator.run().await, Err(RotationError::Config(_))));
        assert_eq!(store.get_count(), 0);
        assert!(control.calls().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let store = Arc::new(MemoryObjectStore::new());
        store.insert("ns", "certs", "letsencrypt-example.com.tar.gz", b"x".to_vec());
        let rotator = Rotator::new(
            config(),
            store.clone(),
            Arc::new(MemoryControlPlane::new("lb", LoadBalancerSnapshot::default())),
        )
        .with_cancellation(cancel);

        assert!(matches!(rotator.run().await, Err(RotationError::Cancelled)));
        assert_eq!(store.get_count(), 0);
    }
}
