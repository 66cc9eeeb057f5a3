//! Listener reconciliation
//!
//! Points every TLS-terminating listener at a newly installed certificate.
//! Each update starts from the listener's full current configuration and
//! changes only the certificate reference. Updates are independent of each
//! other: they are dispatched together, awaited together, and a failure on
//! one listener never stops the others.

use futures::future::join_all;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use lbcert_common::{CertificateName, LoadBalancerSnapshot, WorkRequestId};

use crate::adapters::ControlPlane;
use crate::error::{
    unfinished_detail, ReconciliationSummary, RemoteError, RotationError, RotationResult,
};
use crate::waiter::{cancellable, CompletionWaiter, WaitOutcome};

/// Result of issuing one listener update
#[derive(Debug)]
pub struct ListenerDispatch {
    pub listener: String,
    pub result: Result<WorkRequestId, RemoteError>,
}

/// Final state of one listener after reconciliation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerOutcome {
    Updated,
    Failed(String),
}

pub struct ListenerReconciler {
    control: Arc<dyn ControlPlane>,
    load_balancer_id: String,
    waiter: CompletionWaiter,
    cancel: CancellationToken,
}

impl ListenerReconciler {
    pub fn new(
        control: Arc<dyn ControlPlane>,
        load_balancer_id: impl Into<String>,
        waiter: CompletionWaiter,
    ) -> Self {
        Self {
            control,
            load_balancer_id: load_balancer_id.into(),
            waiter,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Issue one update per TLS listener without waiting for completion.
    ///
    /// Listeners without TLS are left alone.
    pub async fn dispatch(
        &self,
        snapshot: &LoadBalancerSnapshot,
        certificate: &CertificateName,
    ) -> RotationResult<Vec<ListenerDispatch>> {
        let requests: Vec<_> = snapshot
            .tls_listeners()
            .filter_map(|listener| {
                listener
                    .with_certificate(certificate)
                    .map(|config| (listener.name.clone(), config))
            })
            .map(|(listener, config)| async move {
                let result = self
                    .control
                    .update_listener(&self.load_balancer_id, &listener, &config)
                    .await;

                match &result {
                    Ok(id) => info!(
                        listener = %listener,
                        certificate = %certificate,
                        work_request = %id,
                        "Listener update dispatched"
                    ),
                    Err(e) => error!(
                        listener = %listener,
                        error = %e,
                        "Listener update rejected"
                    ),
                }

                ListenerDispatch { listener, result }
            })
            .collect();

        if requests.is_empty() {
            warn!(
                listeners = snapshot.listeners.len(),
                "Load balancer has no TLS listeners to update"
            );
        }

        cancellable(&self.cancel, join_all(requests)).await
    }

    /// Wait for every dispatched update to finish.
    ///
    /// Only cancellation aborts; every other problem is recorded per listener.
    pub async fn settle(
        &self,
        dispatches: Vec<ListenerDispatch>,
    ) -> RotationResult<Vec<(String, ListenerOutcome)>> {
        let waits = dispatches.into_iter().map(|dispatch| async move {
            let outcome = match dispatch.result {
                Err(e) => ListenerOutcome::Failed(format!("update rejected: {}", e)),
                Ok(id) => match self.waiter.wait(self.control.as_ref(), &id).await? {
                    WaitOutcome::Succeeded => ListenerOutcome::Updated,
                    WaitOutcome::Failed(detail) => {
                        ListenerOutcome::Failed(format!("work request {} failed: {}", id, detail))
                    }
                    WaitOutcome::TimedOut {
                        attempts,
                        last_error,
                    } => ListenerOutcome::Failed(format!(
                        "work request {} {}",
                        id,
                        unfinished_detail(&attempts, &last_error)
                    )),
                },
            };
            Ok::<_, RotationError>((dispatch.listener, outcome))
        });

        join_all(waits).await.into_iter().collect()
    }

    /// Dispatch and settle every TLS listener update
    pub async fn reconcile(
        &self,
        snapshot: &LoadBalancerSnapshot,
        certificate: &CertificateName,
    ) -> RotationResult<Vec<(String, ListenerOutcome)>> {
        let dispatches = self.dispatch(snapshot, certificate).await?;
        self.settle(dispatches).await
    }
}

/// Collapse per-listener outcomes into the updated listeners, or an error
/// naming every listener that failed.
pub fn summarize(outcomes: Vec<(String, ListenerOutcome)>) -> RotationResult<Vec<String>> {
    let mut summary = ReconciliationSummary::default();

    for (listener, outcome) in outcomes {
        match outcome {
            ListenerOutcome::Updated => summary.succeeded.push(listener),
            ListenerOutcome::Failed(reason) => summary.failed.push((listener, reason)),
        }
    }

    if summary.failed.is_empty() {
        Ok(summary.succeeded)
    } else {
        error!(
            updated = summary.succeeded.len(),
            failed = summary.failed.len(),
            "Listener reconciliation incomplete"
        );
        Err(RotationError::PartialReconciliation(summary))
    }
}
