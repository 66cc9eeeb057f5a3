//! Work request completion polling
//!
//! Mutating control plane calls return immediately with a work request
//! handle. [`CompletionWaiter`] polls that handle at a fixed interval until
//! the remote side reports a terminal state or the attempt budget runs out.
//! The total wait is bounded by `poll_interval * max_attempts`.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use lbcert_common::{WorkRequestId, WorkRequestState};

use crate::adapters::ControlPlane;
use crate::error::{RotationError, RotationResult};

/// Terminal result of waiting on a work request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    Succeeded,
    Failed(String),
    /// `last_error` is set when the final poll failed instead of reporting a state
    TimedOut {
        attempts: u32,
        last_error: Option<String>,
    },
}

/// Run `fut` unless `cancel` fires first
pub(crate) async fn cancellable<F: Future>(
    cancel: &CancellationToken,
    fut: F,
) -> RotationResult<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RotationError::Cancelled),
        out = fut => Ok(out),
    }
}

/// Fixed-delay poller with a hard attempt ceiling.
#[derive(Debug, Clone)]
pub struct CompletionWaiter {
    poll_interval: Duration,
    max_attempts: u32,
    cancel: CancellationToken,
}

impl CompletionWaiter {
    pub fn new(poll_interval: Duration, max_attempts: u32) -> Self {
        Self {
            poll_interval,
            max_attempts,
            cancel: CancellationToken::new(),
        }
    }

    /// Abort sleeps and polls when `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Poll budget for log lines, e.g. `60 polls every 5s (up to 300s)`
    pub fn budget(&self) -> String {
        let interval = self.poll_interval.as_secs();
        format!(
            "{} polls every {}s (up to {}s)",
            self.max_attempts,
            interval,
            interval.saturating_mul(u64::from(self.max_attempts))
        )
    }

    /// Poll `id` until it succeeds, fails, or the attempt budget is spent.
    ///
    /// Each attempt sleeps for the poll interval and then polls once. Poll
    /// errors use up an attempt and are retried. Only cancellation is
    /// returned as an error; every other ending is a [`WaitOutcome`].
    pub async fn wait(
        &self,
        control: &dyn ControlPlane,
        id: &WorkRequestId,
    ) -> RotationResult<WaitOutcome> {
        let start = Instant::now();
        let mut last_error = None;

        for attempt in 1..=self.max_attempts {
            cancellable(&self.cancel, tokio::time::sleep(self.poll_interval)).await?;

            match cancellable(&self.cancel, control.get_work_request(id)).await? {
                Ok(status) if !status.state.is_terminal() => {
                    debug!(
                        work_request = %id,
                        attempt,
                        state = ?status.state,
                        "Work request pending"
                    );
                    last_error = None;
                }
                Ok(status) if status.state == WorkRequestState::Succeeded => {
                    info!(
                        work_request = %id,
                        attempt,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Work request succeeded"
                    );
                    return Ok(WaitOutcome::Succeeded);
                }
                Ok(status) => {
                    let detail = status
                        .error_detail
                        .unwrap_or_else(|| "no error detail reported".to_string());
                    warn!(work_request = %id, attempt, detail = %detail, "Work request failed");
                    return Ok(WaitOutcome::Failed(detail));
                }
                Err(e) => {
                    warn!(
                        work_request = %id,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "Polling work request failed"
                    );
                    last_error = Some(e.to_string());
                }
            }
        }

        warn!(
            work_request = %id,
            attempts = self.max_attempts,
            elapsed_secs = start.elapsed().as_secs(),
            last_error = ?last_error,
            "Work request did not complete within poll budget"
        );
        Ok(WaitOutcome::TimedOut {
            attempts: self.max_attempts,
            last_error,
        })
    }

    /// Like [`wait`](Self::wait), but failure and timeout become errors
    pub async fn wait_for_success(
        &self,
        control: &dyn ControlPlane,
        id: &WorkRequestId,
    ) -> RotationResult<()> {
        match self.wait(control, id).await? {
            WaitOutcome::Succeeded => Ok(()),
            WaitOutcome::Failed(detail) => Err(RotationError::WorkRequestFailed {
                id: id.clone(),
                detail,
            }),
            WaitOutcome::TimedOut {
                attempts,
                last_error,
            } => Err(RotationError::WorkRequestTimedOut {
                id: id.clone(),
                attempts,
                last_error,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{ControlPlaneCall, MemoryControlPlane};
    use lbcert_common::{CertificateName, LoadBalancerSnapshot};

    async fn issue(control: &MemoryControlPlane) -> WorkRequestId {
        control
            .create_certificate("lb", &CertificateName::new("cert_a"), "chain", "key")
            .await
            .unwrap()
    }

    fn polls(control: &MemoryControlPlane) -> usize {
        control
            .calls()
            .iter()
            .filter(|c| matches!(c, ControlPlaneCall::GetWorkRequest { .. }))
            .count()
    }

    #[test]
    fn test_budget_description() {
        assert_eq!(
            CompletionWaiter::new(Duration::from_secs(5), 60).budget(),
            "60 polls every 5s (up to 300s)"
        );
        assert_eq!(
            CompletionWaiter::new(Duration::from_secs(u64::MAX), 2).budget(),
            format!("2 polls every {}s (up to {}s)", u64::MAX, u64::MAX)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_first_successful_poll() {
        let control = MemoryControlPlane::new("lb", LoadBalancerSnapshot::default()).with_progression([
            WorkRequestState::Accepted,
            WorkRequestState::InProgress,
            WorkRequestState::Succeeded,
        ]);
        let id = issue(&control).await;

        let waiter = CompletionWaiter::new(Duration::from_secs(5), 10);
        let start = Instant::now();
        let outcome = waiter.wait(&control, &id).await.unwrap();

        assert_eq!(outcome, WaitOutcome::Succeeded);
        assert_eq!(polls(&control), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_when_pending() {
        let control = MemoryControlPlane::new("lb", LoadBalancerSnapshot::default())
            .with_progression([WorkRequestState::InProgress]);
        let id = issue(&control).await;

        let waiter = CompletionWaiter::new(Duration::from_secs(2), 4);
        let start = Instant::now();
        let outcome = waiter.wait(&control, &id).await.unwrap();

        assert_eq!(
            outcome,
            WaitOutcome::TimedOut {
                attempts: 4,
                last_error: None
            }
        );
        assert_eq!(polls(&control), 4);
        assert_eq!(start.elapsed(), Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_last_attempt() {
        let control = MemoryControlPlane::new("lb", LoadBalancerSnapshot::default()).with_progression([
            WorkRequestState::InProgress,
            WorkRequestState::InProgress,
            WorkRequestState::Succeeded,
        ]);
        let id = issue(&control).await;

        let waiter = CompletionWaiter::new(Duration::from_secs(1), 3);
        assert_eq!(waiter.wait(&control, &id).await.unwrap(), WaitOutcome::Succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_is_distinguished() {
        let control = MemoryControlPlane::new("lb", LoadBalancerSnapshot::default())
            .with_progression([WorkRequestState::InProgress, WorkRequestState::Failed]);
        let id = issue(&control).await;

        let waiter = CompletionWaiter::new(Duration::from_secs(1), 5);
        match waiter.wait_for_success(&control, &id).await {
            Err(RotationError::WorkRequestFailed { id: failed, detail }) => {
                assert_eq!(failed, id);
                assert_eq!(detail, "work request failed");
            }
            other => panic!("expected WorkRequestFailed, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_becomes_error() {
        let control = MemoryControlPlane::new("lb", LoadBalancerSnapshot::default())
            .with_progression([WorkRequestState::Accepted]);
        let id = issue(&control).await;

        let waiter = CompletionWaiter::new(Duration::from_secs(1), 2);
        assert!(matches!(
            waiter.wait_for_success(&control, &id).await,
            Err(RotationError::WorkRequestTimedOut { attempts: 2, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_errors_are_retried() {
        let control = MemoryControlPlane::new("lb", LoadBalancerSnapshot::default())
            .with_progression([WorkRequestState::Succeeded])
            .with_failing_polls(2);
        let id = issue(&control).await;

        let waiter = CompletionWaiter::new(Duration::from_secs(1), 3);
        assert_eq!(waiter.wait(&control, &id).await.unwrap(), WaitOutcome::Succeeded);
        assert_eq!(polls(&control), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unpollable_work_request_is_not_reported_pending() {
        let control = MemoryControlPlane::new("lb", LoadBalancerSnapshot::default())
            .with_progression([WorkRequestState::Succeeded])
            .with_failing_polls(100);
        let id = issue(&control).await;

        let waiter = CompletionWaiter::new(Duration::from_secs(1), 3);
        let err = waiter.wait_for_success(&control, &id).await.unwrap_err();

        let message = err.to_string();
        assert!(!message.contains("still pending"), "{}", message);
        assert!(message.contains("could not be polled"), "{}", message);

        match err {
            RotationError::WorkRequestTimedOut {
                attempts,
                last_error,
                ..
            } => {
                assert_eq!(attempts, 3);
                assert!(last_error.unwrap().contains("connection reset"));
            }
            other => panic!("expected WorkRequestTimedOut, got {:?}", other),
        }
        assert_eq!(polls(&control), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_seen_after_poll_error_clears_it() {
        let control = MemoryControlPlane::new("lb", LoadBalancerSnapshot::default())
            .with_progression([WorkRequestState::InProgress])
            .with_failing_polls(1);
        let id = issue(&control).await;

        let waiter = CompletionWaiter::new(Duration::from_secs(1), 3);
        assert_eq!(
            waiter.wait(&control, &id).await.unwrap(),
            WaitOutcome::TimedOut {
                attempts: 3,
                last_error: None
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_sleep() {
        let control = MemoryControlPlane::new("lb", LoadBalancerSnapshot::default())
            .with_progression([WorkRequestState::InProgress]);
        let id = issue(&control).await;

        let cancel = CancellationToken::new();
        let waiter =
            CompletionWaiter::new(Duration::from_secs(60), 100).with_cancellation(cancel.clone());

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(90)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let result = waiter.wait(&control, &id).await;

        assert!(matches!(result, Err(RotationError::Cancelled)));
        assert_eq!(polls(&control), 1);
        assert!(start.elapsed() < Duration::from_secs(120));
    }
}
