//! In-process collaborators.
//!
//! Both fakes record every call so callers can assert on exactly which
//! requests a rotation issued. Work requests follow a scripted progression
//! of states; the last state repeats for any further polls. Effects of a
//! mutating call (new certificate, listener configuration) become visible in
//! the snapshot once its work request is polled to success.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, trace};

use lbcert_common::{
    CertificateName, ListenerConfig, LoadBalancerSnapshot, WorkRequestId, WorkRequestState,
    WorkRequestStatus,
};

use super::{ControlPlane, ObjectStore};
use crate::error::RemoteError;

// ============================================================================
// Object Store
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, Bytes>>,
    gets: Mutex<usize>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(namespace: &str, bucket: &str, object: &str) -> String {
        format!("{}/{}/{}", namespace, bucket, object)
    }

    /// Publish an object
    pub fn insert(&self, namespace: &str, bucket: &str, object: &str, data: impl Into<Bytes>) {
        self.objects
            .lock()
            .insert(Self::key(namespace, bucket, object), data.into());
    }

    /// Number of downloads served
    pub fn get_count(&self) -> usize {
        *self.gets.lock()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn head(&self, namespace: &str, bucket: &str, object: &str) -> Result<bool, RemoteError> {
        Ok(self
            .objects
            .lock()
            .contains_key(&Self::key(namespace, bucket, object)))
    }

    async fn get(&self, namespace: &str, bucket: &str, object: &str) -> Result<Bytes, RemoteError> {
        let key = Self::key(namespace, bucket, object);
        let data = self
            .objects
            .lock()
            .get(&key)
            .cloned()
            .ok_or(RemoteError::NotFound(key))?;
        *self.gets.lock() += 1;
        Ok(data)
    }
}

// ============================================================================
// Control Plane
// ============================================================================

/// A request received by [`MemoryControlPlane`]
#[derive(Debug, Clone, PartialEq)]
pub enum ControlPlaneCall {
    GetState {
        load_balancer_id: String,
    },
    CreateCertificate {
        name: CertificateName,
    },
    GetWorkRequest {
        id: WorkRequestId,
    },
    UpdateListener {
        listener: String,
        certificate: Option<String>,
    },
}

impl ControlPlaneCall {
    /// Whether this call changes load balancer state
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            ControlPlaneCall::CreateCertificate { .. } | ControlPlaneCall::UpdateListener { .. }
        )
    }
}

#[derive(Debug)]
enum Effect {
    AddCertificate(CertificateName),
    ReplaceListener(String, ListenerConfig),
}

#[derive(Debug)]
struct WorkRequest {
    remaining: VecDeque<WorkRequestStatus>,
    effect: Option<Effect>,
}

#[derive(Debug)]
struct Inner {
    snapshot: LoadBalancerSnapshot,
    calls: Vec<ControlPlaneCall>,
    next_id: u64,
    progression: Vec<WorkRequestStatus>,
    listener_progressions: HashMap<String, Vec<WorkRequestStatus>>,
    rejected_listeners: HashMap<String, String>,
    failing_polls: usize,
    work_requests: HashMap<WorkRequestId, WorkRequest>,
}

/// Scriptable control plane for a single load balancer.
#[derive(Debug)]
pub struct MemoryControlPlane {
    load_balancer_id: String,
    inner: Mutex<Inner>,
}

fn status_for(state: WorkRequestState) -> WorkRequestStatus {
    match state {
        WorkRequestState::Failed => WorkRequestStatus::failed("work request failed"),
        other => WorkRequestStatus::new(other),
    }
}

impl MemoryControlPlane {
    /// Work requests go through `IN_PROGRESS` then `SUCCEEDED` unless scripted otherwise
    pub fn new(load_balancer_id: impl Into<String>, snapshot: LoadBalancerSnapshot) -> Self {
        Self {
            load_balancer_id: load_balancer_id.into(),
            inner: Mutex::new(Inner {
                snapshot,
                calls: Vec::new(),
                next_id: 1,
                progression: vec![
                    WorkRequestStatus::new(WorkRequestState::InProgress),
                    WorkRequestStatus::new(WorkRequestState::Succeeded),
                ],
                listener_progressions: HashMap::new(),
                rejected_listeners: HashMap::new(),
                failing_polls: 0,
                work_requests: HashMap::new(),
            }),
        }
    }

    /// States reported by successive polls of every new work request
    pub fn with_progression(self, states: impl IntoIterator<Item = WorkRequestState>) -> Self {
        self.inner.lock().progression = states.into_iter().map(status_for).collect();
        self
    }

    /// Statuses reported for work requests updating `listener`
    pub fn with_listener_progression(
        self,
        listener: &str,
        statuses: impl IntoIterator<Item = WorkRequestStatus>,
    ) -> Self {
        self.inner
            .lock()
            .listener_progressions
            .insert(listener.to_string(), statuses.into_iter().collect());
        self
    }

    /// Make `update_listener` for `listener` fail outright
    pub fn reject_listener(self, listener: &str, reason: &str) -> Self {
        self.inner
            .lock()
            .rejected_listeners
            .insert(listener.to_string(), reason.to_string());
        self
    }

    /// Fail the next `count` polls with a transport error
    pub fn with_failing_polls(self, count: usize) -> Self {
        self.inner.lock().failing_polls = count;
        self
    }

    /// Every call received so far
    pub fn calls(&self) -> Vec<ControlPlaneCall> {
        self.inner.lock().calls.clone()
    }

    /// Calls that create certificates or update listeners
    pub fn mutating_calls(&self) -> Vec<ControlPlaneCall> {
        self.inner
            .lock()
            .calls
            .iter()
            .filter(|c| c.is_mutating())
            .cloned()
            .collect()
    }

    /// Current state, including effects of succeeded work requests
    pub fn snapshot(&self) -> LoadBalancerSnapshot {
        self.inner.lock().snapshot.clone()
    }

    fn check_load_balancer(&self, load_balancer_id: &str) -> Result<(), RemoteError> {
        if load_balancer_id == self.load_balancer_id {
            Ok(())
        } else {
            Err(RemoteError::NotFound(format!(
                "load balancer {}",
                load_balancer_id
            )))
        }
    }

    fn issue(inner: &mut Inner, statuses: Vec<WorkRequestStatus>, effect: Effect) -> WorkRequestId {
        let id = WorkRequestId::new(format!("wr-{}", inner.next_id));
        inner.next_id += 1;
        inner.work_requests.insert(
            id.clone(),
            WorkRequest {
                remaining: statuses.into(),
                effect: Some(effect),
            },
        );
        trace!(id = %id, "Issued work request");
        id
    }
}

#[async_trait]
impl ControlPlane for MemoryControlPlane {
    async fn get_state(&self, load_balancer_id: &str) -> Result<LoadBalancerSnapshot, RemoteError> {
        let mut inner = self.inner.lock();
        inner.calls.push(ControlPlaneCall::GetState {
            load_balancer_id: load_balancer_id.to_string(),
        });
        self.check_load_balancer(load_balancer_id)?;
        Ok(inner.snapshot.clone())
    }

    async fn create_certificate(
        &self,
        load_balancer_id: &str,
        name: &CertificateName,
        _public_chain_pem: &str,
        _private_key_pem: &str,
    ) -> Result<WorkRequestId, RemoteError> {
        let mut inner = self.inner.lock();
        inner
            .calls
            .push(ControlPlaneCall::CreateCertificate { name: name.clone() });
        self.check_load_balancer(load_balancer_id)?;

        if inner.snapshot.has_certificate(name) {
            return Err(RemoteError::Status {
                status: 409,
                body: format!("certificate {} already exists", name),
            });
        }

        let statuses = inner.progression.clone();
        Ok(Self::issue(
            &mut inner,
            statuses,
            Effect::AddCertificate(name.clone()),
        ))
    }

    async fn get_work_request(&self, id: &WorkRequestId) -> Result<WorkRequestStatus, RemoteError> {
        let mut inner = self.inner.lock();
        inner
            .calls
            .push(ControlPlaneCall::GetWorkRequest { id: id.clone() });

        if inner.failing_polls > 0 {
            inner.failing_polls -= 1;
            return Err(RemoteError::Request("connection reset".to_string()));
        }

        let work = inner
            .work_requests
            .get_mut(id)
            .ok_or_else(|| RemoteError::NotFound(format!("work request {}", id)))?;

        let status = if work.remaining.len() > 1 {
            work.remaining.pop_front()
        } else {
            work.remaining.front().cloned()
        }
        .unwrap_or_else(|| WorkRequestStatus::new(WorkRequestState::Succeeded));

        let effect = if status.state == WorkRequestState::Succeeded {
            work.effect.take()
        } else {
            None
        };

        match effect {
            Some(Effect::AddCertificate(name)) => {
                debug!(name = %name, "Certificate installed");
                inner.snapshot.certificates.insert(name);
            }
            Some(Effect::ReplaceListener(listener, config)) => {
                debug!(listener = %listener, "Listener updated");
                if let Some(state) = inner
                    .snapshot
                    .listeners
                    .iter_mut()
                    .find(|l| l.name == listener)
                {
                    state.config = config;
                }
            }
            None => {}
        }

        Ok(status)
    }

    async fn update_listener(
        &self,
        load_balancer_id: &str,
        listener: &str,
        config: &ListenerConfig,
    ) -> Result<WorkRequestId, RemoteError> {
        let mut inner = self.inner.lock();
        inner.calls.push(ControlPlaneCall::UpdateListener {
            listener: listener.to_string(),
            certificate: config
                .ssl_configuration
                .as_ref()
                .and_then(|ssl| ssl.certificate_name.clone()),
        });
        self.check_load_balancer(load_balancer_id)?;

        if let Some(reason) = inner.rejected_listeners.get(listener) {
            return Err(RemoteError::Status {
                status: 400,
                body: reason.clone(),
            });
        }

        if !inner.snapshot.listeners.iter().any(|l| l.name == listener) {
            return Err(RemoteError::NotFound(format!("listener {}", listener)));
        }

        let statuses = inner
            .listener_progressions
            .get(listener)
            .cloned()
            .unwrap_or_else(|| inner.progression.clone());

        Ok(Self::issue(
            &mut inner,
            statuses,
            Effect::ReplaceListener(listener.to_string(), config.clone()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_progression_repeats_last_state() {
        let control = MemoryControlPlane::new("lb", LoadBalancerSnapshot::default())
            .with_progression([WorkRequestState::Accepted, WorkRequestState::InProgress]);

        let id = control
            .create_certificate("lb", &CertificateName::new("cert_a"), "chain", "key")
            .await
            .unwrap();

        let states: Vec<_> = [
            control.get_work_request(&id).await.unwrap().state,
            control.get_work_request(&id).await.unwrap().state,
            control.get_work_request(&id).await.unwrap().state,
        ]
        .into();
        assert_eq!(
            states,
            vec![
                WorkRequestState::Accepted,
                WorkRequestState::InProgress,
                WorkRequestState::InProgress
            ]
        );
        assert!(control.snapshot().certificates.is_empty());
    }

    #[tokio::test]
    async fn test_certificate_visible_after_success() {
        let control = MemoryControlPlane::new("lb", LoadBalancerSnapshot::default());
        let name = CertificateName::new("cert_a");

        let id = control
            .create_certificate("lb", &name, "chain", "key")
            .await
            .unwrap();
        assert!(!control.snapshot().has_certificate(&name));

        control.get_work_request(&id).await.unwrap();
        control.get_work_request(&id).await.unwrap();
        assert!(control.snapshot().has_certificate(&name));
        assert_eq!(control.mutating_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_load_balancer() {
        let control = MemoryControlPlane::new("lb", LoadBalancerSnapshot::default());
        assert!(matches!(
            control.get_state("other").await,
            Err(RemoteError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_object_store_roundtrip() {
        let store = MemoryObjectStore::new();
        store.insert("ns", "b", "o", b"data".to_vec());

        assert!(store.head("ns", "b", "o").await.unwrap());
        assert!(!store.head("ns", "b", "missing").await.unwrap());
        assert_eq!(&store.get("ns", "b", "o").await.unwrap()[..], b"data");
        assert_eq!(store.get_count(), 1);
    }
}
