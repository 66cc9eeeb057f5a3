//! lbcert Library
//!
//! Rotates the TLS certificate of a load balancer from a bundle published by
//! an ACME client.
//!
//! The pipeline is built from small components:
//!
//! - **Archive**: resolves `live/` links in a tar+gzip bundle to PEM content
//! - **Inspect**: reads the expiry of the leaf certificate
//! - **Plan**: decides whether the certificate still has to be installed
//! - **Waiter**: polls asynchronous control plane operations to completion
//! - **Reconcile**: repoints every TLS listener at the new certificate
//!
//! [`Rotator`] runs them in order against an [`ObjectStore`] and a
//! [`ControlPlane`].
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use lbcert::{FsObjectStore, HttpControlPlane, Rotator};
//! use lbcert_config::RotationConfig;
//!
//! let config = RotationConfig::from_env()?;
//! let store = Arc::new(FsObjectStore::new("/var/lib/certs"));
//! let control = Arc::new(HttpControlPlane::new("https://lb.example.com/20170115", None)?);
//!
//! let report = Rotator::new(config, store, control).run().await?;
//! println!("{}", report.name());
//! ```

// ============================================================================
// Module Declarations
// ============================================================================

pub mod adapters;
pub mod archive;
pub mod error;
pub mod inspect;
pub mod plan;
pub mod reconcile;
pub mod rotation;
pub mod waiter;

// ============================================================================
// Public API Re-exports
// ============================================================================

// Errors
pub use error::{ReconciliationSummary, RemoteError, RotationError, RotationResult};

// Collaborators
pub use adapters::{
    ControlPlane, ControlPlaneCall, FsObjectStore, HttpControlPlane, HttpObjectStore,
    MemoryControlPlane, MemoryObjectStore, ObjectStore,
};

// Pipeline components
pub use archive::{resolve, CertBundle, LivePair};
pub use inspect::{expiry_of, ResolvedCertificate};
pub use plan::{plan, Installation, RotationPlan};
pub use reconcile::{ListenerOutcome, ListenerReconciler};
pub use rotation::{RotationReport, Rotator};
pub use waiter::{CompletionWaiter, WaitOutcome};
