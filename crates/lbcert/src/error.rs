//! Error types for certificate rotation.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

use lbcert_common::WorkRequestId;
use lbcert_config::ConfigError;

/// Result type for rotation operations.
pub type RotationResult<T> = Result<T, RotationError>;

/// Errors that abort a rotation run.
#[derive(Debug, Error)]
pub enum RotationError {
    /// The bundle has not been published to the object store yet
    #[error("certificate archive not found: /n/{namespace}/b/{bucket}/o/{object}")]
    ArchiveNotFound {
        namespace: String,
        bucket: String,
        object: String,
    },

    /// Corrupt gzip stream or tar container
    #[error("malformed certificate archive: {0}")]
    ArchiveFormat(String),

    /// A live symlink whose target has no archive content
    #[error("live entry {domain}/{file} points at '{target}', which has no archive content")]
    UnresolvedLink {
        domain: String,
        file: String,
        target: String,
    },

    /// Certificate or key material that does not parse
    #[error("invalid PEM in {what}: {reason}")]
    InvalidPem { what: String, reason: String },

    /// The requested domain has no fullchain or key at all
    #[error("archive has no live {file} for domain {domain}")]
    MissingMaterial { domain: String, file: String },

    /// A collaborator call failed
    #[error("{operation} failed: {source}")]
    Remote {
        operation: &'static str,
        #[source]
        source: RemoteError,
    },

    /// The remote side reported the work request as failed
    #[error("work request {id} failed: {detail}")]
    WorkRequestFailed { id: WorkRequestId, detail: String },

    /// The poll budget ran out before the work request reached a terminal state
    #[error("work request {id} {}", unfinished_detail(.attempts, .last_error))]
    WorkRequestTimedOut {
        id: WorkRequestId,
        attempts: u32,
        /// Error of the final poll, when it could not read the status at all
        last_error: Option<String>,
    },

    /// One or more listener updates failed
    #[error("listener reconciliation incomplete: {0}")]
    PartialReconciliation(ReconciliationSummary),

    /// Configuration rejected before the run started
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The run was cancelled from outside
    #[error("rotation cancelled")]
    Cancelled,

    /// The run exceeded its overall deadline
    #[error("rotation exceeded its deadline of {0:?}")]
    DeadlineExceeded(Duration),
}

impl RotationError {
    pub(crate) fn remote(operation: &'static str, source: RemoteError) -> Self {
        RotationError::Remote { operation, source }
    }

    pub(crate) fn invalid_pem(what: impl Into<String>, reason: impl fmt::Display) -> Self {
        RotationError::InvalidPem {
            what: what.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether this is the "bundle not published yet" condition
    pub fn is_archive_not_found(&self) -> bool {
        matches!(self, RotationError::ArchiveNotFound { .. })
    }
}

/// Tell "seen pending" apart from "could not be polled"
pub(crate) fn unfinished_detail(attempts: &u32, last_error: &Option<String>) -> String {
    match last_error {
        Some(error) => format!("could not be polled after {} attempts: {}", attempts, error),
        None => format!("still pending after {} polls", attempts),
    }
}

/// Errors reported by the object store and control plane collaborators.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            RemoteError::InvalidResponse(err.to_string())
        } else {
            RemoteError::Request(err.to_string())
        }
    }
}

/// Per-listener results of a reconciliation that did not fully succeed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconciliationSummary {
    /// Listeners now referencing the new certificate
    pub succeeded: Vec<String>,
    /// Listeners that could not be updated, with the reason
    pub failed: Vec<(String, String)>,
}

impl fmt::Display for ReconciliationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} updated [{}], {} failed [",
            self.succeeded.len(),
            self.succeeded.join(", "),
            self.failed.len()
        )?;
        for (i, (listener, reason)) in self.failed.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}: {}", listener, reason)?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_display() {
        let summary = ReconciliationSummary {
            succeeded: vec!["https".to_string()],
            failed: vec![
                ("admin".to_string(), "boom".to_string()),
                ("api".to_string(), "timed out".to_string()),
            ],
        };

        assert_eq!(
            summary.to_string(),
            "1 updated [https], 2 failed [admin: boom; api: timed out]"
        );
    }

    #[test]
    fn test_archive_not_found_message() {
        let err = RotationError::ArchiveNotFound {
            namespace: "ns".to_string(),
            bucket: "certs".to_string(),
            object: "le-example.com.tar.gz".to_string(),
        };
        assert!(err.is_archive_not_found());
        assert_eq!(
            err.to_string(),
            "certificate archive not found: /n/ns/b/certs/o/le-example.com.tar.gz"
        );
    }

    #[test]
    fn test_timed_out_message_names_poll_failure() {
        let pending = RotationError::WorkRequestTimedOut {
            id: WorkRequestId::new("wr-1"),
            attempts: 3,
            last_error: None,
        };
        assert_eq!(pending.to_string(), "work request wr-1 still pending after 3 polls");

        let unreachable = RotationError::WorkRequestTimedOut {
            id: WorkRequestId::new("wr-1"),
            attempts: 3,
            last_error: Some("request failed: connection reset".to_string()),
        };
        assert_eq!(
            unreachable.to_string(),
            "work request wr-1 could not be polled after 3 attempts: request failed: connection reset"
        );
    }
}
