//! Error types for the dev session runtime.

use thiserror::Error;
use xt_reconcile::ReconcileError;

use crate::supervisor::ProcessKind;

/// Errors returned by a remote registry client.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The access token was missing, expired or revoked.
    #[error("not authorized")]
    Unauthorized,

    /// The registry refused the request with user-facing messages.
    #[error("rejected: {}", messages.join("; "))]
    Rejected { messages: Vec<String> },

    /// The registry answered with an unexpected status.
    #[error("registry error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The request never got an answer.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Errors from the build executor.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The build command ran and failed.
    #[error("build failed: {0}")]
    Failed(String),

    /// The build could not be started.
    #[error("could not start build: {0}")]
    Io(#[from] std::io::Error),

    /// The extension has nothing to build.
    #[error("extension {0} has no build configuration")]
    NotBuildable(String),
}

/// Errors from the credential supplier.
#[derive(Debug, Error, Clone)]
pub enum TokenError {
    /// There are no stored credentials.
    #[error("not logged in")]
    Missing,

    /// The refresh request was answered with an error.
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),
}

/// A draft push that could not be delivered, even after recovery.
#[derive(Debug, Error)]
pub enum PushError {
    /// The registry call failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The recovery action could not refresh credentials.
    #[error(transparent)]
    Token(#[from] TokenError),
}

/// Errors from the persisted identifier store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("identifier store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid identifier file: {0}")]
    Format(#[from] serde_json::Error),
}

/// Errors from identifier reconciliation.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Terminal errors of a supervised run.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// A task returned an error.
    #[error("{kind} {label} failed: {source:#}")]
    TaskFailed {
        label: String,
        kind: ProcessKind,
        #[source]
        source: anyhow::Error,
    },

    /// A task panicked.
    #[error("{label} panicked")]
    Panicked { label: String },
}

impl SupervisorError {
    /// Label of the task that brought the session down.
    pub fn label(&self) -> &str {
        match self {
            SupervisorError::TaskFailed { label, .. } | SupervisorError::Panicked { label } => {
                label
            }
        }
    }
}
