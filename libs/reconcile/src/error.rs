//! Tagged reconciliation outcomes.

use thiserror::Error;

/// Reconciliation errors.
///
/// These are outcomes the orchestrator switches on, not generic failures.
/// Each one aborts the reconciliation step without applying any part of it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    /// Ambiguous registrations could not be resolved automatically.
    #[error("some remote registrations could not be matched to a local extension")]
    PendingRemote,

    /// The saved identifiers belong to a different app.
    #[error("saved identifiers belong to app {found}, expected {expected}")]
    InvalidEnvironment { expected: String, found: String },

    /// The user declined a proposed match or creation.
    #[error("cancelled by user")]
    UserCancelled,

    /// A manual selection did not respect the ambiguous set.
    #[error("invalid manual match: {0}")]
    InvalidManualMatch(String),
}

impl ReconcileError {
    /// Stable kebab-case tag for this outcome.
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::PendingRemote => "pending-remote",
            Self::InvalidEnvironment { .. } => "invalid-environment",
            Self::UserCancelled => "user-cancelled",
            Self::InvalidManualMatch(_) => "invalid-manual-match",
        }
    }
}
