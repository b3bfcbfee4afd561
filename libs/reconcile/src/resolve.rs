//! Turning a match result into a final identifier map.
//!
//! All user interaction goes through [`MatchPrompt`], so resolution stays
//! deterministic for a given set of answers.

use std::collections::HashSet;

use tracing::{debug, info};

use crate::error::ReconcileError;
use crate::matching::MatchResult;
use crate::source::{IdentifierMap, LocalSource, RemoteSource};

/// Decisions the caller makes on behalf of the user.
pub trait MatchPrompt {
    /// Should `local` be linked to `remote`?
    fn confirm(&self, local: &LocalSource, remote: &RemoteSource) -> bool;

    /// Pair ambiguous locals with ambiguous remotes.
    ///
    /// Locals left out of the returned map are created as new registrations.
    fn select_manual_match(&self, locals: &[LocalSource], remotes: &[RemoteSource])
        -> IdentifierMap;

    /// May these locals be registered as new extensions?
    fn confirm_creation(&self, _locals: &[LocalSource]) -> bool {
        true
    }
}

/// How confirmations are obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveMode {
    /// Ask through the prompt.
    Interactive,
    /// Accept every hint and creation without asking. Ambiguity cannot be
    /// resolved in this mode.
    Force,
}

/// Outcome of a successful resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Approved pairings.
    pub identifiers: IdentifierMap,

    /// Locals that need a new registration.
    pub to_create: Vec<LocalSource>,

    /// Remote registrations with no local counterpart (informational).
    pub remote_only: Vec<RemoteSource>,
}

/// Resolve pending, ambiguous and creatable sources into a final map.
///
/// Nothing is partially applied: any decline or unresolvable ambiguity makes
/// the whole call fail.
pub fn resolve(
    result: MatchResult,
    mode: ResolveMode,
    prompt: &dyn MatchPrompt,
) -> Result<Resolution, ReconcileError> {
    let MatchResult {
        confirmed,
        pending_confirmation,
        mut to_create,
        ambiguous,
        remote_only,
    } = result;

    let mut identifiers = confirmed;

    for pending in pending_confirmation {
        let accepted = match mode {
            ResolveMode::Force => true,
            ResolveMode::Interactive => prompt.confirm(&pending.local, &pending.remote),
        };
        if !accepted {
            info!(
                extension = %pending.local.local_identifier,
                remote = %pending.remote.uuid,
                "Match declined"
            );
            return Err(ReconcileError::UserCancelled);
        }
        identifiers.insert(pending.local.local_identifier, pending.remote.uuid);
    }

    if !ambiguous.is_empty() {
        if mode == ResolveMode::Force {
            return Err(ReconcileError::PendingRemote);
        }

        let manual = prompt.select_manual_match(&ambiguous.local, &ambiguous.remote);
        let assigned = validate_manual_match(&manual, &ambiguous.local, &ambiguous.remote)?;

        if assigned.len() < ambiguous.remote.len() {
            debug!(
                assigned = assigned.len(),
                remote = ambiguous.remote.len(),
                "Manual match left remote registrations unassigned"
            );
            return Err(ReconcileError::PendingRemote);
        }

        to_create.extend(
            ambiguous
                .local
                .into_iter()
                .filter(|l| manual.get(&l.local_identifier).is_none()),
        );
        identifiers.merge(manual);
    }

    if !to_create.is_empty() && mode == ResolveMode::Interactive && !prompt.confirm_creation(&to_create)
    {
        return Err(ReconcileError::UserCancelled);
    }

    Ok(Resolution {
        identifiers,
        to_create,
        remote_only,
    })
}

/// Check a manual selection against the ambiguous set. Returns the set of
/// remote uuids it assigns.
fn validate_manual_match<'a>(
    manual: &'a IdentifierMap,
    locals: &[LocalSource],
    remotes: &[RemoteSource],
) -> Result<HashSet<&'a str>, ReconcileError> {
    let mut assigned = HashSet::new();

    for (local_identifier, uuid) in manual.iter() {
        if !locals.iter().any(|l| l.local_identifier == local_identifier) {
            return Err(ReconcileError::InvalidManualMatch(format!(
                "{local_identifier} is not awaiting a manual match"
            )));
        }
        if !remotes.iter().any(|r| r.uuid == uuid) {
            return Err(ReconcileError::InvalidManualMatch(format!(
                "{uuid} is not awaiting a manual match"
            )));
        }
        if !assigned.insert(uuid) {
            return Err(ReconcileError::InvalidManualMatch(format!(
                "{uuid} was assigned more than once"
            )));
        }
    }

    Ok(assigned)
}
