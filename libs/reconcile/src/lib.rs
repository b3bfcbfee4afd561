//! Reconciliation primitives for extension projects.
//!
//! This library pairs the extensions found on disk with the registrations
//! tracked by the remote registry, and compares successive snapshots of an
//! app's extension set. Key concepts:
//!
//! - **Local source**: an extension project present on the developer's filesystem.
//! - **Remote source**: the registration the remote service keeps for it.
//! - **Identifier map**: the persisted `local identifier -> remote uuid` pairing.
//! - **Snapshot**: the full set of extensions of an app at one point in time.
//!
//! # Invariants
//!
//! - Matching and diffing are pure: no I/O, no prompting, deterministic output
//! - A name match is a hint that needs confirmation, never ground truth
//! - Ambiguous sets are surfaced whole, never guessed at
//! - A remote uuid is assigned to at most one local source per result

mod diff;
mod error;
mod matching;
mod resolve;
mod snapshot;
mod source;

pub use diff::{diff, AppDiff};
pub use error::ReconcileError;
pub use matching::{match_sources, Ambiguous, MatchResult, PendingMatch};
pub use resolve::{resolve, MatchPrompt, ResolveMode, Resolution};
pub use snapshot::{AppSnapshot, ConfigHash, ExtensionSnapshot};
pub use source::{slugify, IdentifierMap, LocalSource, RemoteSource, ResourceType};
