//! # xt-session
//!
//! Runtime for a live development session.
//!
//! A dev session keeps every extension of an app synchronized with the remote
//! registry while the developer edits it:
//!
//! - [`ensure_identifiers`](identifiers::Linker::ensure_identifiers) reconciles
//!   local extensions with remote registrations before anything runs
//! - one [`DraftPushWorker`] per draftable extension builds, pushes and then
//!   pushes again on every rebuild
//! - an [`AppReloader`] polls the app and publishes [`AppEvent`] batches
//! - [`EventWatcher`]s start auxiliary features once, on the first matching event
//! - the [`ProcessSupervisor`] runs all of the above under one cancellation
//!   token, with output captured per task by the [`OutputMultiplexer`]
//!
//! ## Failure policy
//!
//! The session is all or nothing. The first task to fail cancels every other
//! task, and its error is returned once they have unwound. Auxiliary actions
//! started by an event watcher are the exception: their errors are logged and
//! dropped.

pub mod build;
pub mod cache;
pub mod error;
pub mod events;
pub mod extension;
pub mod identifiers;
pub mod mock;
pub mod output;
pub mod registry;
pub mod reloader;
pub mod retry;
pub mod session;
pub mod store;
pub mod supervisor;
pub mod token;
pub mod watcher;
pub mod worker;

pub use build::{BuildArtifact, BuildExecutor, BuildMode, WatchEvent};
pub use cache::SessionCache;
pub use error::{BuildError, LinkError, PushError, RegistryError, StoreError, SupervisorError, TokenError};
pub use events::{AppEvent, EventBus, EventKind, ExtensionEvent};
pub use extension::{Extension, ExtensionKind};
pub use identifiers::{LinkedApp, Linker};
pub use output::{OutputLine, OutputMultiplexer, OutputSink, PaneSnapshot, Stream};
pub use registry::{DraftReceipt, DraftUpdate, NewRegistration, PushOutcome, Registry};
pub use reloader::{AppLoader, AppReloader};
pub use retry::{with_recovery, DEFAULT_MAX_RETRIES};
pub use session::{Collaborators, DevConfig, DevSession};
pub use store::IdentifierStore;
pub use supervisor::{DevProcess, FnProcess, ProcessContext, ProcessKind, ProcessSupervisor};
pub use token::{SharedTokens, TokenIssuer, TokenSupplier};
pub use watcher::EventWatcher;
pub use worker::{DraftPushWorker, WorkerState};
