//! Draft push worker.
//!
//! One worker keeps one extension's draft in sync with its sources.
//!
//! ## State Machine
//!
//! ```text
//! Idle ──start──> Building ──built──> Pushing ──pushed──> Watching
//!                                        ^                 │    ^
//!                                        │              change  │ failed
//!                                        │                 v    │
//!                                        └────rebuilt──── Building
//!
//! any state ──cancel──> Stopped
//! ```
//!
//! Pushes are strictly sequential. Rebuilds keep running in the executor while
//! a push is in flight; when it completes only the newest artifact is pushed.
//! A push in flight is never interrupted by cancellation, but no new cycle
//! starts once cancellation is seen.
//!
//! Drafts carry the extension's current configuration. A worker given the
//! session's event stream picks up `changed` events for its extension before
//! each push.
//!
//! Every push goes through [`with_recovery`]: one failure refreshes the access
//! token and retries once. A second failure is fatal for the worker. A push the
//! registry rejects with user errors is reported on the pane and the worker
//! keeps watching.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};
use xt_reconcile::RemoteSource;

use crate::build::{BuildArtifact, BuildExecutor, BuildMode, WatchEvent};
use crate::error::{PushError, RegistryError};
use crate::events::{AppEvent, EventKind};
use crate::extension::Extension;
use crate::registry::{DraftUpdate, PushOutcome, Registry};
use crate::retry::{with_recovery, DEFAULT_MAX_RETRIES};
use crate::supervisor::{DevProcess, ProcessContext, ProcessKind};
use crate::token::TokenSupplier;

/// Worker lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Building,
    Pushing,
    Watching,
    Stopped,
}

/// Builds an extension and pushes every build as a draft.
pub struct DraftPushWorker {
    app_id: String,
    extension: Extension,
    registration: RemoteSource,
    builder: Arc<dyn BuildExecutor>,
    registry: Arc<dyn Registry>,
    tokens: Arc<dyn TokenSupplier>,
    max_retries: u32,
    events: Option<broadcast::Receiver<AppEvent>>,
    state: watch::Sender<WorkerState>,
}

impl DraftPushWorker {
    pub fn new(
        app_id: impl Into<String>,
        extension: Extension,
        registration: RemoteSource,
        builder: Arc<dyn BuildExecutor>,
        registry: Arc<dyn Registry>,
        tokens: Arc<dyn TokenSupplier>,
    ) -> Self {
        let (state, _) = watch::channel(WorkerState::Idle);
        Self {
            app_id: app_id.into(),
            extension,
            registration,
            builder,
            registry,
            tokens,
            max_retries: DEFAULT_MAX_RETRIES,
            events: None,
            state,
        }
    }

    /// Set how many recoveries a push may use.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Follow configuration changes published for this extension.
    pub fn with_events(mut self, events: broadcast::Receiver<AppEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Observe state transitions.
    pub fn state(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: WorkerState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(extension = %self.extension.handle, from = ?previous, to = ?state, "Worker state changed");
        }
    }

    /// Apply every queued `changed` event for this extension.
    fn sync_configuration(&mut self) {
        let Some(events) = self.events.as_mut() else {
            return;
        };

        loop {
            match events.try_recv() {
                Ok(event) => {
                    let changed = event.extension_events.into_iter().filter(|e| {
                        e.kind == EventKind::Changed && e.extension.uid == self.extension.uid
                    });
                    for change in changed {
                        debug!(extension = %self.extension.handle, "Configuration changed");
                        self.extension.configuration = change.extension.configuration;
                    }
                }
                Err(TryRecvError::Lagged(missed)) => {
                    warn!(extension = %self.extension.handle, missed, "Missed app events");
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Closed) => {
                    self.events = None;
                    break;
                }
            }
        }
    }

    /// Push one artifact, recovering once from a failure.
    async fn push(&self, artifact: &BuildArtifact, ctx: &ProcessContext) -> Result<(), PushError> {
        self.set_state(WorkerState::Pushing);

        let snapshot = self.extension.to_snapshot();
        let draft = DraftUpdate {
            app_id: self.app_id.clone(),
            registration_id: self.registration.id.clone(),
            artifact_ref: artifact.reference.clone(),
            config_hash: snapshot.config_hash(),
            configuration: snapshot.configuration,
        };

        let outcome = with_recovery(
            || async {
                match self.registry.push_draft(&draft).await {
                    Ok(receipt) => Ok(PushOutcome::Accepted(receipt)),
                    Err(RegistryError::Rejected { messages }) => Ok(PushOutcome::Rejected(messages)),
                    Err(e) => Err(PushError::from(e)),
                }
            },
            || self.tokens.refresh_token(),
            self.max_retries,
        )
        .await?;

        match outcome {
            PushOutcome::Accepted(receipt) => {
                info!(
                    extension = %self.extension.handle,
                    artifact = %artifact.reference,
                    version = ?receipt.version,
                    "Draft updated"
                );
                match receipt.version {
                    Some(version) => ctx.stdout.line(format!("Draft updated ({version})")),
                    None => ctx.stdout.line("Draft updated"),
                }
            }
            PushOutcome::Rejected(messages) => {
                warn!(extension = %self.extension.handle, errors = messages.len(), "Draft rejected");
                for message in messages {
                    ctx.stderr.line(format!("Draft rejected: {message}"));
                }
            }
        }

        Ok(())
    }

    fn stop(&self) {
        self.set_state(WorkerState::Stopped);
        info!(extension = %self.extension.handle, "Draft worker stopped");
    }
}

/// Take every queued event and keep the newest artifact.
fn coalesce(
    changes: &mut mpsc::UnboundedReceiver<WatchEvent>,
    mut latest: BuildArtifact,
    ctx: &ProcessContext,
) -> BuildArtifact {
    let mut skipped = 0;
    while let Ok(event) = changes.try_recv() {
        match event {
            WatchEvent::Rebuilt(artifact) => {
                skipped += 1;
                latest = artifact;
            }
            WatchEvent::BuildFailed(message) => ctx.stderr.line(format!("Build failed: {message}")),
            WatchEvent::Building => {}
        }
    }
    if skipped > 0 {
        debug!(skipped, artifact = %latest.reference, "Coalesced queued rebuilds");
    }
    latest
}

#[async_trait]
impl DevProcess for DraftPushWorker {
    fn label(&self) -> &str {
        &self.extension.handle
    }

    fn kind(&self) -> ProcessKind {
        ProcessKind::DraftWorker
    }

    async fn run(self: Box<Self>, mut ctx: ProcessContext) -> anyhow::Result<()> {
        let mut this = *self;
        let handle = this.extension.handle.clone();

        this.set_state(WorkerState::Building);
        ctx.stdout.line("Building");

        let artifact = tokio::select! {
            biased;

            _ = ctx.cancelled() => {
                this.stop();
                return Ok(());
            }

            built = this.builder.build(&this.extension, BuildMode::Development) => {
                built.with_context(|| format!("initial build of {handle} failed"))?
            }
        };

        // Subscribe before the first push so rebuilds during it are queued.
        let mut changes = this
            .builder
            .watch(&this.extension)
            .await
            .with_context(|| format!("could not watch {handle}"))?;

        this.sync_configuration();
        this.push(&artifact, &ctx)
            .await
            .with_context(|| format!("draft push for {handle} failed"))?;
        this.set_state(WorkerState::Watching);

        loop {
            if ctx.is_cancelled() {
                break;
            }

            let event = tokio::select! {
                biased;
                _ = ctx.cancelled() => break,
                event = changes.recv() => event,
            };

            match event {
                None => {
                    debug!(extension = %handle, "Build watch ended");
                    break;
                }
                Some(WatchEvent::Building) => {
                    this.set_state(WorkerState::Building);
                    ctx.stdout.line("Rebuilding");
                }
                Some(WatchEvent::BuildFailed(message)) => {
                    warn!(extension = %handle, error = %message, "Rebuild failed");
                    ctx.stderr.line(format!("Build failed: {message}"));
                    this.set_state(WorkerState::Watching);
                }
                Some(WatchEvent::Rebuilt(artifact)) => {
                    let latest = coalesce(&mut changes, artifact, &ctx);
                    if ctx.is_cancelled() {
                        break;
                    }
                    this.sync_configuration();
                    this.push(&latest, &ctx)
                        .await
                        .with_context(|| format!("draft push for {handle} failed"))?;
                    this.set_state(WorkerState::Watching);
                }
            }
        }

        this.stop();
        Ok(())
    }
}
