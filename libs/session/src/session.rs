//! Dev session assembly.
//!
//! A [`DevSession`] collects the processes of one dev run and hands them to
//! the [`ProcessSupervisor`]. The event bus, the output panes and the cache
//! all belong to the session and go away with it.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::sync::watch;
use tracing::{info, warn};
use xt_reconcile::{AppSnapshot, ExtensionSnapshot};

use crate::build::BuildExecutor;
use crate::error::SupervisorError;
use crate::events::EventBus;
use crate::extension::Extension;
use crate::identifiers::LinkedApp;
use crate::output::OutputMultiplexer;
use crate::registry::Registry;
use crate::reloader::{AppLoader, AppReloader};
use crate::supervisor::{DevProcess, ProcessSupervisor};
use crate::token::TokenSupplier;
use crate::watcher::EventWatcher;
use crate::worker::DraftPushWorker;

/// Tunables of a dev session.
#[derive(Debug, Clone)]
pub struct DevConfig {
    pub app_id: String,

    /// How often the app is reloaded from disk.
    pub poll_interval: Duration,

    /// How long tasks get to unwind after cancellation.
    pub shutdown_grace: Duration,

    /// Lines kept per output pane.
    pub output_buffer_lines: usize,
}

impl DevConfig {
    pub fn new(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            poll_interval: Duration::from_millis(500),
            shutdown_grace: Duration::from_secs(5),
            output_buffer_lines: 500,
        }
    }
}

/// External services a session talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub registry: Arc<dyn Registry>,
    pub tokens: Arc<dyn TokenSupplier>,
    pub builder: Arc<dyn BuildExecutor>,
}

/// The processes of one dev run.
pub struct DevSession {
    config: DevConfig,
    output: OutputMultiplexer,
    bus: EventBus,
    processes: Vec<Box<dyn DevProcess>>,
}

impl DevSession {
    pub fn new(config: DevConfig) -> Self {
        let output = OutputMultiplexer::new(config.output_buffer_lines);
        Self {
            config,
            output,
            bus: EventBus::new(),
            processes: Vec::new(),
        }
    }

    pub fn output(&self) -> &OutputMultiplexer {
        &self.output
    }

    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    /// Number of processes added so far.
    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// Add a process.
    pub fn spawn(&mut self, process: Box<dyn DevProcess>) {
        self.processes.push(process);
    }

    /// Add one draft worker per draftable extension. Returns how many were added.
    pub fn add_draft_workers(
        &mut self,
        linked: &LinkedApp,
        extensions: &[Extension],
        collaborators: &Collaborators,
    ) -> usize {
        let mut added = 0;
        for extension in extensions.iter().filter(|e| e.is_draftable()) {
            let Some(registration) = linked.registration_for(&extension.handle) else {
                warn!(extension = %extension.handle, "No registration linked, not pushing drafts");
                continue;
            };

            let worker = DraftPushWorker::new(
                self.config.app_id.clone(),
                extension.clone(),
                registration.clone(),
                collaborators.builder.clone(),
                collaborators.registry.clone(),
                collaborators.tokens.clone(),
            )
            .with_events(self.bus.subscribe());
            self.spawn(Box::new(worker));
            added += 1;
        }
        added
    }

    /// Reload the app periodically and publish its changes.
    pub fn watch_app(&mut self, loader: Arc<dyn AppLoader>, initial: AppSnapshot) {
        self.spawn(Box::new(AppReloader::new(
            loader,
            self.bus.clone(),
            self.config.poll_interval,
            initial,
        )));
    }

    /// Run `action` once, the first time an extension matching `predicate` is
    /// created or changed.
    pub fn on_first_change<P, A>(&mut self, label: &str, predicate: P, action: A)
    where
        P: Fn(&ExtensionSnapshot) -> bool + Send + Sync + 'static,
        A: FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send + 'static,
    {
        let watcher = EventWatcher::new(label, self.bus.subscribe(), predicate, action);
        self.spawn(Box::new(watcher));
    }

    /// Run every process until one fails or `shutdown` is set.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<(), SupervisorError> {
        info!(
            app_id = %self.config.app_id,
            processes = self.processes.len(),
            "Starting dev session"
        );
        let supervisor =
            ProcessSupervisor::new(self.output).with_grace(self.config.shutdown_grace);
        supervisor.run(self.processes, shutdown).await
    }
}
