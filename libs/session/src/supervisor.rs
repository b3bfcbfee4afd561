//! Process supervisor.
//!
//! Runs every task of a dev session concurrently under one cancellation token.
//!
//! ## Failure policy
//!
//! There is no partial success. When any task fails or panics:
//! 1. Every task is signalled to stop through its [`ProcessContext`]
//! 2. The supervisor waits for all of them to return, up to a grace period
//! 3. Tasks still running after the grace period are aborted
//! 4. The first failure is returned
//!
//! Cancelling the parent token runs the same shutdown and returns `Ok(())`.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::SupervisorError;
use crate::output::{OutputMultiplexer, OutputSink};

/// Default time tasks get to unwind after cancellation.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(5);

/// Role of a task, used when reporting its failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessKind {
    DraftWorker,
    AppReloader,
    EventWatcher,
    LogStream,
    Task,
}

impl std::fmt::Display for ProcessKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ProcessKind::DraftWorker => "draft worker",
            ProcessKind::AppReloader => "app reloader",
            ProcessKind::EventWatcher => "event watcher",
            ProcessKind::LogStream => "log stream",
            ProcessKind::Task => "task",
        })
    }
}

/// What a task is handed when it starts.
#[derive(Debug, Clone)]
pub struct ProcessContext {
    pub label: String,
    pub stdout: OutputSink,
    pub stderr: OutputSink,

    /// Set to `true` when the task must stop.
    pub shutdown: watch::Receiver<bool>,
}

impl ProcessContext {
    /// Check if cancellation has been signalled.
    pub fn is_cancelled(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Wait until cancellation is signalled.
    pub async fn cancelled(&mut self) {
        // A closed channel means the supervisor is gone; treat it as cancelled.
        let _ = self.shutdown.wait_for(|stop| *stop).await;
    }
}

/// A long-running task of the dev session.
#[async_trait]
pub trait DevProcess: Send + 'static {
    /// Pane label, e.g. the extension handle.
    fn label(&self) -> &str;

    fn kind(&self) -> ProcessKind {
        ProcessKind::Task
    }

    /// Run until done, failed or cancelled.
    async fn run(self: Box<Self>, ctx: ProcessContext) -> anyhow::Result<()>;
}

/// A [`DevProcess`] made from a closure.
pub struct FnProcess<F> {
    label: String,
    kind: ProcessKind,
    body: F,
}

impl<F, Fut> FnProcess<F>
where
    F: FnOnce(ProcessContext) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    pub fn new(label: impl Into<String>, body: F) -> Self {
        Self {
            label: label.into(),
            kind: ProcessKind::Task,
            body,
        }
    }

    pub fn with_kind(mut self, kind: ProcessKind) -> Self {
        self.kind = kind;
        self
    }
}

#[async_trait]
impl<F, Fut> DevProcess for FnProcess<F>
where
    F: FnOnce(ProcessContext) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn label(&self) -> &str {
        &self.label
    }

    fn kind(&self) -> ProcessKind {
        self.kind
    }

    async fn run(self: Box<Self>, ctx: ProcessContext) -> anyhow::Result<()> {
        (self.body)(ctx).await
    }
}

/// How a supervised task ended.
struct TaskExit {
    label: String,
    kind: ProcessKind,
    result: Result<anyhow::Result<()>, Box<dyn Any + Send>>,
}

impl TaskExit {
    fn into_error(self) -> Option<SupervisorError> {
        match self.result {
            Ok(Ok(())) => {
                debug!(label = %self.label, kind = %self.kind, "Dev process finished");
                None
            }
            Ok(Err(source)) => {
                error!(label = %self.label, kind = %self.kind, error = %format!("{source:#}"), "Dev process failed");
                Some(SupervisorError::TaskFailed {
                    label: self.label,
                    kind: self.kind,
                    source,
                })
            }
            Err(_) => {
                error!(label = %self.label, kind = %self.kind, "Dev process panicked");
                Some(SupervisorError::Panicked { label: self.label })
            }
        }
    }
}

/// Runs dev processes with all-or-nothing failure semantics.
pub struct ProcessSupervisor {
    output: OutputMultiplexer,
    grace: Duration,
}

impl ProcessSupervisor {
    pub fn new(output: OutputMultiplexer) -> Self {
        Self {
            output,
            grace: DEFAULT_GRACE,
        }
    }

    /// Set how long tasks get to unwind before being aborted.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn output(&self) -> &OutputMultiplexer {
        &self.output
    }

    /// Run all processes until they finish, one fails, or `shutdown` is set.
    pub async fn run(
        &self,
        processes: Vec<Box<dyn DevProcess>>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), SupervisorError> {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let mut tasks = JoinSet::new();

        for process in processes {
            let label = process.label().to_string();
            let kind = process.kind();
            let (stdout, stderr) = self.output.sinks(&label);
            let ctx = ProcessContext {
                label: label.clone(),
                stdout: stdout.clone(),
                stderr: stderr.clone(),
                shutdown: cancel_rx.clone(),
            };

            tasks.spawn(async move {
                let result = AssertUnwindSafe(process.run(ctx)).catch_unwind().await;
                stdout.flush();
                stderr.flush();
                TaskExit {
                    label,
                    kind,
                    result,
                }
            });
        }

        info!(count = tasks.len(), "Started dev processes");

        let mut failure = None;
        let mut parent_open = true;

        if !*shutdown.borrow_and_update() {
            loop {
                tokio::select! {
                    biased;

                    changed = shutdown.changed(), if parent_open => {
                        match changed {
                            Ok(()) if *shutdown.borrow() => {
                                info!("Shutdown requested, stopping dev processes");
                                break;
                            }
                            Ok(()) => {}
                            Err(_) => parent_open = false,
                        }
                    }

                    exit = tasks.join_next() => {
                        match exit {
                            None => {
                                info!("All dev processes finished");
                                return Ok(());
                            }
                            Some(Ok(exit)) => {
                                if let Some(err) = exit.into_error() {
                                    failure = Some(err);
                                    break;
                                }
                            }
                            Some(Err(e)) => {
                                error!(error = %e, "Dev process task could not be joined");
                                failure = Some(SupervisorError::Panicked {
                                    label: "unknown".to_string(),
                                });
                                break;
                            }
                        }
                    }
                }
            }
        }

        let _ = cancel_tx.send(true);
        self.drain(&mut tasks).await;

        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Wait for cancelled tasks to unwind, aborting stragglers after the grace period.
    async fn drain(&self, tasks: &mut JoinSet<TaskExit>) {
        let remaining = tasks.len();
        debug!(remaining, "Waiting for dev processes to stop");

        let unwind = async {
            while let Some(exit) = tasks.join_next().await {
                if let Ok(exit) = exit {
                    // Later failures are logged but the first one is what gets reported.
                    let _ = exit.into_error();
                }
            }
        };

        if tokio::time::timeout(self.grace, unwind).await.is_err() {
            warn!(
                remaining = tasks.len(),
                grace_secs = self.grace.as_secs(),
                "Dev processes did not stop in time, aborting"
            );
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }
    }
}
