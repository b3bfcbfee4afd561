//! Polling app reloader.
//!
//! Reloads the app on an interval, diffs the result against the last good
//! snapshot and publishes the changes as one [`AppEvent`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};
use xt_reconcile::{diff, AppSnapshot};

use crate::events::{AppEvent, EventBus};
use crate::supervisor::{DevProcess, ProcessContext, ProcessKind};

/// Loads the current state of the app.
#[async_trait]
pub trait AppLoader: Send + Sync {
    async fn load(&self) -> anyhow::Result<AppSnapshot>;
}

/// Publishes app changes detected by polling.
pub struct AppReloader {
    loader: Arc<dyn AppLoader>,
    bus: EventBus,
    interval: Duration,
    current: AppSnapshot,
}

impl AppReloader {
    pub fn new(
        loader: Arc<dyn AppLoader>,
        bus: EventBus,
        interval: Duration,
        initial: AppSnapshot,
    ) -> Self {
        Self {
            loader,
            bus,
            interval,
            current: initial,
        }
    }

    /// Reload once. Returns the published event, if anything changed.
    pub async fn reload(&mut self) -> anyhow::Result<Option<AppEvent>> {
        let next = self.loader.load().await?;
        let changes = diff(&self.current, &next, true);
        self.current = next;

        if changes.is_empty() {
            return Ok(None);
        }

        debug!(
            created = changes.created.len(),
            updated = changes.updated.len(),
            deleted = changes.deleted.len(),
            "App changed"
        );
        let event = AppEvent::from(changes);
        self.bus.publish(event.clone());
        Ok(Some(event))
    }
}

#[async_trait]
impl DevProcess for AppReloader {
    fn label(&self) -> &str {
        "app"
    }

    fn kind(&self) -> ProcessKind {
        ProcessKind::AppReloader
    }

    async fn run(self: Box<Self>, mut ctx: ProcessContext) -> anyhow::Result<()> {
        let mut this = self;
        let mut ticker = tokio::time::interval(this.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately and the initial snapshot is already known.
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;

                _ = ctx.cancelled() => break,

                _ = ticker.tick() => {
                    match this.reload().await {
                        Ok(Some(event)) => {
                            for e in &event.extension_events {
                                ctx.stdout.line(format!("{} {}", e.kind, e.extension.uid));
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            // A half-edited manifest is normal while developing.
                            warn!(error = %format!("{e:#}"), "App reload failed");
                            ctx.stderr.line(format!("reload failed: {e:#}"));
                        }
                    }
                }
            }
        }

        Ok(())
    }
}
