//! One-shot event watcher.
//!
//! An [`EventWatcher`] waits for the first `created` or `changed` event whose
//! extension satisfies its predicate, then runs its action exactly once. The
//! latch is atomic, so concurrent batches cannot trigger the action twice.
//! Errors from the action are logged and never returned.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use xt_reconcile::ExtensionSnapshot;

use crate::events::{AppEvent, EventKind};
use crate::supervisor::{DevProcess, ProcessContext, ProcessKind};

type Predicate = Box<dyn Fn(&ExtensionSnapshot) -> bool + Send + Sync>;
type Action = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// Runs an action the first time a matching extension appears or changes.
pub struct EventWatcher {
    label: String,
    triggered: AtomicBool,
    predicate: Predicate,
    action: Mutex<Option<Action>>,
    events: Option<broadcast::Receiver<AppEvent>>,
}

impl EventWatcher {
    /// Create a watcher.
    ///
    /// `events` should be subscribed before the event source starts, so that
    /// no early batch is missed.
    pub fn new<P, A>(
        label: impl Into<String>,
        events: broadcast::Receiver<AppEvent>,
        predicate: P,
        action: A,
    ) -> Self
    where
        P: Fn(&ExtensionSnapshot) -> bool + Send + Sync + 'static,
        A: FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send + 'static,
    {
        Self {
            label: label.into(),
            triggered: AtomicBool::new(false),
            predicate: Box::new(predicate),
            action: Mutex::new(Some(Box::new(action))),
            events: Some(events),
        }
    }

    /// True once the action has been started.
    pub fn triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    fn matches(&self, event: &AppEvent) -> bool {
        event.extension_events.iter().any(|e| {
            matches!(e.kind, EventKind::Created | EventKind::Changed) && (self.predicate)(&e.extension)
        })
    }

    /// Handle one batch. Returns true if this batch triggered the action.
    pub async fn handle(&self, event: &AppEvent) -> bool {
        if self.triggered() || !self.matches(event) {
            return false;
        }

        if self
            .triggered
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        let action = self
            .action
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();

        if let Some(action) = action {
            info!(label = %self.label, "Event watcher triggered");
            if let Err(e) = action().await {
                warn!(label = %self.label, error = %format!("{e:#}"), "Event watcher action failed");
            }
        }
        true
    }
}

#[async_trait]
impl DevProcess for EventWatcher {
    fn label(&self) -> &str {
        &self.label
    }

    fn kind(&self) -> ProcessKind {
        ProcessKind::EventWatcher
    }

    async fn run(self: Box<Self>, mut ctx: ProcessContext) -> anyhow::Result<()> {
        let mut this = self;
        let Some(mut events) = this.events.take() else {
            return Ok(());
        };

        loop {
            tokio::select! {
                biased;

                _ = ctx.cancelled() => break,

                event = events.recv() => match event {
                    Ok(event) => {
                        if this.handle(&event).await {
                            // Nothing left to do once triggered.
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(label = %this.label, skipped, "Event watcher lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    use super::*;
    use crate::events::{EventBus, ExtensionEvent};
    use xt_reconcile::ResourceType;

    fn event(kind: EventKind, resource_type: &str) -> AppEvent {
        AppEvent::new(vec![ExtensionEvent {
            kind,
            extension: ExtensionSnapshot {
                uid: "x".to_string(),
                resource_type: ResourceType::new(resource_type),
                configuration: serde_json::json!({}),
            },
        }])
    }

    fn counting_watcher(bus: &EventBus, calls: Arc<AtomicU32>) -> EventWatcher {
        EventWatcher::new(
            "logs",
            bus.subscribe(),
            |ext| ext.resource_type.as_str() == "function",
            move || -> BoxFuture<'static, anyhow::Result<()>> {
                Box::pin(async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            },
        )
    }

    #[tokio::test]
    async fn test_ignores_non_matching_events() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicU32::new(0));
        let watcher = counting_watcher(&bus, calls.clone());

        assert!(!watcher.handle(&event(EventKind::Created, "ui_extension")).await);
        assert!(!watcher.handle(&event(EventKind::Deleted, "function")).await);
        assert!(!watcher.triggered());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_action_error_is_swallowed() {
        let bus = EventBus::new();
        let watcher = EventWatcher::new(
            "logs",
            bus.subscribe(),
            |_| true,
            || -> BoxFuture<'static, anyhow::Result<()>> {
                Box::pin(async { anyhow::bail!("log stream unavailable") })
            },
        );

        assert!(watcher.handle(&event(EventKind::Changed, "function")).await);
        assert!(watcher.triggered());
    }
}
