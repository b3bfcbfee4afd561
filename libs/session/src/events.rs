//! App events.
//!
//! An [`AppEvent`] is one batch of extension changes detected by a single
//! reload of the app. Batches are published on an [`EventBus`]; every
//! subscriber receives every batch published after it subscribed. Dropping
//! the receiver unsubscribes.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;
use xt_reconcile::{AppDiff, ExtensionSnapshot};

/// Buffered batches per subscriber before the slowest one starts lagging.
const BUS_CAPACITY: usize = 64;

/// What happened to an extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Created,
    Changed,
    Deleted,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            EventKind::Created => "created",
            EventKind::Changed => "changed",
            EventKind::Deleted => "deleted",
        })
    }
}

/// One extension change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtensionEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub extension: ExtensionSnapshot,
}

/// A batch of extension changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppEvent {
    pub extension_events: Vec<ExtensionEvent>,
}

impl AppEvent {
    pub fn new(extension_events: Vec<ExtensionEvent>) -> Self {
        Self { extension_events }
    }

    pub fn is_empty(&self) -> bool {
        self.extension_events.is_empty()
    }
}

impl From<AppDiff> for AppEvent {
    fn from(diff: AppDiff) -> Self {
        let AppDiff {
            created,
            updated,
            deleted,
        } = diff;

        let tagged = |kind: EventKind, list: Vec<ExtensionSnapshot>| {
            list.into_iter()
                .map(move |extension| ExtensionEvent { kind, extension })
        };
        let extension_events = tagged(EventKind::Created, created)
            .chain(tagged(EventKind::Changed, updated))
            .chain(tagged(EventKind::Deleted, deleted))
            .collect();

        Self { extension_events }
    }
}

/// Broadcast channel of app events.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AppEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    /// Publish a batch. Returns the number of subscribers that will see it.
    pub fn publish(&self, event: AppEvent) -> usize {
        let count = event.extension_events.len();
        // No subscribers is not an error.
        let receivers = self.tx.send(event).unwrap_or(0);
        debug!(events = count, receivers, "Published app event");
        receivers
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.tx.subscribe()
    }
}
