//! Integration tests for the draft push worker.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use xt_reconcile::{ExtensionSnapshot, RemoteSource, ResourceType};
use xt_session::mock::{MockBuilder, MockRegistry, MockTokens};
use xt_session::{
    AppEvent, DevProcess, DraftPushWorker, EventBus, EventKind, Extension, ExtensionEvent,
    ExtensionKind, OutputMultiplexer, ProcessContext, RegistryError, WatchEvent, WorkerState,
};

struct Harness {
    builder: Arc<MockBuilder>,
    registry: Arc<MockRegistry>,
    tokens: Arc<MockTokens>,
    output: OutputMultiplexer,
}

struct Running {
    task: JoinHandle<anyhow::Result<()>>,
    state: watch::Receiver<WorkerState>,
    shutdown: watch::Sender<bool>,
}

impl Harness {
    fn new(builder: MockBuilder, registry: MockRegistry) -> Self {
        Self {
            builder: Arc::new(builder),
            registry: Arc::new(registry),
            tokens: Arc::new(MockTokens::new()),
            output: OutputMultiplexer::new(100),
        }
    }

    fn start(&self) -> Running {
        self.launch(None)
    }

    /// Start a worker that follows configuration changes on `bus`.
    fn start_following(&self, bus: &EventBus) -> Running {
        self.launch(Some(bus))
    }

    fn launch(&self, bus: Option<&EventBus>) -> Running {
        let extension = Extension {
            handle: "checkout".to_string(),
            uid: "checkout-uid".to_string(),
            name: "Checkout".to_string(),
            directory: PathBuf::from("extensions/checkout"),
            kind: ExtensionKind::UiExtension {
                targets: vec!["purchase.checkout.block.render".to_string()],
            },
            configuration: serde_json::json!({ "name": "Checkout" }),
        };
        let registration = RemoteSource {
            id: "id-checkout".to_string(),
            uuid: "uuid-checkout".to_string(),
            resource_type: ResourceType::new("ui_extension"),
            title: "Checkout".to_string(),
        };

        let mut worker = DraftPushWorker::new(
            "app-1",
            extension,
            registration,
            self.builder.clone(),
            self.registry.clone(),
            self.tokens.clone(),
        );
        if let Some(bus) = bus {
            worker = worker.with_events(bus.subscribe());
        }
        let state = worker.state();

        let (shutdown, shutdown_rx) = watch::channel(false);
        let (stdout, stderr) = self.output.sinks("checkout");
        let ctx = ProcessContext {
            label: "checkout".to_string(),
            stdout,
            stderr,
            shutdown: shutdown_rx,
        };

        let task = tokio::spawn(Box::new(worker).run(ctx));
        Running {
            task,
            state,
            shutdown,
        }
    }

    fn pushed_refs(&self) -> Vec<String> {
        self.registry
            .pushed()
            .into_iter()
            .map(|d| d.artifact_ref)
            .collect()
    }

    fn pane_text(&self) -> Vec<String> {
        self.output
            .pane("checkout")
            .map(|p| p.lines.into_iter().map(|l| l.text).collect())
            .unwrap_or_default()
    }
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

fn changed(uid: &str, configuration: serde_json::Value) -> AppEvent {
    AppEvent::new(vec![ExtensionEvent {
        kind: EventKind::Changed,
        extension: ExtensionSnapshot {
            uid: uid.to_string(),
            resource_type: ResourceType::new("ui_extension"),
            configuration,
        },
    }])
}

async fn reach(state: &mut watch::Receiver<WorkerState>, target: WorkerState) {
    tokio::time::timeout(Duration::from_secs(2), state.wait_for(|s| *s == target))
        .await
        .expect("timed out waiting for worker state")
        .expect("worker dropped its state channel");
}

#[tokio::test]
async fn test_builds_pushes_then_watches() {
    let harness = Harness::new(MockBuilder::new(), MockRegistry::new(vec![]));
    let mut running = harness.start();

    reach(&mut running.state, WorkerState::Watching).await;
    assert_eq!(harness.pushed_refs(), vec!["artifact-1"]);

    let draft = &harness.registry.pushed()[0];
    assert_eq!(draft.registration_id, "id-checkout");
    assert_eq!(draft.app_id, "app-1");
    assert!(draft.config_hash.as_str().starts_with("sha256:"));

    running.shutdown.send(true).unwrap();
    running.task.await.unwrap().unwrap();
    assert_eq!(*running.state.borrow(), WorkerState::Stopped);
}

#[tokio::test]
async fn test_push_failing_twice_is_fatal_after_one_recovery() {
    let registry = MockRegistry::new(vec![]);
    registry.fail_next_push(RegistryError::Transport("connection reset".to_string()));
    registry.fail_next_push(RegistryError::Transport("connection reset again".to_string()));
    let harness = Harness::new(MockBuilder::new(), registry);

    let running = harness.start();
    let err = running.task.await.unwrap().unwrap_err();

    assert_eq!(harness.registry.push_attempts(), 2);
    assert_eq!(harness.tokens.refreshes(), 1);
    assert!(format!("{err:#}").contains("connection reset again"));
}

#[tokio::test]
async fn test_expired_token_is_recovered() {
    let registry = MockRegistry::new(vec![]);
    registry.fail_next_push(RegistryError::Unauthorized);
    let harness = Harness::new(MockBuilder::new(), registry);

    let mut running = harness.start();
    reach(&mut running.state, WorkerState::Watching).await;

    assert_eq!(harness.registry.push_attempts(), 2);
    assert_eq!(harness.tokens.refreshes(), 1);
    assert_eq!(harness.pushed_refs(), vec!["artifact-1"]);

    running.shutdown.send(true).unwrap();
    running.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_rejected_push_is_reported_and_worker_continues() {
    let registry = MockRegistry::new(vec![]);
    registry.fail_next_push(RegistryError::Rejected {
        messages: vec!["targets missing".to_string()],
    });
    let harness = Harness::new(MockBuilder::new(), registry);

    let mut running = harness.start();
    reach(&mut running.state, WorkerState::Watching).await;

    assert_eq!(harness.tokens.refreshes(), 0);
    assert!(harness
        .pane_text()
        .contains(&"Draft rejected: targets missing".to_string()));

    assert!(harness.builder.emit("checkout", WatchEvent::Rebuilt(MockBuilder::artifact(2))).await);
    eventually(|| harness.pushed_refs() == vec!["artifact-2"]).await;

    running.shutdown.send(true).unwrap();
    running.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_rebuild_is_pushed() {
    let harness = Harness::new(MockBuilder::new(), MockRegistry::new(vec![]));
    let mut running = harness.start();
    reach(&mut running.state, WorkerState::Watching).await;

    harness.builder.emit("checkout", WatchEvent::Building).await;
    reach(&mut running.state, WorkerState::Building).await;

    harness
        .builder
        .emit("checkout", WatchEvent::Rebuilt(MockBuilder::artifact(7)))
        .await;
    eventually(|| harness.pushed_refs().len() == 2).await;
    reach(&mut running.state, WorkerState::Watching).await;

    assert_eq!(harness.pushed_refs(), vec!["artifact-1", "artifact-7"]);

    running.shutdown.send(true).unwrap();
    running.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_rebuild_failure_keeps_watching() {
    let harness = Harness::new(MockBuilder::new(), MockRegistry::new(vec![]));
    let mut running = harness.start();
    reach(&mut running.state, WorkerState::Watching).await;

    harness
        .builder
        .emit("checkout", WatchEvent::BuildFailed("syntax error".to_string()))
        .await;
    eventually(|| {
        harness
            .pane_text()
            .contains(&"Build failed: syntax error".to_string())
    })
    .await;
    assert!(!running.task.is_finished());

    harness
        .builder
        .emit("checkout", WatchEvent::Rebuilt(MockBuilder::artifact(2)))
        .await;
    eventually(|| harness.pushed_refs().len() == 2).await;

    running.shutdown.send(true).unwrap();
    running.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_initial_build_failure_is_fatal() {
    let harness = Harness::new(
        MockBuilder::failing("missing entrypoint"),
        MockRegistry::new(vec![]),
    );

    let running = harness.start();
    let err = running.task.await.unwrap().unwrap_err();

    assert!(format!("{err:#}").contains("missing entrypoint"));
    assert_eq!(harness.registry.push_attempts(), 0);
}

#[tokio::test]
async fn test_cancel_during_build_never_pushes() {
    let harness = Harness::new(
        MockBuilder::new().with_build_delay(Duration::from_secs(10)),
        MockRegistry::new(vec![]),
    );

    let mut running = harness.start();
    reach(&mut running.state, WorkerState::Building).await;
    running.shutdown.send(true).unwrap();

    running.task.await.unwrap().unwrap();
    assert_eq!(harness.registry.push_attempts(), 0);
    assert_eq!(*running.state.borrow(), WorkerState::Stopped);
}

#[tokio::test]
async fn test_push_in_flight_finishes_after_cancel() {
    let harness = Harness::new(
        MockBuilder::new(),
        MockRegistry::new(vec![]).with_push_delay(Duration::from_millis(100)),
    );

    let mut running = harness.start();
    reach(&mut running.state, WorkerState::Pushing).await;
    running.shutdown.send(true).unwrap();

    running.task.await.unwrap().unwrap();
    assert_eq!(harness.pushed_refs(), vec!["artifact-1"]);
}

#[tokio::test]
async fn test_queued_rebuilds_are_coalesced() {
    let harness = Harness::new(
        MockBuilder::new(),
        MockRegistry::new(vec![]).with_push_delay(Duration::from_millis(100)),
    );

    let mut running = harness.start();
    harness.builder.wait_watching("checkout").await;

    // The first push is still in flight.
    for n in 2..=4 {
        harness
            .builder
            .emit("checkout", WatchEvent::Rebuilt(MockBuilder::artifact(n)))
            .await;
    }

    eventually(|| harness.pushed_refs().len() == 2).await;
    reach(&mut running.state, WorkerState::Watching).await;
    assert_eq!(harness.pushed_refs(), vec!["artifact-1", "artifact-4"]);
    assert_eq!(harness.registry.push_attempts(), 2);

    running.shutdown.send(true).unwrap();
    running.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_rebuild_after_config_change_pushes_new_configuration() {
    let harness = Harness::new(MockBuilder::new(), MockRegistry::new(vec![]));
    let bus = EventBus::new();
    let mut running = harness.start_following(&bus);
    reach(&mut running.state, WorkerState::Watching).await;

    bus.publish(changed("checkout-uid", serde_json::json!({ "name": "Checkout v2" })));
    bus.publish(changed("other-uid", serde_json::json!({ "name": "Other" })));
    assert!(harness.builder.emit("checkout", WatchEvent::Rebuilt(MockBuilder::artifact(2))).await);

    eventually(|| harness.pushed_refs().len() == 2).await;
    let pushed = harness.registry.pushed();
    assert_eq!(pushed[0].configuration, serde_json::json!({ "name": "Checkout" }));
    assert_eq!(pushed[1].configuration, serde_json::json!({ "name": "Checkout v2" }));
    assert_eq!(pushed[1].artifact_ref, "artifact-2");
    assert_ne!(pushed[0].config_hash, pushed[1].config_hash);

    running.shutdown.send(true).unwrap();
    running.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_rebuilds_queue_behind_slow_push() {
    let harness = Harness::new(
        MockBuilder::new(),
        MockRegistry::new(vec![]).with_push_delay(Duration::from_millis(100)),
    );

    let mut running = harness.start();
    harness.builder.wait_watching("checkout").await;

    // Far more events than any bounded buffer would hold, all sent while
    // the first push is in flight.
    for n in 2..=101 {
        assert!(harness.builder.emit("checkout", WatchEvent::Building).await);
        assert!(
            harness
                .builder
                .emit("checkout", WatchEvent::Rebuilt(MockBuilder::artifact(n)))
                .await
        );
    }
    assert_eq!(harness.pushed_refs().len(), 0);

    eventually(|| harness.pushed_refs().len() == 2).await;
    reach(&mut running.state, WorkerState::Watching).await;
    assert_eq!(harness.pushed_refs(), vec!["artifact-1", "artifact-101"]);

    running.shutdown.send(true).unwrap();
    running.task.await.unwrap().unwrap();
}
