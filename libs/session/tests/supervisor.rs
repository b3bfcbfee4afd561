//! Integration tests for the process supervisor.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use xt_session::{
    DevProcess, FnProcess, OutputMultiplexer, ProcessContext, ProcessKind, ProcessSupervisor,
    SupervisorError,
};

/// A task that runs until cancelled, then records that it saw the cancellation.
fn patient(label: &str, observed: Arc<AtomicU32>) -> Box<dyn DevProcess> {
    Box::new(FnProcess::new(label, move |mut ctx: ProcessContext| async move {
        ctx.stdout.line("started");
        ctx.cancelled().await;
        // Unwinding takes a moment.
        tokio::time::sleep(Duration::from_millis(5)).await;
        observed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }))
}

fn failing(label: &str, after: Duration) -> Box<dyn DevProcess> {
    Box::new(
        FnProcess::new(label, move |_ctx: ProcessContext| async move {
            tokio::time::sleep(after).await;
            anyhow::bail!("push exhausted retries")
        })
        .with_kind(ProcessKind::DraftWorker),
    )
}

#[tokio::test]
async fn test_failure_cancels_every_other_task() {
    let supervisor = ProcessSupervisor::new(OutputMultiplexer::new(50));
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let observed = Arc::new(AtomicU32::new(0));

    let processes = vec![
        patient("a", observed.clone()),
        patient("b", observed.clone()),
        failing("bad", Duration::from_millis(20)),
        patient("c", observed.clone()),
    ];

    let err = supervisor.run(processes, shutdown_rx).await.unwrap_err();

    // Every other task saw the cancellation before run returned.
    assert_eq!(observed.load(Ordering::SeqCst), 3);
    match err {
        SupervisorError::TaskFailed { label, kind, source } => {
            assert_eq!(label, "bad");
            assert_eq!(kind, ProcessKind::DraftWorker);
            assert_eq!(source.to_string(), "push exhausted retries");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_first_failure_is_reported() {
    let supervisor = ProcessSupervisor::new(OutputMultiplexer::new(50));
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let processes = vec![
        failing("late", Duration::from_millis(200)),
        failing("early", Duration::from_millis(10)),
    ];

    let err = supervisor.run(processes, shutdown_rx).await.unwrap_err();
    assert_eq!(err.label(), "early");
}

#[tokio::test]
async fn test_parent_shutdown_stops_everything() {
    let supervisor = ProcessSupervisor::new(OutputMultiplexer::new(50));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let observed = Arc::new(AtomicU32::new(0));

    let processes = vec![patient("a", observed.clone()), patient("b", observed.clone())];

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let _ = shutdown_tx.send(true);
    });

    supervisor.run(processes, shutdown_rx).await.unwrap();
    assert_eq!(observed.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_panic_is_a_failure() {
    let supervisor = ProcessSupervisor::new(OutputMultiplexer::new(50));
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let observed = Arc::new(AtomicU32::new(0));

    let processes: Vec<Box<dyn DevProcess>> = vec![
        patient("a", observed.clone()),
        Box::new(FnProcess::new("boom", |_ctx: ProcessContext| async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            panic!("bundler crashed");
        })),
    ];

    let err = supervisor.run(processes, shutdown_rx).await.unwrap_err();
    assert!(matches!(err, SupervisorError::Panicked { ref label } if label == "boom"));
    assert_eq!(observed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stubborn_task_aborted_after_grace() {
    let supervisor = ProcessSupervisor::new(OutputMultiplexer::new(50))
        .with_grace(Duration::from_millis(50));
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let processes: Vec<Box<dyn DevProcess>> = vec![
        Box::new(FnProcess::new("stubborn", |_ctx: ProcessContext| async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        })),
        failing("bad", Duration::from_millis(5)),
    ];

    let started = Instant::now();
    let err = supervisor.run(processes, shutdown_rx).await.unwrap_err();

    assert_eq!(err.label(), "bad");
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_each_task_writes_its_own_pane() {
    let output = OutputMultiplexer::new(50);
    let supervisor = ProcessSupervisor::new(output.clone());
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let processes: Vec<Box<dyn DevProcess>> = ["checkout", "discount"]
        .into_iter()
        .map(|label| {
            Box::new(FnProcess::new(label, move |ctx: ProcessContext| async move {
                for i in 0..3 {
                    ctx.stdout.write(&format!("{label} {i}\n"));
                    tokio::task::yield_now().await;
                }
                Ok(())
            })) as Box<dyn DevProcess>
        })
        .collect();

    supervisor.run(processes, shutdown_rx).await.unwrap();

    for pane in output.snapshot() {
        assert_eq!(pane.lines.len(), 3);
        assert!(pane.lines.iter().all(|l| l.text.starts_with(&pane.label)));
    }
}
