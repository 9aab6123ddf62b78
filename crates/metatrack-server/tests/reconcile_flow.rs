//! End-to-end flow over the in-memory backend: writes enqueue, reconcilers
//! converge, shutdown drains.

use std::sync::Arc;
use std::time::Duration;

use metatrack_db_memory::InMemoryStore;
use metatrack_reconciler::{CycleReport, ReconcilerConfig, ReconcilerState, WorkerPool};
use metatrack_server::{AppConfig, MetatrackServer, ServerBuilder, ShutdownOutcome, memory_store};
use metatrack_storage::{DynStore, Row};

fn reconciler_config() -> ReconcilerConfig {
    ReconcilerConfig::default()
        .with_recurring_interval_ms(100)
        .with_resync_interval_ms(1_000)
        .with_resync_on_startup(false)
}

async fn seeded_server() -> (Arc<InMemoryStore>, MetatrackServer) {
    let store = Arc::new(memory_store());
    store
        .upsert(
            "project",
            "p1",
            Row::new()
                .with("date_updated", 10_i64)
                .with("version_number", 1_i64),
        )
        .await;
    for id in ["e1", "e2"] {
        store
            .upsert(
                "experiment",
                id,
                Row::new()
                    .with("project_id", "p1")
                    .with("date_updated", 10_i64)
                    .with("version_number", 1_i64),
            )
            .await;
    }

    let mut config = AppConfig::default();
    config.reconcilers.experiment_timestamp = reconciler_config();
    config.reconcilers.project_timestamp = reconciler_config();
    config.shutdown.timeout_secs = 5;

    let dyn_store: DynStore = store.clone();
    let server = ServerBuilder::new()
        .with_config(config)
        .with_store(dyn_store)
        .with_pool(WorkerPool::current(2))
        .build()
        .await
        .expect("server builds");
    (store, server)
}

async fn experiment(store: &InMemoryStore, id: &str) -> (i64, i64) {
    let row = store.get("experiment", id).await.expect("experiment exists");
    (
        row.get_i64("date_updated").unwrap(),
        row.get_i64("version_number").unwrap(),
    )
}

#[tokio::test(start_paused = true)]
async fn run_updates_converge_with_one_version_bump() {
    let (store, server) = seeded_server().await;
    let writer = server.writer().clone();
    let reconcilers = Arc::clone(server.reconcilers());

    let handle = tokio::spawn(server.run(std::future::pending()));
    tokio::task::yield_now().await;

    // Three run writes land between two cycles
    writer.record_run_update("r1", "e1", 200).await.unwrap();
    writer.record_run_update("r2", "e1", 350).await.unwrap();
    writer.record_run_update("r1", "e1", 300).await.unwrap();
    assert_eq!(reconcilers.experiment_reconciler().pending_len(), 1);

    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(experiment(&store, "e1").await, (350, 2));
    assert_eq!(experiment(&store, "e2").await, (10, 1));
    assert_eq!(reconcilers.pending_len(), 0);

    handle.abort();
}

#[tokio::test(start_paused = true)]
async fn project_catches_up_through_resync() {
    let (store, server) = seeded_server().await;
    let writer = server.writer().clone();
    let reconcilers = Arc::clone(server.reconcilers());
    let handle = tokio::spawn(server.run(std::future::pending()));

    writer.record_run_update("r1", "e2", 900).await.unwrap();

    // Experiment reconciled on the next cycle; the project only on resync
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(experiment(&store, "e2").await, (900, 2));
    let project = store.get("project", "p1").await.unwrap();
    assert_eq!(project.get_i64("date_updated").unwrap(), 10);

    tokio::time::sleep(Duration::from_millis(1_000)).await;
    let project = store.get("project", "p1").await.unwrap();
    assert_eq!(project.get_i64("date_updated").unwrap(), 900);
    assert_eq!(project.get_i64("version_number").unwrap(), 2);
    assert_eq!(reconcilers.pending_len(), 0);

    handle.abort();
}

#[tokio::test]
async fn failed_reconcile_never_reaches_the_writer() {
    let (store, server) = seeded_server().await;
    let writer = server.writer();
    let experiments = server.reconcilers().experiment_reconciler();

    writer.record_run_update("r1", "e1", 500).await.unwrap();
    store.fail_next_writes(1);

    assert!(matches!(
        experiments.run_cycle().await,
        CycleReport::Failed { keys: 1, .. }
    ));
    assert_eq!(experiment(&store, "e1").await, (10, 1));

    // Writes keep succeeding while reconciliation is failing
    writer
        .record_experiment_update("e2", "p1", 20)
        .await
        .unwrap();

    assert_eq!(experiments.run_resync().await.unwrap(), 1);
    assert!(matches!(
        experiments.run_cycle().await,
        CycleReport::Reconciled(_)
    ));
    assert_eq!(experiment(&store, "e1").await, (500, 2));
}

#[tokio::test]
async fn rejected_write_enqueues_nothing() {
    let (_store, server) = seeded_server().await;

    let err = server
        .writer()
        .record_run_update("r1", "missing", 100)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("missing"));
    assert_eq!(server.reconcilers().pending_len(), 0);

    // Wrong project: nothing written, nothing enqueued
    let written = server
        .writer()
        .record_experiment_update("e1", "p2", 100)
        .await
        .unwrap();
    assert_eq!(written, 0);
    assert_eq!(server.reconcilers().pending_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_every_reconciler_cleanly() {
    let (_store, server) = seeded_server().await;
    let reconcilers = Arc::clone(server.reconcilers());
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();

    let handle = tokio::spawn(server.run(async move {
        let _ = rx.await;
    }));
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(
        reconcilers.experiment_reconciler().state(),
        ReconcilerState::Scheduled
    );

    tx.send(()).unwrap();
    let outcome = handle.await.unwrap().unwrap();

    assert_eq!(outcome, ShutdownOutcome::Clean);
    assert_eq!(
        reconcilers.experiment_reconciler().state(),
        ReconcilerState::Stopped
    );
    assert_eq!(
        reconcilers.project_reconciler().state(),
        ReconcilerState::Stopped
    );
    // Pool refuses new work after shutdown
    assert!(matches!(
        reconcilers.experiment_reconciler().run_cycle().await,
        CycleReport::Shutdown
    ));
}
