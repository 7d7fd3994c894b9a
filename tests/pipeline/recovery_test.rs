//! Orphan detection and reclaim: exclusivity under race, reclaim-and-resume
//! after a simulated crash.

use std::sync::Arc;
use std::time::Duration;

use cartograph::catalog::{ColumnMeta, FixtureCatalog, FixtureTable, TableMeta};
use cartograph::config::Settings;
use cartograph::llm::ScriptedClient;
use cartograph::pipeline::{Orchestrator, StageKind};
use cartograph::store::{ExtractionStore, RunStatus, StageStatus};

fn int_column(name: &str) -> ColumnMeta {
    ColumnMeta {
        name: name.to_string(),
        data_type: "integer".to_string(),
        is_nullable: false,
    }
}

fn table(name: &str, columns: Vec<ColumnMeta>, pk: &[&str]) -> TableMeta {
    TableMeta {
        schema: "public".to_string(),
        name: name.to_string(),
        columns,
        primary_key: pk.iter().map(|s| s.to_string()).collect(),
        foreign_keys: vec![],
    }
}

fn shop_catalog() -> FixtureCatalog {
    let orders = FixtureTable::new(table(
        "orders",
        vec![int_column("id"), int_column("customer_id")],
        &["id"],
    ))
    .with_int_values("id", 1..=100)
    .with_int_values("customer_id", (1..=100).map(|n| n % 30 + 1));

    let customers = FixtureTable::new(table("customers", vec![int_column("id")], &["id"]))
        .with_int_values("id", 1..=35);

    FixtureCatalog::new(vec![orders, customers])
}

/// Short heartbeat policy so staleness is reachable in a test.
fn fast_settings() -> Settings {
    let mut settings = Settings::default();
    settings.pipeline.heartbeat_interval_secs = 1;
    settings.pipeline.orphan_multiplier = 2;
    settings
}

fn orchestrator_on(store: Arc<ExtractionStore>) -> Orchestrator {
    Orchestrator::new(
        store,
        Arc::new(shop_catalog()),
        Arc::new(ScriptedClient::accepting()),
        fast_settings(),
    )
}

fn all_stage_names() -> Vec<(&'static str, i64)> {
    StageKind::ALL.iter().map(|k| (k.name(), k.order())).collect()
}

/// Create a run that looks like a crashed process left it behind.
fn plant_orphan(store: &ExtractionStore, project: &str) -> String {
    let run = store
        .create_run(project, "cartograph-dead-process", &all_stage_names())
        .unwrap();
    store
        .update_run_status(&run.id, RunStatus::Running, None)
        .unwrap();
    run.id
}

#[tokio::test]
async fn test_fresh_run_is_not_an_orphan() {
    let store = Arc::new(ExtractionStore::open_in_memory().unwrap());
    let orch = orchestrator_on(store.clone());

    plant_orphan(&store, "shop");
    // Heartbeat was written at creation; not yet past the threshold.
    assert!(orch.find_orphaned().unwrap().is_empty());
}

#[tokio::test]
async fn test_stale_run_is_detected_and_reclaimed() {
    let store = Arc::new(ExtractionStore::open_in_memory().unwrap());
    let orch = orchestrator_on(store.clone());

    let run_id = plant_orphan(&store, "shop");
    tokio::time::sleep(Duration::from_millis(2500)).await;

    let orphans = orch.find_orphaned().unwrap();
    assert_eq!(orphans.len(), 1);
    assert_eq!(orphans[0].id, run_id);

    assert!(orch.reclaim_ownership(&run_id).unwrap());
    let run = store.get_run(&run_id).unwrap();
    assert_eq!(run.owner_id.as_deref(), Some(orch.owner_id()));
}

#[tokio::test]
async fn test_reclaim_race_exactly_one_winner() {
    let store = Arc::new(ExtractionStore::open_in_memory().unwrap());
    let orch_a = orchestrator_on(store.clone());
    let orch_b = orchestrator_on(store.clone());

    let run_id = plant_orphan(&store, "shop");
    tokio::time::sleep(Duration::from_millis(2500)).await;

    let (a, b) = tokio::join!(
        {
            let orch = orch_a.clone();
            let id = run_id.clone();
            tokio::task::spawn_blocking(move || orch.reclaim_ownership(&id).unwrap())
        },
        {
            let orch = orch_b.clone();
            let id = run_id.clone();
            tokio::task::spawn_blocking(move || orch.reclaim_ownership(&id).unwrap())
        },
    );

    let wins = [a.unwrap(), b.unwrap()].iter().filter(|w| **w).count();
    assert_eq!(wins, 1, "exactly one process may reclaim an orphan");
}

#[tokio::test]
async fn test_recover_resets_inflight_stage_and_completes() {
    let store = Arc::new(ExtractionStore::open_in_memory().unwrap());

    // A healthy first run seeds the project's snapshot and artifacts.
    let seed = orchestrator_on(store.clone());
    let seeded = seed.start_run("shop").unwrap();
    seed.wait(&seeded).await.unwrap();

    // A second process died mid-classify: snapshot done, classify running.
    let run_id = plant_orphan(&store, "shop");
    store
        .update_stage_status(&run_id, "snapshot", StageStatus::Completed)
        .unwrap();
    store
        .update_stage_status(&run_id, "classify", StageStatus::Running)
        .unwrap();

    tokio::time::sleep(Duration::from_millis(2500)).await;

    let recovering = orchestrator_on(store.clone());
    let reclaimed = recovering.recover_orphaned_runs().unwrap();
    assert_eq!(reclaimed, vec![run_id.clone()]);

    let report = recovering.wait(&run_id).await.unwrap();
    assert_eq!(report.run.status, RunStatus::Completed);
    assert_eq!(report.run.owner_id.as_deref(), Some(recovering.owner_id()));

    // Every stage settled; the abandoned classify stage re-ran in full.
    assert!(report
        .stages
        .iter()
        .all(|s| s.status == StageStatus::Completed));

    // Relationships were written idempotently by both runs.
    assert_eq!(store.active_relationships("shop").unwrap().len(), 1);
}

#[tokio::test]
async fn test_recover_ignores_runs_reclaimed_by_others() {
    let store = Arc::new(ExtractionStore::open_in_memory().unwrap());
    let orch_a = orchestrator_on(store.clone());
    let orch_b = orchestrator_on(store.clone());

    let run_id = plant_orphan(&store, "shop");
    tokio::time::sleep(Duration::from_millis(2500)).await;

    // B reclaims first (without resuming execution here).
    assert!(orch_b.reclaim_ownership(&run_id).unwrap());

    // A's startup recovery sees no reclaimable orphans.
    let reclaimed = orch_a.recover_orphaned_runs().unwrap();
    assert!(reclaimed.is_empty());

    let run = store.get_run(&run_id).unwrap();
    assert_eq!(run.owner_id.as_deref(), Some(orch_b.owner_id()));
}
