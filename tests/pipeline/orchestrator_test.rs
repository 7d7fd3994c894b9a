//! End-to-end pipeline execution: completion, resume, cancellation,
//! failure capture, and the week_number false-positive scenario.

use std::sync::Arc;
use std::time::Duration;

use cartograph::catalog::{ColumnMeta, FixtureCatalog, FixtureTable, TableMeta};
use cartograph::config::Settings;
use cartograph::llm::ScriptedClient;
use cartograph::pipeline::{Orchestrator, PipelineError, StageKind};
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

fn pk_table(name: &str, rows: i64) -> FixtureTable {
    FixtureTable::new(table(name, vec![int_column("id")], &["id"])).with_int_values("id", 1..=rows)
}

/// orders(customer_id) -> customers(id), one clean inferred relationship.
fn shop_catalog() -> FixtureCatalog {
    let orders = FixtureTable::new(table(
        "orders",
        vec![
            int_column("id"),
            int_column("customer_id"),
            ColumnMeta {
                name: "status".to_string(),
                data_type: "varchar".to_string(),
                is_nullable: true,
            },
        ],
        &["id"],
    ))
    .with_int_values("id", 1..=200)
    .with_int_values("customer_id", (1..=200).map(|n| n % 40 + 1))
    .with_values("status", ["open", "shipped", "closed"]);

    FixtureCatalog::new(vec![orders, pk_table("customers", 45)])
}

fn orchestrator(
    catalog: Arc<FixtureCatalog>,
    llm: Arc<ScriptedClient>,
    settings: Settings,
) -> Orchestrator {
    let store = Arc::new(ExtractionStore::open_in_memory().unwrap());
    Orchestrator::new(store, catalog, llm, settings)
}

#[tokio::test]
async fn test_full_run_completes_and_persists_relationships() {
    let catalog = Arc::new(shop_catalog());
    let llm = Arc::new(ScriptedClient::accepting());
    let orch = orchestrator(catalog.clone(), llm.clone(), Settings::default());

    let run_id = orch.start_run("shop").unwrap();
    let report = orch.wait(&run_id).await.unwrap();

    assert_eq!(report.run.status, RunStatus::Completed);
    assert!(report
        .stages
        .iter()
        .all(|s| s.status == StageStatus::Completed));
    assert!((report.overall_progress() - 1.0).abs() < 1e-9);
    assert!(report.run.current_stage.is_none());

    let rels = orch.relationships("shop").unwrap();
    assert_eq!(rels.len(), 1);
    assert_eq!(rels[0].source.column, "customer_id");
    assert_eq!(rels[0].target.table, "customers");
    // The arbitration record is part of the persisted validation snapshot
    let arb = rels[0].validation.arbitration.as_ref().unwrap();
    assert!(arb.accepted);

    assert_eq!(catalog.list_calls(), 1);
    assert!(llm.call_count() > 0);
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let catalog = Arc::new(shop_catalog());
    let llm = Arc::new(ScriptedClient::accepting());
    let orch = orchestrator(catalog.clone(), llm.clone(), Settings::default());

    let first = orch.start_run("shop").unwrap();
    orch.wait(&first).await.unwrap();
    let rels_before = orch.relationships("shop").unwrap();

    let second = orch.start_run("shop").unwrap();
    let report = orch.wait(&second).await.unwrap();

    assert_eq!(report.run.status, RunStatus::Completed);
    let rels_after = orch.relationships("shop").unwrap();
    // Idempotent upserts: same row set, no duplicates
    assert_eq!(rels_before.len(), rels_after.len());
}

#[tokio::test]
async fn test_resume_skips_completed_stages() {
    let catalog = Arc::new(shop_catalog());
    let llm = Arc::new(ScriptedClient::accepting());
    let orch = orchestrator(catalog.clone(), llm.clone(), Settings::default());

    // A first full run seeds the snapshot and artifacts for the project.
    let first = orch.start_run("shop").unwrap();
    orch.wait(&first).await.unwrap();
    assert_eq!(catalog.list_calls(), 1);

    // Simulate a run that died after its snapshot stage completed.
    let stage_names: Vec<(&str, i64)> = StageKind::ALL
        .iter()
        .map(|k| (k.name(), k.order()))
        .collect();
    let dead = orch
        .store()
        .create_run("shop", orch.owner_id(), &stage_names)
        .unwrap();
    orch.store()
        .update_stage_status(&dead.id, "snapshot", StageStatus::Completed)
        .unwrap();

    orch.resume_run(&dead.id).unwrap();
    let report = orch.wait(&dead.id).await.unwrap();

    assert_eq!(report.run.status, RunStatus::Completed);
    // The completed snapshot stage was skipped, so the catalog listing
    // count is unchanged.
    assert_eq!(catalog.list_calls(), 1);
    assert!(report
        .stages
        .iter()
        .all(|s| s.status == StageStatus::Completed));
}

#[tokio::test]
async fn test_resume_terminal_run_is_an_error() {
    let catalog = Arc::new(shop_catalog());
    let llm = Arc::new(ScriptedClient::accepting());
    let orch = orchestrator(catalog, llm, Settings::default());

    let run_id = orch.start_run("shop").unwrap();
    orch.wait(&run_id).await.unwrap();

    match orch.resume_run(&run_id) {
        Err(PipelineError::RunTerminal { status, .. }) => {
            assert_eq!(status, RunStatus::Completed);
        }
        other => panic!("expected RunTerminal, got {:?}", other.err()),
    }
}

#[tokio::test]
async fn test_cancellation_is_terminal_and_distinct_from_failure() {
    // Three below-bypass candidates and a slow collaborator give the
    // cancel request time to land mid-arbitration.
    let orders = FixtureTable::new(table(
        "orders",
        vec![
            int_column("id"),
            int_column("customer_id"),
            int_column("vendor_id"),
            int_column("product_id"),
        ],
        &["id"],
    ))
    .with_int_values("id", 1..=200)
    // Disjoint key ranges so each column matches exactly one table
    .with_int_values("customer_id", (1..=200).map(|n| n % 30 + 1))
    .with_int_values("vendor_id", (1..=200).map(|n| n % 30 + 101))
    .with_int_values("product_id", (1..=200).map(|n| n % 30 + 201));

    let customers = FixtureTable::new(table("customers", vec![int_column("id")], &["id"]))
        .with_int_values("id", 1..=30);
    let vendors = FixtureTable::new(table("vendors", vec![int_column("id")], &["id"]))
        .with_int_values("id", 101..=130);
    let products = FixtureTable::new(table("products", vec![int_column("id")], &["id"]))
        .with_int_values("id", 201..=230);

    let catalog = Arc::new(FixtureCatalog::new(vec![orders, customers, vendors, products]));

    let llm = Arc::new(ScriptedClient::accepting().with_latency(Duration::from_millis(200)));
    let mut settings = Settings::default();
    settings.pipeline.llm_concurrency = 1;
    let orch = orchestrator(catalog, llm, settings);

    let run_id = orch.start_run("shop").unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(orch.cancel(&run_id).unwrap());

    let report = orch.wait(&run_id).await.unwrap();
    assert_eq!(report.run.status, RunStatus::Cancelled);
    assert!(report.run.error.is_none());

    // Not every stage settled; the interrupted stage is pending again so a
    // future resume can re-run it in full.
    assert!(report
        .stages
        .iter()
        .any(|s| s.status == StageStatus::Pending));
    assert!(report
        .stages
        .iter()
        .all(|s| s.status != StageStatus::Running));
}

#[tokio::test]
async fn test_logic_failure_fails_stage_and_run_with_detail() {
    // The orders metadata declares customer_id, but the fixture has no
    // values for it: the statistics query fails with a non-retriable error.
    let orders = FixtureTable::new(table(
        "orders",
        vec![int_column("id"), int_column("customer_id")],
        &["id"],
    ))
    .with_int_values("id", 1..=50);

    let catalog = Arc::new(FixtureCatalog::new(vec![orders, pk_table("customers", 20)]));
    let llm = Arc::new(ScriptedClient::accepting());
    let orch = orchestrator(catalog, llm, Settings::default());

    let run_id = orch.start_run("shop").unwrap();
    let report = orch.wait(&run_id).await.unwrap();

    assert_eq!(report.run.status, RunStatus::Failed);
    let error = report.run.error.as_deref().unwrap();
    assert!(error.contains("discover"), "error was: {}", error);

    let discover = report
        .stages
        .iter()
        .find(|s| s.name == "discover")
        .unwrap();
    assert_eq!(discover.status, StageStatus::Failed);
    assert!(discover.error.is_some());
    // Earlier stage state is preserved for diagnosis
    let snapshot = report
        .stages
        .iter()
        .find(|s| s.name == "snapshot")
        .unwrap();
    assert_eq!(snapshot.status, StageStatus::Completed);
}

#[tokio::test]
async fn test_week_number_scenario_creates_no_relationships() {
    // content_posts.week_number (values 1..10) against four unrelated
    // auto-increment tables. Forward-only validation would accept all
    // four; the classifier and bidirectional checks must accept none.
    let posts = FixtureTable::new(table(
        "content_posts",
        vec![int_column("id"), int_column("week_number")],
        &["id"],
    ))
    .with_int_values("id", 1..=300)
    .with_int_values("week_number", (1..=300).map(|n| n % 10 + 1));

    let catalog = Arc::new(FixtureCatalog::new(vec![
        posts,
        pk_table("phases", 12),
        pk_table("sprints", 10),
        pk_table("milestones", 15),
        pk_table("categories", 18),
    ]));
    let llm = Arc::new(ScriptedClient::accepting());
    let orch = orchestrator(catalog, llm.clone(), Settings::default());

    let run_id = orch.start_run("cms").unwrap();
    let report = orch.wait(&run_id).await.unwrap();

    assert_eq!(report.run.status, RunStatus::Completed);
    assert!(orch.relationships("cms").unwrap().is_empty());
    // Nothing ever reached the collaborator
    assert_eq!(llm.call_count(), 0);
}

#[tokio::test]
async fn test_run_status_reports_stage_warnings() {
    // A coincidental column produces a discover-stage warning that the
    // polled status surface must expose.
    let events = FixtureTable::new(table(
        "events",
        vec![int_column("id"), int_column("entry_code")],
        &["id"],
    ))
    .with_int_values("id", 1..=500)
    .with_int_values("entry_code", (1..=500).map(|n| n % 50 + 1));

    let catalog = Arc::new(FixtureCatalog::new(vec![
        events,
        pk_table("tickets", 60),
        pk_table("sessions", 55),
        pk_table("venues", 58),
    ]));
    let llm = Arc::new(ScriptedClient::accepting());
    let orch = orchestrator(catalog, llm, Settings::default());

    let run_id = orch.start_run("evt").unwrap();
    let report = orch.wait(&run_id).await.unwrap();

    assert_eq!(report.run.status, RunStatus::Completed);
    let warnings = report.warnings();
    assert!(
        warnings.iter().any(|w| w.contains("coincidental")),
        "warnings: {:?}",
        warnings
    );
    assert!(orch.relationships("evt").unwrap().is_empty());
}
