//! Multi-target suppression over real collected candidates.

use cartograph::catalog::{ColumnMeta, FixtureCatalog, FixtureTable, SchemaCatalog, TableMeta};
use cartograph::classify::FeatureClassifier;
use cartograph::config::DiscoverySettings;
use cartograph::discovery::{CandidateCollector, CoincidenceFilter};
use cartograph::pipeline::stage::CancelToken;

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

#[tokio::test]
async fn test_multi_target_column_yields_zero_candidates() {
    // entry_code covers 1..50 and statistically matches the key ranges of
    // three unrelated tables. A real foreign key references exactly one
    // table; all of its candidates must go.
    let events = FixtureTable::new(table(
        "events",
        vec![int_column("id"), int_column("entry_code")],
        &["id"],
    ))
    .with_int_values("id", 1..=500)
    .with_int_values("entry_code", (1..=500).map(|n| n % 50 + 1));

    let catalog = FixtureCatalog::new(vec![
        events,
        pk_table("tickets", 60),
        pk_table("sessions", 55),
        pk_table("venues", 58),
    ]);

    let tables = catalog.list_tables("test").await.unwrap();
    let profiles = FeatureClassifier::new().classify_all(&tables);
    let settings = DiscoverySettings::default();
    let collector = CandidateCollector::new(&catalog, settings.clone());
    let candidates = collector
        .collect(&tables, &profiles, &CancelToken::never())
        .await
        .unwrap();

    // Statistics alone accepted all three targets
    assert_eq!(candidates.len(), 3);

    let outcome = CoincidenceFilter::new(settings.max_target_tables).apply(candidates);
    assert!(outcome.kept.is_empty());
    assert_eq!(outcome.suppressed.len(), 1);
    assert_eq!(outcome.suppressed[0].column.column, "entry_code");
    assert_eq!(outcome.suppressed[0].target_tables.len(), 3);
}

#[tokio::test]
async fn test_genuine_fk_survives_next_to_coincidental_column() {
    let orders = FixtureTable::new(table(
        "orders",
        vec![
            int_column("id"),
            int_column("customer_id"),
            int_column("batch_code"),
        ],
        &["id"],
    ))
    .with_int_values("id", 1..=500)
    // customer ids sit in a range only the customers table covers
    .with_int_values("customer_id", (1..=500).map(|n| n % 50 + 101))
    // batch_code 1..40 overlaps every small key range
    .with_int_values("batch_code", (1..=500).map(|n| n % 40 + 1));

    let customers = FixtureTable::new(table("customers", vec![int_column("id")], &["id"]))
        .with_int_values("id", 101..=160);

    let catalog = FixtureCatalog::new(vec![
        orders,
        customers,
        pk_table("plants", 45),
        pk_table("docks", 42),
        pk_table("carriers", 48),
    ]);

    let tables = catalog.list_tables("test").await.unwrap();
    let profiles = FeatureClassifier::new().classify_all(&tables);
    let settings = DiscoverySettings::default();
    let collector = CandidateCollector::new(&catalog, settings.clone());
    let candidates = collector
        .collect(&tables, &profiles, &CancelToken::never())
        .await
        .unwrap();

    let outcome = CoincidenceFilter::new(settings.max_target_tables).apply(candidates);

    assert_eq!(outcome.kept.len(), 1);
    assert_eq!(outcome.kept[0].source.column, "customer_id");
    assert_eq!(outcome.kept[0].target.table, "customers");
    assert_eq!(outcome.suppressed.len(), 1);
    assert_eq!(outcome.suppressed[0].column.column, "batch_code");
}
