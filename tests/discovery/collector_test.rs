//! Candidate collection against fixture schemas: bidirectional join
//! validation, ordinal exclusion, and declared-constraint handling.

use cartograph::catalog::{
    ColumnMeta, ColumnRef, FixtureCatalog, FixtureTable, ForeignKeyMeta, SchemaCatalog, TableMeta,
};
use cartograph::classify::FeatureClassifier;
use cartograph::config::DiscoverySettings;
use cartograph::discovery::{CandidateCollector, InferenceMethod};
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

async fn collect(
    catalog: &FixtureCatalog,
) -> Vec<cartograph::discovery::RelationshipCandidate> {
    let tables = catalog.list_tables("test").await.unwrap();
    let profiles = FeatureClassifier::new().classify_all(&tables);
    let collector = CandidateCollector::new(catalog, DiscoverySettings::default());
    collector
        .collect(&tables, &profiles, &CancelToken::never())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_clean_foreign_key_accepted() {
    let orders = FixtureTable::new(table(
        "orders",
        vec![int_column("id"), int_column("customer_id")],
        &["id"],
    ))
    .with_int_values("id", 1..=100)
    .with_int_values("customer_id", (1..=100).map(|n| n % 20 + 1));
    let catalog = FixtureCatalog::new(vec![orders, pk_table("customers", 25)]);

    let candidates = collect(&catalog).await;

    assert_eq!(candidates.len(), 1);
    let c = &candidates[0];
    assert_eq!(c.source.column, "customer_id");
    assert_eq!(c.target.table, "customers");
    assert_eq!(c.method, InferenceMethod::ColumnFeatures);
    assert!(c.confidence >= 0.7, "got {}", c.confidence);
}

#[tokio::test]
async fn test_join_validation_symmetry() {
    // status_code is reference-shaped and forward-matches customers
    // perfectly, but only because {1,2,3} sits inside any auto-increment
    // range. The reverse direction must reject it.
    let orders = FixtureTable::new(table(
        "orders",
        vec![int_column("id"), int_column("status_code")],
        &["id"],
    ))
    .with_int_values("id", 1..=100)
    .with_int_values("status_code", (1..=100).map(|n| n % 3 + 1));
    let catalog = FixtureCatalog::new(vec![orders, pk_table("customers", 25)]);

    let candidates = collect(&catalog).await;

    assert!(
        candidates.is_empty(),
        "low-cardinality enum must not match an auto-increment key: {:?}",
        candidates
    );
}

#[tokio::test]
async fn test_ordinal_column_never_queried() {
    // week_number values 1..10 would forward-match every PK below; the
    // classifier must keep it out of candidate generation entirely.
    let posts = FixtureTable::new(table(
        "content_posts",
        vec![int_column("id"), int_column("week_number")],
        &["id"],
    ))
    .with_int_values("id", 1..=200)
    .with_int_values("week_number", (1..=200).map(|n| n % 10 + 1));

    let catalog = FixtureCatalog::new(vec![
        posts,
        pk_table("phases", 12),
        pk_table("sprints", 10),
        pk_table("milestones", 15),
        pk_table("categories", 18),
    ]);

    let candidates = collect(&catalog).await;

    assert!(candidates.is_empty());
    // Not a single statistics query was spent on the ordinal column.
    assert_eq!(catalog.join_calls(), 0);
}

#[tokio::test]
async fn test_declared_fk_with_nonstandard_naming() {
    let mut purchases_meta = table(
        "purchases",
        vec![int_column("id"), int_column("buyer")],
        &["id"],
    );
    purchases_meta.foreign_keys.push(ForeignKeyMeta {
        name: "fk_purchases_buyer".to_string(),
        columns: vec!["buyer".to_string()],
        referenced_schema: "public".to_string(),
        referenced_table: "users".to_string(),
        referenced_columns: vec!["id".to_string()],
    });
    let purchases = FixtureTable::new(purchases_meta)
        .with_int_values("id", 1..=60)
        .with_int_values("buyer", (1..=60).map(|n| n % 30 + 1));

    let catalog = FixtureCatalog::new(vec![purchases, pk_table("users", 30)]);
    let candidates = collect(&catalog).await;

    let buyer = candidates
        .iter()
        .find(|c| c.source.column == "buyer")
        .expect("declared FK should surface despite naming");
    assert_eq!(buyer.method, InferenceMethod::FkConstraint);
    assert_eq!(buyer.target, ColumnRef::new("public", "users", "id"));
    assert!(buyer.confidence > 0.9);
}

#[tokio::test]
async fn test_forward_orphans_reject() {
    // Half the source values don't exist in the target.
    let orders = FixtureTable::new(table(
        "orders",
        vec![int_column("id"), int_column("customer_id")],
        &["id"],
    ))
    .with_int_values("id", 1..=100)
    .with_int_values("customer_id", 1..=50);
    let catalog = FixtureCatalog::new(vec![orders, pk_table("customers", 25)]);

    let candidates = collect(&catalog).await;
    assert!(candidates.is_empty());
}

#[tokio::test]
async fn test_candidates_ordered_by_confidence() {
    let orders = FixtureTable::new(table(
        "orders",
        vec![
            int_column("id"),
            int_column("customer_id"),
            int_column("carrier_ref"),
        ],
        &["id"],
    ))
    .with_int_values("id", 1..=100)
    // Full coverage of customers, name match: high confidence
    .with_int_values("customer_id", (1..=100).map(|n| n % 40 + 1))
    // Partial coverage of carriers, no name match against "shippers"
    .with_int_values("carrier_ref", (1..=100).map(|n| n % 30 + 1));

    let catalog = FixtureCatalog::new(vec![
        orders,
        pk_table("customers", 40),
        pk_table("shippers", 45),
    ]);

    let candidates = collect(&catalog).await;
    assert!(candidates.len() >= 2);
    for pair in candidates.windows(2) {
        assert!(pair[0].confidence >= pair[1].confidence);
    }
}
