//! Arbitration boundary behavior: bypass policy, malformed-reply fallback,
//! and the shape of the prompt.

use std::sync::Arc;

use cartograph::catalog::{ColumnMeta, ColumnRef, JoinStatistics, TableMeta};
use cartograph::classify::FeatureClassifier;
use cartograph::config::DiscoverySettings;
use cartograph::discovery::{InferenceMethod, RelationshipArbiter, RelationshipCandidate};
use cartograph::llm::ScriptedClient;
use cartograph::pipeline::stage::CancelToken;

fn int_column(name: &str) -> ColumnMeta {
    ColumnMeta {
        name: name.to_string(),
        data_type: "integer".to_string(),
        is_nullable: false,
    }
}

fn schema() -> Vec<TableMeta> {
    vec![
        TableMeta {
            schema: "public".to_string(),
            name: "orders".to_string(),
            columns: vec![int_column("id"), int_column("customer_id")],
            primary_key: vec!["id".to_string()],
            foreign_keys: vec![],
        },
        TableMeta {
            schema: "public".to_string(),
            name: "customers".to_string(),
            columns: vec![int_column("id")],
            primary_key: vec!["id".to_string()],
            foreign_keys: vec![],
        },
    ]
}

fn inferred_candidate() -> RelationshipCandidate {
    RelationshipCandidate::new(
        ColumnRef::new("public", "orders", "customer_id"),
        ColumnRef::new("public", "customers", "id"),
        InferenceMethod::ColumnFeatures,
        JoinStatistics {
            source_distinct: 50,
            target_distinct: 60,
            forward_orphans: 0,
            reverse_orphans: 10,
        },
    )
}

fn declared_candidate() -> RelationshipCandidate {
    RelationshipCandidate::new(
        ColumnRef::new("public", "orders", "customer_id"),
        ColumnRef::new("public", "customers", "id"),
        InferenceMethod::FkConstraint,
        JoinStatistics {
            source_distinct: 50,
            target_distinct: 50,
            forward_orphans: 0,
            reverse_orphans: 0,
        },
    )
}

fn arbiter(llm: Arc<ScriptedClient>) -> RelationshipArbiter {
    RelationshipArbiter::new(llm, DiscoverySettings::default(), 2)
}

#[tokio::test]
async fn test_accept_verdict_applied() {
    let llm = Arc::new(ScriptedClient::always(
        r#"{"accept": true, "confidence": 0.82, "reason": "order references its customer"}"#,
    ));
    let tables = schema();
    let profiles = FeatureClassifier::new().classify_all(&tables);

    let outcomes = arbiter(llm.clone())
        .arbitrate_all(
            vec![inferred_candidate()],
            &tables,
            &profiles,
            &CancelToken::never(),
        )
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 1);
    let o = &outcomes[0];
    assert!(o.accepted);
    assert!(!o.bypassed);
    assert!(o.warning.is_none());
    assert!((o.confidence - 0.82).abs() < 1e-9);
    assert_eq!(llm.call_count(), 1);
}

#[tokio::test]
async fn test_reject_verdict_applied() {
    let llm = Arc::new(ScriptedClient::always(
        r#"{"accept": false, "confidence": 0.1, "reason": "small sequential integers"}"#,
    ));
    let tables = schema();
    let profiles = FeatureClassifier::new().classify_all(&tables);

    let outcomes = arbiter(llm)
        .arbitrate_all(
            vec![inferred_candidate()],
            &tables,
            &profiles,
            &CancelToken::never(),
        )
        .await
        .unwrap();

    assert!(!outcomes[0].accepted);
}

#[tokio::test]
async fn test_malformed_reply_falls_back_with_warning() {
    let llm = Arc::new(ScriptedClient::always(
        "I looked carefully and I believe this is a foreign key, great question!",
    ));
    let tables = schema();
    let profiles = FeatureClassifier::new().classify_all(&tables);

    let candidate = inferred_candidate();
    let deterministic = candidate.confidence;

    let outcomes = arbiter(llm)
        .arbitrate_all(vec![candidate], &tables, &profiles, &CancelToken::never())
        .await
        .unwrap();

    let o = &outcomes[0];
    // Recoverable parse failure: warning recorded, deterministic score used
    assert!(o.accepted);
    assert!(o.verdict.is_none());
    assert!(o.warning.as_deref().unwrap().contains("unusable"));
    assert!((o.confidence - deterministic).abs() < 1e-9);
}

#[tokio::test]
async fn test_off_schema_json_falls_back() {
    let llm = Arc::new(ScriptedClient::always(
        r#"{"verdict": "yes", "score": "high"}"#,
    ));
    let tables = schema();
    let profiles = FeatureClassifier::new().classify_all(&tables);

    let outcomes = arbiter(llm)
        .arbitrate_all(
            vec![inferred_candidate()],
            &tables,
            &profiles,
            &CancelToken::never(),
        )
        .await
        .unwrap();

    assert!(outcomes[0].warning.is_some());
    assert!(outcomes[0].accepted);
}

#[tokio::test]
async fn test_high_confidence_bypasses_arbitration() {
    let llm = Arc::new(ScriptedClient::accepting());
    let tables = schema();
    let profiles = FeatureClassifier::new().classify_all(&tables);

    let candidate = declared_candidate();
    assert!(candidate.confidence >= 0.95);

    let outcomes = arbiter(llm.clone())
        .arbitrate_all(vec![candidate], &tables, &profiles, &CancelToken::never())
        .await
        .unwrap();

    assert!(outcomes[0].bypassed);
    assert!(outcomes[0].accepted);
    assert_eq!(llm.call_count(), 0);
}

#[tokio::test]
async fn test_prompt_carries_false_positive_cautions() {
    let llm = Arc::new(ScriptedClient::accepting());
    let tables = schema();
    let profiles = FeatureClassifier::new().classify_all(&tables);

    arbiter(llm.clone())
        .arbitrate_all(
            vec![inferred_candidate()],
            &tables,
            &profiles,
            &CancelToken::never(),
        )
        .await
        .unwrap();

    let prompts = llm.prompts().await;
    assert_eq!(prompts.len(), 1);
    let prompt = &prompts[0];

    // The anti-coincidence heuristics live in the prompt itself
    assert!(prompt.contains("sequential integers"));
    assert!(prompt.contains("week_number"));
    assert!(prompt.contains("coincidence"));
    // Join statistics and schema context are included
    assert!(prompt.contains("50 distinct values"));
    assert!(prompt.contains("public.orders.customer_id"));
    assert!(prompt.contains("exactly one JSON object"));
}

#[tokio::test]
async fn test_cancellation_stops_issuing_requests() {
    let llm = Arc::new(ScriptedClient::accepting());
    let tables = schema();
    let profiles = FeatureClassifier::new().classify_all(&tables);

    let (handle, token) = cartograph::pipeline::stage::cancel_pair();
    handle.cancel();

    let outcomes = arbiter(llm.clone())
        .arbitrate_all(
            vec![inferred_candidate(), inferred_candidate()],
            &tables,
            &profiles,
            &token,
        )
        .await
        .unwrap();

    assert!(outcomes.is_empty());
    assert_eq!(llm.call_count(), 0);
}
