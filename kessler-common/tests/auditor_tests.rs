//! Integration tests for the consistency auditor
//!
//! Covers:
//! - Detection of canonical orbital data with no contributing source node
//! - Legacy drift is left in place by ordinary ingestion
//! - Repair through the normal ingestion path
//! - Idempotence: healthy envelopes stay byte-for-byte unchanged
//! - Promoted orbital fields are traced, not drift

use kessler_common::auditor::{ConsistencyAuditor, RepairOutcome};
use kessler_common::config::KesslerConfig;
use kessler_common::promotion::{promote_one, PromotionRequest};
use kessler_common::store::Mutation;
use kessler_common::{EnvelopeStore, FieldMap};
use serde_json::{json, Value};
use tempfile::TempDir;

fn fields(value: Value) -> FieldMap {
    value.as_object().cloned().unwrap()
}

async fn open_store(dir: &TempDir) -> EnvelopeStore {
    EnvelopeStore::open(&dir.path().join("registry.db"), &KesslerConfig::default())
        .await
        .unwrap()
}

/// Envelope as an early import left it: orbital data written into canonical
/// with no celestrak node recorded
async fn insert_legacy(store: &EnvelopeStore, identifier: &str) {
    store
        .upsert_source(
            identifier,
            "unoosa",
            fields(json!({"name": "ISS (ZARYA)", "international_designator": "1998-067A"})),
        )
        .await
        .unwrap();
    store
        .modify(identifier, |envelope| {
            envelope
                .canonical
                .insert("orbit".into(), json!({"apogee_km": 422.0, "inclination_deg": 51.64}));
            envelope
                .canonical
                .insert("tle".into(), json!({"line1": "1 25544U 98067A", "line2": "2 25544"}));
            Ok(Mutation::Changed(()))
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_legacy_drift_survives_unrelated_ingestion() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    insert_legacy(&store, "L").await;

    let auditor = ConsistencyAuditor::new(store.clone(), "celestrak");
    assert_eq!(auditor.scan().await.unwrap().len(), 1);

    let envelope = store
        .upsert_source("L", "kaggle", fields(json!({"orbital_band": "LEO"})))
        .await
        .unwrap();
    assert_eq!(envelope.canonical["orbit"]["apogee_km"], json!(422.0));
    assert_eq!(envelope.canonical["tle"]["line1"], json!("1 25544U 98067A"));

    let findings = auditor.scan().await.unwrap();
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].identifier, "L");
}

async fn raw_row(store: &EnvelopeStore, identifier: &str) -> (i64, String) {
    sqlx::query_as("SELECT revision, document FROM envelopes WHERE identifier = ?")
        .bind(identifier)
        .fetch_one(store.pool())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_scan_reports_legacy_drift() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    insert_legacy(&store, "1998-067A").await;
    store
        .upsert_source("HEALTHY", "celestrak", fields(json!({"orbit": {"apogee_km": 700.0}})))
        .await
        .unwrap();
    store
        .upsert_source("PLAIN", "unoosa", fields(json!({"name": "No orbit"})))
        .await
        .unwrap();

    let auditor = ConsistencyAuditor::new(store, "celestrak");
    let findings = auditor.scan().await.unwrap();

    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].identifier, "1998-067A");
    assert_eq!(findings[0].missing_source_name, "celestrak");
    assert_eq!(
        findings[0].untraced_fields,
        vec![
            "canonical.orbit.apogee_km",
            "canonical.orbit.inclination_deg",
            "canonical.tle.line1",
            "canonical.tle.line2"
        ]
    );
}

#[tokio::test]
async fn test_repair_synthesizes_source_node() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    insert_legacy(&store, "1998-067A").await;
    let auditor = ConsistencyAuditor::new(store.clone(), "celestrak");

    let outcome = auditor.repair("1998-067A", "celestrak").await.unwrap();
    assert!(matches!(outcome, RepairOutcome::Repaired(_)));

    let envelope = store.find_by_identifier("1998-067A").await.unwrap().unwrap();
    assert_eq!(
        Value::Object(envelope.sources["celestrak"].clone()),
        json!({
            "name": "ISS (ZARYA)",
            "international_designator": "1998-067A",
            "orbit": {"apogee_km": 422.0, "inclination_deg": 51.64},
            "tle": {"line1": "1 25544U 98067A", "line2": "2 25544"}
        })
    );
    assert_eq!(envelope.canonical["orbit"]["apogee_km"], json!(422.0));
    assert_eq!(envelope.canonical["name"], json!("ISS (ZARYA)"));
    assert_eq!(envelope.metadata.sources_available, vec!["unoosa", "celestrak"]);

    assert!(auditor.detect(&envelope).is_none());
    assert!(auditor.scan().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_repair_on_healthy_envelope_is_noop() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    store
        .upsert_source("HEALTHY", "celestrak", fields(json!({"orbit": {"apogee_km": 700.0}})))
        .await
        .unwrap();
    insert_legacy(&store, "1998-067A").await;
    let auditor = ConsistencyAuditor::new(store.clone(), "celestrak");

    let before = raw_row(&store, "HEALTHY").await;
    let outcome = auditor.repair("HEALTHY", "celestrak").await.unwrap();
    assert_eq!(outcome, RepairOutcome::Healthy);
    assert_eq!(raw_row(&store, "HEALTHY").await, before);

    // A repaired envelope is healthy from then on
    auditor.repair("1998-067A", "celestrak").await.unwrap();
    let repaired = raw_row(&store, "1998-067A").await;
    let again = auditor.repair("1998-067A", "celestrak").await.unwrap();
    assert_eq!(again, RepairOutcome::Healthy);
    assert_eq!(raw_row(&store, "1998-067A").await, repaired);
}

#[tokio::test]
async fn test_repair_missing_envelope() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    let auditor = ConsistencyAuditor::new(store, "celestrak");

    let outcome = auditor.repair("NOPE", "celestrak").await.unwrap();
    assert_eq!(outcome, RepairOutcome::NotFound);
}

#[tokio::test]
async fn test_repair_all_counts_and_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    insert_legacy(&store, "A").await;
    insert_legacy(&store, "B").await;
    store
        .upsert_source("C", "celestrak", fields(json!({"tle": {"line1": "1 00005U"}})))
        .await
        .unwrap();
    let auditor = ConsistencyAuditor::new(store, "celestrak");

    let first = auditor.repair_all().await.unwrap();
    assert_eq!(first.scanned, 3);
    assert_eq!(first.drifted, 2);
    assert_eq!(first.repaired, 2);
    assert_eq!(first.errors, 0);

    let second = auditor.repair_all().await.unwrap();
    assert_eq!(second.scanned, 3);
    assert_eq!(second.drifted, 0);
    assert_eq!(second.repaired, 0);
}

#[tokio::test]
async fn test_promoted_orbital_field_is_not_drift() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    let config = KesslerConfig::default();
    store
        .upsert_source("K1", "kaggle", fields(json!({"period_min": 92.7})))
        .await
        .unwrap();

    let request =
        PromotionRequest::new("kaggle.period_min", "canonical.orbit.period_min", None, &config.sources.priority)
            .unwrap();
    store
        .modify("K1", |envelope| {
            promote_one(envelope, &request);
            Ok(Mutation::Changed(()))
        })
        .await
        .unwrap();

    let auditor = ConsistencyAuditor::new(store.clone(), "celestrak");
    let envelope = store.find_by_identifier("K1").await.unwrap().unwrap();
    assert_eq!(envelope.canonical["orbit"]["period_min"], json!(92.7));
    assert!(auditor.detect(&envelope).is_none());
}
