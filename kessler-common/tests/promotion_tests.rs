//! Integration tests for batch promotion
//!
//! Covers:
//! - Batch accounting (total == applied + skipped + errors)
//! - Progress callback cadence
//! - Dry-run leaves storage untouched
//! - Candidate selection by source field, identifier list and filter
//! - Conflict pre-check and confirmation threshold
//! - Promotion persistence and override retention across later ingestion

use kessler_common::config::KesslerConfig;
use kessler_common::promotion::{
    parse_filter, CandidateSelector, FailureKind, PlanOptions, PromotionEngine, PromotionRequest,
};
use kessler_common::resolver::OverrideRetention;
use kessler_common::{EnvelopeStore, FieldMap};
use serde_json::{json, Value};
use tempfile::TempDir;

const FIXTURE_SIZE: usize = 25;
const WITH_BAND: usize = 20;

fn fields(value: Value) -> FieldMap {
    value.as_object().cloned().unwrap()
}

fn identifier(i: usize) -> String {
    format!("OBJ-{:03}", i)
}

/// 25 envelopes; the first 20 carry `kaggle.orbital_band`, every fourth one MEO
async fn seeded_store(dir: &TempDir, config: &KesslerConfig) -> EnvelopeStore {
    let store = EnvelopeStore::open(&dir.path().join("registry.db"), config)
        .await
        .unwrap();

    for i in 0..FIXTURE_SIZE {
        let payload = if i < WITH_BAND {
            let band = if i % 4 == 0 { "MEO" } else { "LEO" };
            json!({"name": format!("SAT-{}", i), "orbital_band": band})
        } else {
            json!({"name": format!("SAT-{}", i)})
        };
        store
            .upsert_source(&identifier(i), "kaggle", fields(payload))
            .await
            .unwrap();
    }
    store
}

fn band_request(config: &KesslerConfig, target: &str) -> PromotionRequest {
    PromotionRequest::new(
        "kaggle.orbital_band",
        target,
        Some("band review".into()),
        &config.sources.priority,
    )
    .unwrap()
    .with_promoted_by(config.promotion.promoted_by.clone())
}

#[tokio::test]
async fn test_batch_accounting_and_progress() {
    let dir = TempDir::new().unwrap();
    let config = KesslerConfig::default();
    let store = seeded_store(&dir, &config).await;
    let engine = PromotionEngine::new(store.clone(), config.promotion.clone());

    let mut identifiers: Vec<String> = (0..FIXTURE_SIZE).map(identifier).collect();
    identifiers.push("GHOST".into());
    let request = band_request(&config, "canonical.band_override");

    let mut ticks = Vec::new();
    let report = engine
        .promote_batch(
            &CandidateSelector::Identifiers(identifiers),
            &request,
            &PlanOptions::default(),
            |processed, total| ticks.push((processed, total)),
        )
        .await
        .unwrap();

    assert_eq!(report.total, 26);
    assert_eq!(report.applied, WITH_BAND);
    assert_eq!(report.skipped, FIXTURE_SIZE - WITH_BAND);
    assert_eq!(report.errors, 1);
    assert_eq!(report.total, report.applied + report.skipped + report.errors);
    assert_eq!(report.failures[0].identifier, "GHOST");
    assert_eq!(report.failures[0].kind, FailureKind::NotFound);
    assert!(!report.dry_run);
    assert_eq!(ticks, vec![(10, 26), (20, 26)]);

    let promoted = store.find_by_identifier(&identifier(1)).await.unwrap().unwrap();
    assert_eq!(promoted.canonical["band_override"], json!("LEO"));
    assert_eq!(promoted.metadata.transformations.len(), 1);
    assert_eq!(promoted.metadata.transformations[0].reason.as_deref(), Some("band review"));

    let skipped = store.find_by_identifier(&identifier(22)).await.unwrap().unwrap();
    assert!(skipped.canonical.get("band_override").is_none());
    assert!(skipped.metadata.transformations.is_empty());
}

#[tokio::test]
async fn test_dry_run_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let config = KesslerConfig::default();
    let store = seeded_store(&dir, &config).await;
    let engine = PromotionEngine::new(store.clone(), config.promotion.clone());

    let before = store.find_by_identifier(&identifier(0)).await.unwrap().unwrap();
    let report = engine
        .promote_batch(
            &CandidateSelector::AllWithSourceField,
            &band_request(&config, "canonical.band_override"),
            &PlanOptions {
                limit: None,
                dry_run: true,
            },
            |_, _| {},
        )
        .await
        .unwrap();

    assert!(report.dry_run);
    assert_eq!(report.total, WITH_BAND);
    assert_eq!(report.applied, WITH_BAND);
    assert_eq!(report.errors, 0);

    let after = store.find_by_identifier(&identifier(0)).await.unwrap().unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_candidate_limit() {
    let dir = TempDir::new().unwrap();
    let config = KesslerConfig::default();
    let store = seeded_store(&dir, &config).await;
    let engine = PromotionEngine::new(store, config.promotion.clone());

    let plan = engine
        .plan(
            &CandidateSelector::AllWithSourceField,
            &band_request(&config, "canonical.band_override"),
            &PlanOptions {
                limit: Some(3),
                dry_run: false,
            },
        )
        .await
        .unwrap();

    assert_eq!(plan.candidates, vec![identifier(0), identifier(1), identifier(2)]);
    assert!(!plan.requires_confirmation);
}

#[tokio::test]
async fn test_conflict_precheck_and_confirmation_threshold() {
    let dir = TempDir::new().unwrap();
    let config = KesslerConfig::default();
    let store = seeded_store(&dir, &config).await;
    let engine = PromotionEngine::new(store, config.promotion.clone());

    // canonical.orbital_band is already resolved from kaggle
    let plan = engine
        .plan(
            &CandidateSelector::AllWithSourceField,
            &band_request(&config, "canonical.orbital_band"),
            &PlanOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(plan.candidates.len(), WITH_BAND);
    assert_eq!(plan.conflicts.count, WITH_BAND);
    assert_eq!(plan.conflicts.sample.len(), config.promotion.conflict_sample_size);
    assert_eq!(plan.conflicts.sample[0], identifier(0));
    assert!(plan.requires_confirmation);

    let fresh_target = engine
        .plan(
            &CandidateSelector::AllWithSourceField,
            &band_request(&config, "canonical.band_override"),
            &PlanOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(fresh_target.conflicts.count, 0);
    assert!(fresh_target.conflicts.sample.is_empty());
}

#[tokio::test]
async fn test_filter_selector_uses_shorthand_paths() {
    let dir = TempDir::new().unwrap();
    let config = KesslerConfig::default();
    let store = seeded_store(&dir, &config).await;
    let engine = PromotionEngine::new(store, config.promotion.clone());

    let clauses = parse_filter("kaggle.orbital_band=MEO").unwrap();
    let plan = engine
        .plan(
            &CandidateSelector::Filter(clauses),
            &band_request(&config, "canonical.band_override"),
            &PlanOptions::default(),
        )
        .await
        .unwrap();

    let expected: Vec<String> = (0..WITH_BAND).filter(|i| i % 4 == 0).map(identifier).collect();
    assert_eq!(plan.candidates, expected);
}

#[tokio::test]
async fn test_ingestion_wins_reverts_supplied_promotion() {
    let dir = TempDir::new().unwrap();
    let config = KesslerConfig::default();
    let store = seeded_store(&dir, &config).await;
    let engine = PromotionEngine::new(store.clone(), config.promotion.clone());
    let target = identifier(1);

    engine
        .promote_batch(
            &CandidateSelector::Identifiers(vec![target.clone()]),
            &band_request(&config, "canonical.band"),
            &PlanOptions::default(),
            |_, _| {},
        )
        .await
        .unwrap();

    // Unrelated ingestion keeps the promotion, nothing supplies `band`
    let envelope = store
        .upsert_source(&target, "celestrak", fields(json!({"orbit": {"apogee_km": 550.0}})))
        .await
        .unwrap();
    assert_eq!(envelope.canonical["band"], json!("LEO"));

    // A source supplying the target replaces it
    let envelope = store
        .upsert_source(&target, "unoosa", fields(json!({"band": "GEO"})))
        .await
        .unwrap();
    assert_eq!(envelope.canonical["band"], json!("GEO"));
    assert_eq!(envelope.metadata.transformations.len(), 1);
}

#[tokio::test]
async fn test_sticky_retention_keeps_promotion() {
    let dir = TempDir::new().unwrap();
    let mut config = KesslerConfig::default();
    config.promotion.override_retention = OverrideRetention::Sticky;
    config.promotion.promoted_by = "ops-team".into();
    let store = seeded_store(&dir, &config).await;
    let engine = PromotionEngine::new(store.clone(), config.promotion.clone());
    let target = identifier(1);

    engine
        .promote_batch(
            &CandidateSelector::Identifiers(vec![target.clone()]),
            &band_request(&config, "canonical.band"),
            &PlanOptions::default(),
            |_, _| {},
        )
        .await
        .unwrap();

    let envelope = store
        .upsert_source(&target, "unoosa", fields(json!({"band": "GEO"})))
        .await
        .unwrap();
    assert_eq!(envelope.canonical["band"], json!("LEO"));
    assert_eq!(envelope.sources["unoosa"]["band"], json!("GEO"));
    assert_eq!(envelope.metadata.transformations[0].promoted_by, "ops-team");
}
