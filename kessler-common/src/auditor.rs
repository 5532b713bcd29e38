//! Consistency auditor
//!
//! Finds envelopes whose canonical orbital data (`orbit.*`, `tle.*`) cannot be
//! traced to any source node, the pattern left behind when an early import
//! wrote a provider's values straight into canonical without recording the
//! provider's own node. Repair synthesizes that node from canonical and
//! routes it through [`EnvelopeStore::upsert_source`] like any other
//! ingestion.

use futures::{pin_mut, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::envelope::{Envelope, FieldMap, CANONICAL_ROOT};
use crate::field_path::{self, get_segments, is_present, leaf_paths};
use crate::resolver::{derive, OverrideRetention};
use crate::store::EnvelopeStore;
use crate::Result;

/// Canonical subtrees carrying orbital data
pub const ORBITAL_ROOTS: [&str; 2] = ["orbit", "tle"];

/// Identity fields copied into a synthesized source node
const IDENTITY_FIELDS: [&str; 2] = ["name", "international_designator"];

const PROGRESS_INTERVAL: u64 = 500;

/// Finding for one drifted envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriftReport {
    pub identifier: String,
    pub missing_source_name: String,
    /// Canonical paths no source or promotion accounts for
    pub untraced_fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairOutcome {
    Repaired(DriftReport),
    /// No drift on the current envelope; nothing was written
    Healthy,
    NotFound,
}

/// Counters for a full scan-and-repair pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    pub scanned: u64,
    pub drifted: u64,
    pub repaired: u64,
    pub errors: u64,
}

/// Source node rebuilt from canonical: identity fields plus the orbital subtrees
pub fn synthesize_source_fields(envelope: &Envelope) -> FieldMap {
    let mut fields = FieldMap::new();
    for key in IDENTITY_FIELDS.iter().chain(ORBITAL_ROOTS.iter()) {
        if let Some(value) = envelope.canonical.get(*key).filter(|v| is_present(v)) {
            fields.insert(key.to_string(), value.clone());
        }
    }
    fields
}

pub struct ConsistencyAuditor {
    store: EnvelopeStore,
    expected_source: String,
}

impl ConsistencyAuditor {
    /// `expected_source` is the provider that should own canonical orbital data
    pub fn new(store: EnvelopeStore, expected_source: impl Into<String>) -> Self {
        Self {
            store,
            expected_source: expected_source.into(),
        }
    }

    pub fn expected_source(&self) -> &str {
        &self.expected_source
    }

    /// Drift check on one envelope; pure
    pub fn detect(&self, envelope: &Envelope) -> Option<DriftReport> {
        detect_missing_source(envelope, &self.expected_source, &self.store)
    }

    /// Drift findings over the whole store, in insertion order
    pub async fn scan(&self) -> Result<Vec<DriftReport>> {
        let envelopes = self.store.scan_all();
        pin_mut!(envelopes);

        let mut findings = Vec::new();
        while let Some(item) = envelopes.next().await {
            match item {
                Ok(envelope) => findings.extend(self.detect(&envelope)),
                Err(e) if e.is_storage() => return Err(e),
                Err(_) => continue,
            }
        }

        info!(drifted = findings.len(), "Consistency scan finished");
        Ok(findings)
    }

    /// Heal one envelope if it is still drifted
    ///
    /// Drift is re-detected on the current stored envelope, so a healthy
    /// envelope is never rewritten.
    pub async fn repair(&self, identifier: &str, missing_source_name: &str) -> Result<RepairOutcome> {
        let Some(envelope) = self.store.find_by_identifier(identifier).await? else {
            return Ok(RepairOutcome::NotFound);
        };

        let Some(report) = detect_missing_source(&envelope, missing_source_name, &self.store) else {
            debug!(identifier, "No drift, leaving envelope untouched");
            return Ok(RepairOutcome::Healthy);
        };

        let fields = synthesize_source_fields(&envelope);
        self.store
            .upsert_source(identifier, missing_source_name, fields)
            .await?;

        info!(
            identifier,
            source = missing_source_name,
            fields = report.untraced_fields.len(),
            "Repaired missing source node"
        );
        Ok(RepairOutcome::Repaired(report))
    }

    /// Scan and repair everything; per-record failures are counted
    pub async fn repair_all(&self) -> Result<AuditReport> {
        let envelopes = self.store.scan_all();
        pin_mut!(envelopes);

        let mut report = AuditReport::default();
        while let Some(item) = envelopes.next().await {
            report.scanned += 1;
            if report.scanned % PROGRESS_INTERVAL == 0 {
                info!(
                    scanned = report.scanned,
                    repaired = report.repaired,
                    "Consistency repair progress"
                );
            }

            let envelope = match item {
                Ok(envelope) => envelope,
                Err(e) if e.is_storage() => return Err(e),
                Err(_) => {
                    report.errors += 1;
                    continue;
                }
            };

            let Some(finding) = self.detect(&envelope) else {
                continue;
            };
            report.drifted += 1;

            match self.repair(&finding.identifier, &finding.missing_source_name).await {
                Ok(RepairOutcome::Repaired(_)) => report.repaired += 1,
                Ok(RepairOutcome::Healthy) => {}
                Ok(RepairOutcome::NotFound) => {
                    warn!(identifier = finding.identifier.as_str(), "Envelope vanished before repair");
                    report.errors += 1;
                }
                Err(e) => {
                    warn!(identifier = finding.identifier.as_str(), "Repair failed: {}", e);
                    report.errors += 1;
                }
            }
        }

        info!(
            scanned = report.scanned,
            drifted = report.drifted,
            repaired = report.repaired,
            errors = report.errors,
            "Consistency repair finished"
        );
        Ok(report)
    }
}

fn detect_missing_source(
    envelope: &Envelope,
    expected_source: &str,
    store: &EnvelopeStore,
) -> Option<DriftReport> {
    if envelope.sources.contains_key(expected_source) {
        return None;
    }

    let orbital = orbital_leaves(&envelope.canonical);
    if orbital.is_empty() {
        return None;
    }

    // Traced when either retention policy reproduces the value.
    let transformations = &envelope.metadata.transformations;
    let replays = [OverrideRetention::IngestionWins, OverrideRetention::Sticky]
        .map(|retention| derive(&envelope.sources, transformations, store.registry(), retention).canonical);

    let untraced_fields: Vec<String> = orbital
        .into_iter()
        .filter(|(path, value)| {
            !replays
                .iter()
                .any(|canonical| get_segments(canonical, path) == Some(*value))
        })
        .map(|(path, _)| {
            let mut full = vec![CANONICAL_ROOT.to_string()];
            full.extend(path);
            field_path::join(&full)
        })
        .collect();

    if untraced_fields.is_empty() {
        return None;
    }

    Some(DriftReport {
        identifier: envelope.identifier.clone(),
        missing_source_name: expected_source.to_string(),
        untraced_fields,
    })
}

/// Present leaves under the orbital roots, as canonical-relative segments
fn orbital_leaves(canonical: &FieldMap) -> Vec<(Vec<String>, &Value)> {
    let mut leaves = Vec::new();
    for root in ORBITAL_ROOTS {
        match canonical.get(root) {
            Some(Value::Object(subtree)) => {
                for mut path in leaf_paths(subtree) {
                    path.insert(0, root.to_string());
                    if let Some(value) = get_segments(canonical, &path).filter(|v| is_present(v)) {
                        leaves.push((path, value));
                    }
                }
            }
            Some(value) if is_present(value) => leaves.push((vec![root.to_string()], value)),
            _ => {}
        }
    }
    leaves
}
