//! Promotion engine
//!
//! Manual, audited overrides that copy a source field's value into canonical.
//!
//! A single promotion ([`promote_one`]) writes the value at the target path,
//! appends a [`Transformation`] to the envelope's audit trail, and never
//! touches source nodes. Batches are planned first ([`PromotionEngine::plan`])
//! so the caller can inspect the conflict pre-check and decide whether to ask
//! for confirmation, then executed ([`PromotionEngine::execute`]) with every
//! record processed independently.

use futures::{pin_mut, stream, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::config::PromotionConfig;
use crate::envelope::{Envelope, Transformation, CANONICAL_ROOT, SOURCES_ROOT};
use crate::field_path::{self, get_segments, set_segments, FieldPathError, SEPARATOR};
use crate::sources::SourceRegistry;
use crate::store::{EnvelopeStore, Mutation};
use crate::time;
use crate::{Error, Result};

/// Actor tag recorded when no other is configured
pub const DEFAULT_PROMOTED_BY: &str = "manual_script";

/// Expand the `<source>.field` shorthand to `sources.<source>.field`
///
/// Paths already rooted at `sources` or `canonical`, and paths whose first
/// segment is not a configured source, are returned unchanged.
pub fn normalize_field_path(path: &str, registry: &SourceRegistry) -> String {
    match path.split_once(SEPARATOR) {
        Some((head, _)) if head != SOURCES_ROOT && head != CANONICAL_ROOT && registry.contains(head) => {
            format!("{}{}{}", SOURCES_ROOT, SEPARATOR, path)
        }
        _ => path.to_string(),
    }
}

/// A validated source → target promotion
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromotionRequest {
    source_field: String,
    target_field: String,
    reason: Option<String>,
    promoted_by: String,
    #[serde(skip)]
    source_name: String,
    #[serde(skip)]
    source_segments: Vec<String>,
    #[serde(skip)]
    target_segments: Vec<String>,
}

impl PromotionRequest {
    /// Validate and normalize both paths
    ///
    /// The source must be `sources.<name>.<field…>` and the target
    /// `canonical.<field…>` after shorthand expansion.
    pub fn new(
        source_field: &str,
        target_field: &str,
        reason: Option<String>,
        registry: &SourceRegistry,
    ) -> std::result::Result<Self, FieldPathError> {
        field_path::validate_field_path(source_field)?;
        field_path::validate_field_path(target_field)?;

        let source_field = normalize_field_path(source_field, registry);
        let target_field = normalize_field_path(target_field, registry);

        let source_parts = field_path::split(&source_field)?;
        if source_parts[0] != SOURCES_ROOT {
            return Err(FieldPathError::WrongRoot {
                path: source_field,
                expected: SOURCES_ROOT,
            });
        }
        if source_parts.len() < 3 {
            return Err(FieldPathError::MissingField(source_field));
        }

        let target_parts = field_path::split(&target_field)?;
        if target_parts[0] != CANONICAL_ROOT {
            return Err(FieldPathError::WrongRoot {
                path: target_field,
                expected: CANONICAL_ROOT,
            });
        }
        if target_parts.len() < 2 {
            return Err(FieldPathError::MissingField(target_field));
        }

        let source_name = source_parts[1].to_string();
        if !registry.contains(&source_name) {
            warn!(source = source_name.as_str(), "Promoting from a source outside the priority list");
        }

        let source_segments = source_parts[2..].iter().map(|s| s.to_string()).collect();
        let target_segments = target_parts[1..].iter().map(|s| s.to_string()).collect();

        Ok(Self {
            source_field,
            target_field,
            reason: reason.filter(|r| !r.trim().is_empty()),
            promoted_by: DEFAULT_PROMOTED_BY.to_string(),
            source_name,
            source_segments,
            target_segments,
        })
    }

    /// Override the actor tag written to the audit trail
    pub fn with_promoted_by(mut self, promoted_by: impl Into<String>) -> Self {
        self.promoted_by = promoted_by.into();
        self
    }

    pub fn source_field(&self) -> &str {
        &self.source_field
    }

    pub fn target_field(&self) -> &str {
        &self.target_field
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn promoted_by(&self) -> &str {
        &self.promoted_by
    }

    /// Value at the source path, `None` when absent or null
    pub fn source_value<'a>(&self, envelope: &'a Envelope) -> Option<&'a Value> {
        envelope
            .sources
            .get(&self.source_name)
            .and_then(|fields| get_segments(fields, &self.source_segments))
            .filter(|value| !value.is_null())
    }

    /// Value currently at the target path, `None` when absent or null
    pub fn target_value<'a>(&self, envelope: &'a Envelope) -> Option<&'a Value> {
        get_segments(&envelope.canonical, &self.target_segments).filter(|value| !value.is_null())
    }
}

/// Why a promotion did nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    SourceFieldAbsent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PromotionOutcome {
    Applied,
    Skipped(SkipReason),
}

/// Apply one promotion to an in-memory envelope
pub fn promote_one(envelope: &mut Envelope, request: &PromotionRequest) -> PromotionOutcome {
    let Some(value) = request.source_value(envelope).cloned() else {
        debug!(
            identifier = envelope.identifier.as_str(),
            path = request.source_field(),
            "Source field absent, skipping"
        );
        return PromotionOutcome::Skipped(SkipReason::SourceFieldAbsent);
    };

    let now = time::now();
    if set_segments(&mut envelope.canonical, &request.target_segments, value.clone()) {
        warn!(
            identifier = envelope.identifier.as_str(),
            path = request.target_field(),
            "Promotion replaced a non-map value on the target path"
        );
    }

    envelope.metadata.transformations.push(Transformation {
        timestamp: now,
        source_field: request.source_field.clone(),
        target_field: request.target_field.clone(),
        value,
        reason: request.reason.clone(),
        promoted_by: request.promoted_by.clone(),
    });
    envelope.metadata.last_updated_at = now;

    PromotionOutcome::Applied
}

/// One `path=value` equality clause
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterClause {
    pub path: String,
    pub value: Value,
    raw: String,
}

impl FilterClause {
    /// True when the document value at `path` equals the clause value
    ///
    /// Numbers compare numerically, and a string equal to the raw clause
    /// text also matches (so `"1"` in a document matches `x=1`).
    pub fn matches(&self, document: &serde_json::Map<String, Value>) -> bool {
        let Ok(Some(actual)) = field_path::get(document, &self.path) else {
            return false;
        };
        if *actual == self.value {
            return true;
        }
        if let (Some(a), Some(b)) = (actual.as_f64(), self.value.as_f64()) {
            if actual.is_number() && self.value.is_number() && a == b {
                return true;
            }
        }
        actual.as_str() == Some(self.raw.as_str())
    }
}

/// Parse `a=b,c=1` into equality clauses
///
/// Values that parse as integers or finite floats become numbers, everything
/// else stays a string. An empty filter yields no clauses.
pub fn parse_filter(text: &str) -> Result<Vec<FilterClause>> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(Vec::new());
    }

    text.split(',')
        .map(|pair| {
            let Some((path, raw)) = pair.split_once('=') else {
                return Err(Error::InvalidInput(format!(
                    "filter clause '{}' is not of the form path=value",
                    pair.trim()
                )));
            };
            let path = path.trim();
            let raw = raw.trim();
            field_path::validate_field_path(path)?;
            Ok(FilterClause {
                path: path.to_string(),
                value: coerce_filter_value(raw),
                raw: raw.to_string(),
            })
        })
        .collect()
}

fn coerce_filter_value(raw: &str) -> Value {
    if let Ok(integer) = raw.parse::<i64>() {
        return Value::from(integer);
    }
    if let Some(number) = raw.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
        return Value::Number(number);
    }
    Value::String(raw.to_string())
}

/// How a batch chooses its envelopes
#[derive(Debug, Clone, PartialEq)]
pub enum CandidateSelector {
    /// Every envelope holding a non-null value at the source path
    AllWithSourceField,
    /// Exactly these identifiers, in the given order
    Identifiers(Vec<String>),
    /// Envelopes holding the source field whose document matches every clause
    Filter(Vec<FilterClause>),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanOptions {
    /// Cap on the number of candidates
    pub limit: Option<usize>,
    pub dry_run: bool,
}

/// Candidates that already hold a value at the target path
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConflictSummary {
    pub count: usize,
    /// First few conflicting identifiers, for the confirmation prompt
    pub sample: Vec<String>,
}

/// A resolved batch, ready for confirmation and execution
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchPlan {
    pub request: PromotionRequest,
    pub candidates: Vec<String>,
    /// Explicitly requested identifiers with no envelope
    pub missing: Vec<String>,
    pub conflicts: ConflictSummary,
    pub requires_confirmation: bool,
    pub dry_run: bool,
}

impl BatchPlan {
    pub fn total(&self) -> usize {
        self.candidates.len() + self.missing.len()
    }
}

/// Per-record failure classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Storage,
    NotFound,
    Conflict,
    Serialization,
    Other,
}

impl FailureKind {
    pub fn classify(error: &Error) -> Self {
        match error {
            Error::Database(_) | Error::Io(_) => FailureKind::Storage,
            Error::NotFound(_) => FailureKind::NotFound,
            Error::RevisionConflict { .. } => FailureKind::Conflict,
            Error::Serialization(_) => FailureKind::Serialization,
            _ => FailureKind::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordFailure {
    pub identifier: String,
    pub kind: FailureKind,
    pub message: String,
}

/// Outcome of a batch promotion
///
/// `total == applied + skipped + errors` holds for every report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub applied: usize,
    pub skipped: usize,
    pub errors: usize,
    pub dry_run: bool,
    pub failures: Vec<RecordFailure>,
}

impl BatchReport {
    fn record_failure(&mut self, identifier: &str, kind: FailureKind, message: String) {
        self.errors += 1;
        self.failures.push(RecordFailure {
            identifier: identifier.to_string(),
            kind,
            message,
        });
    }

    /// Batch completed but some records failed
    pub fn is_partial_failure(&self) -> bool {
        self.errors > 0
    }
}

/// Batch promotion over an [`EnvelopeStore`]
pub struct PromotionEngine {
    store: EnvelopeStore,
    config: PromotionConfig,
}

impl PromotionEngine {
    pub fn new(store: EnvelopeStore, config: PromotionConfig) -> Self {
        Self { store, config }
    }

    /// Resolve candidates and run the conflict pre-check
    ///
    /// Reads only. Storage failures while selecting candidates are fatal;
    /// a document that fails to decode during a scan is skipped.
    pub async fn plan(
        &self,
        selector: &CandidateSelector,
        request: &PromotionRequest,
        options: &PlanOptions,
    ) -> Result<BatchPlan> {
        let limit = options.limit.unwrap_or(usize::MAX);
        let mut candidates: Vec<String> = Vec::new();
        let mut missing: Vec<String> = Vec::new();
        let mut conflicts = ConflictSummary::default();

        let mut accept = |envelope: &Envelope, candidates: &mut Vec<String>| {
            if request.target_value(envelope).is_some() {
                conflicts.count += 1;
                if conflicts.sample.len() < self.config.conflict_sample_size {
                    conflicts.sample.push(envelope.identifier.clone());
                }
            }
            candidates.push(envelope.identifier.clone());
        };

        match selector {
            CandidateSelector::Identifiers(identifiers) => {
                let mut seen = HashSet::new();
                for identifier in identifiers {
                    if candidates.len() >= limit {
                        break;
                    }
                    if !seen.insert(identifier.as_str()) {
                        continue;
                    }
                    match self.store.find_by_identifier(identifier).await? {
                        Some(envelope) => accept(&envelope, &mut candidates),
                        None => {
                            warn!(identifier = identifier.as_str(), "Requested envelope not found");
                            missing.push(identifier.clone());
                        }
                    }
                }
            }
            CandidateSelector::AllWithSourceField | CandidateSelector::Filter(_) => {
                let clauses: Vec<FilterClause> = match selector {
                    CandidateSelector::Filter(clauses) => clauses
                        .iter()
                        .map(|clause| FilterClause {
                            path: normalize_field_path(&clause.path, self.store.registry()),
                            ..clause.clone()
                        })
                        .collect(),
                    _ => Vec::new(),
                };

                let envelopes = self.store.scan_all();
                pin_mut!(envelopes);
                while candidates.len() < limit {
                    let Some(item) = envelopes.next().await else {
                        break;
                    };
                    let envelope = match item {
                        Ok(envelope) => envelope,
                        Err(e) if e.is_storage() => return Err(e),
                        Err(_) => continue,
                    };

                    if request.source_value(&envelope).is_none() {
                        continue;
                    }
                    let selected = clauses.is_empty() || {
                        let Value::Object(document) = envelope.to_document()? else {
                            continue;
                        };
                        clauses.iter().all(|clause| clause.matches(&document))
                    };
                    if selected {
                        accept(&envelope, &mut candidates);
                    }
                }
            }
        }

        let requires_confirmation = candidates.len() > self.config.confirmation_threshold;
        info!(
            candidates = candidates.len(),
            missing = missing.len(),
            conflicts = conflicts.count,
            source = request.source_field(),
            target = request.target_field(),
            "Planned promotion batch"
        );

        Ok(BatchPlan {
            request: request.clone(),
            candidates,
            missing,
            conflicts,
            requires_confirmation,
            dry_run: options.dry_run,
        })
    }

    /// Process every candidate of `plan`
    ///
    /// Never aborts on a single record. `progress` receives
    /// `(processed, total)` every `progress_interval` records.
    pub async fn execute<P>(&self, plan: &BatchPlan, mut progress: P) -> BatchReport
    where
        P: FnMut(usize, usize),
    {
        let total = plan.total();
        let interval = self.config.progress_interval.max(1);
        let mut report = BatchReport {
            total,
            dry_run: plan.dry_run,
            ..Default::default()
        };
        let mut processed = 0usize;

        let mut tick = |processed: usize| {
            if processed % interval == 0 {
                progress(processed, total);
            }
        };

        for identifier in &plan.missing {
            report.record_failure(identifier, FailureKind::NotFound, "envelope not found".to_string());
            processed += 1;
            tick(processed);
        }

        let request = &plan.request;
        let dry_run = plan.dry_run;
        let results = stream::iter(plan.candidates.iter())
            .map(|identifier| async move {
                let outcome = self.process_record(identifier, request, dry_run).await;
                (identifier, outcome)
            })
            .buffer_unordered(self.config.workers.max(1));
        pin_mut!(results);

        while let Some((identifier, outcome)) = results.next().await {
            match outcome {
                Ok(Some(PromotionOutcome::Applied)) => report.applied += 1,
                Ok(Some(PromotionOutcome::Skipped(_))) => report.skipped += 1,
                Ok(None) => {
                    warn!(identifier = identifier.as_str(), "Envelope disappeared during batch");
                    report.record_failure(identifier, FailureKind::NotFound, "envelope not found".to_string());
                }
                Err(e) => {
                    warn!(identifier = identifier.as_str(), "Promotion failed: {}", e);
                    report.record_failure(identifier, FailureKind::classify(&e), e.to_string());
                }
            }
            processed += 1;
            tick(processed);
        }

        report.failures.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        info!(
            total = report.total,
            applied = report.applied,
            skipped = report.skipped,
            errors = report.errors,
            dry_run = report.dry_run,
            "Promotion batch finished"
        );
        report
    }

    /// Plan and execute in one step, without confirmation
    pub async fn promote_batch<P>(
        &self,
        selector: &CandidateSelector,
        request: &PromotionRequest,
        options: &PlanOptions,
        progress: P,
    ) -> Result<BatchReport>
    where
        P: FnMut(usize, usize),
    {
        let plan = self.plan(selector, request, options).await?;
        Ok(self.execute(&plan, progress).await)
    }

    async fn process_record(
        &self,
        identifier: &str,
        request: &PromotionRequest,
        dry_run: bool,
    ) -> Result<Option<PromotionOutcome>> {
        if dry_run {
            let Some(mut preview) = self.store.find_by_identifier(identifier).await? else {
                return Ok(None);
            };
            return Ok(Some(promote_one(&mut preview, request)));
        }

        self.store
            .modify(identifier, |envelope| {
                Ok(match promote_one(envelope, request) {
                    PromotionOutcome::Applied => Mutation::Changed(PromotionOutcome::Applied),
                    skipped => Mutation::Unchanged(skipped),
                })
            })
            .await
    }
}
