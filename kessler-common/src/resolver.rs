//! Canonical resolver
//!
//! Field-wise resolution of the canonical view from source nodes:
//! - every leaf path present in any source is resolved independently
//! - for each path, the highest-priority source holding a present value wins
//! - `null` and `""` count as "does not have this field"
//!
//! [`resolve`] is pure and deterministic. [`derive`] and [`recompute`] add
//! promotion replay on top so manual overrides follow the configured
//! [`OverrideRetention`]; [`recompute`] patches an existing canonical view
//! rather than rebuilding it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};

use crate::envelope::{FieldMap, Transformation, CANONICAL_ROOT};
use crate::field_path::{self, get_segments, is_present, leaf_paths, remove_segments, set_segments};
use crate::sources::SourceRegistry;

/// What happens to a promoted canonical field when a later ingestion
/// supplies the same path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideRetention {
    /// Source data replaces the promotion; the reversion is reported
    #[default]
    IngestionWins,
    /// Promotions always take precedence over source data
    Sticky,
}

/// Result of [`derive`] and [`recompute`]
#[derive(Debug, Clone, PartialEq)]
pub struct Recomputed {
    pub canonical: FieldMap,
    /// Promotion targets whose promoted value was replaced by source data
    pub reverted: Vec<String>,
}

/// Resolve the canonical view from source nodes
pub fn resolve(sources: &BTreeMap<String, FieldMap>, registry: &SourceRegistry) -> FieldMap {
    let order = registry.order_sources(sources.keys().map(String::as_str));
    let contributors: Vec<&FieldMap> = order.iter().filter_map(|name| sources.get(name)).collect();

    // Discover paths walking contributors by priority so the most
    // authoritative source also decides iteration order.
    let mut seen: HashSet<Vec<String>> = HashSet::new();
    let mut paths: Vec<Vec<String>> = Vec::new();
    for fields in &contributors {
        for path in leaf_paths(fields) {
            if seen.insert(path.clone()) {
                paths.push(path);
            }
        }
    }

    let mut canonical = Map::new();
    for path in &paths {
        if is_shadowed(&canonical, path) {
            continue;
        }

        let winner = contributors
            .iter()
            .filter_map(|fields| get_segments(fields, path))
            .find(|value| is_present(value) && !value.is_object());

        if let Some(value) = winner {
            set_segments(&mut canonical, path, value.clone());
        }
    }

    canonical
}

/// Resolve from scratch, then replay promotions according to `retention`
///
/// The canonical view the current sources and transformations alone would
/// produce. Fields they do not explain are absent.
pub fn derive(
    sources: &BTreeMap<String, FieldMap>,
    transformations: &[Transformation],
    registry: &SourceRegistry,
    retention: OverrideRetention,
) -> Recomputed {
    let resolved = resolve(sources, registry);
    replay(resolved.clone(), &resolved, transformations, retention)
}

/// Patch an existing canonical view after a source changed
///
/// Starts from `canonical`, drops leaves that `previously_resolved` supplied
/// and the current sources no longer supply, overwrites every leaf the
/// current sources resolve, then replays promotions. Canonical paths no
/// source has ever supplied are left as they are.
pub fn recompute(
    canonical: &FieldMap,
    previously_resolved: &FieldMap,
    sources: &BTreeMap<String, FieldMap>,
    transformations: &[Transformation],
    registry: &SourceRegistry,
    retention: OverrideRetention,
) -> Recomputed {
    let resolved = resolve(sources, registry);
    let mut patched = canonical.clone();

    for path in leaf_paths(previously_resolved) {
        if !is_occupied(&resolved, &path) {
            remove_segments(&mut patched, &path);
        }
    }
    for path in leaf_paths(&resolved) {
        if let Some(value) = get_segments(&resolved, &path) {
            set_segments(&mut patched, &path, value.clone());
        }
    }

    replay(patched, &resolved, transformations, retention)
}

fn replay(
    mut canonical: FieldMap,
    resolved: &FieldMap,
    transformations: &[Transformation],
    retention: OverrideRetention,
) -> Recomputed {
    // Last promotion per target decides what a reversion is measured against.
    let mut last_promoted: BTreeMap<&str, &Value> = BTreeMap::new();

    for transformation in transformations {
        let Some(segments) = canonical_segments(&transformation.target_field) else {
            continue;
        };

        let supplied = is_occupied(resolved, &segments);
        if supplied && retention == OverrideRetention::IngestionWins {
            last_promoted.insert(&transformation.target_field, &transformation.value);
            continue;
        }
        set_segments(&mut canonical, &segments, transformation.value.clone());
    }

    let reverted = last_promoted
        .into_iter()
        .filter(|(target, promoted)| {
            canonical_segments(target)
                .and_then(|segments| get_segments(resolved, &segments).cloned())
                .as_ref()
                != Some(*promoted)
        })
        .map(|(target, _)| target.to_string())
        .collect();

    Recomputed { canonical, reverted }
}

/// Split a `canonical.`-rooted path into canonical-relative segments
pub(crate) fn canonical_segments(target_field: &str) -> Option<Vec<String>> {
    let segments = field_path::split(target_field).ok()?;
    let (root, rest) = segments.split_first()?;
    if *root != CANONICAL_ROOT || rest.is_empty() {
        return None;
    }
    Some(rest.iter().map(|s| s.to_string()).collect())
}

/// A resolved leaf cannot be placed at `path`: a prefix already resolved to
/// a scalar, or deeper leaves already resolved beneath it
fn is_shadowed(canonical: &FieldMap, path: &[String]) -> bool {
    for depth in 1..path.len() {
        if let Some(value) = get_segments(canonical, &path[..depth]) {
            if !value.is_object() {
                return true;
            }
        }
    }
    matches!(get_segments(canonical, path), Some(Value::Object(_)))
}

/// Source data already claims `path`, either directly or through a scalar
/// sitting on one of its prefixes
fn is_occupied(resolved: &FieldMap, path: &[String]) -> bool {
    if get_segments(resolved, path).is_some() {
        return true;
    }
    (1..path.len()).any(|depth| {
        get_segments(resolved, &path[..depth]).is_some_and(|value| !value.is_object())
    })
}
