//! Envelope document model
//!
//! One envelope per space object. The serialized form of [`Envelope`] is the
//! persisted and on-wire document shape shared with every collaborator:
//!
//! ```text
//! identifier
//! canonical { ... }                  resolved view
//! sources   { <source>: { ... } }    raw provider data, untouched
//! metadata  { created_at, last_updated_at, sources_available,
//!             source_priority, transformations[] }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::field_path::{self, FieldPathError};
use crate::resolver::{recompute, resolve, OverrideRetention, Recomputed};
use crate::sources::SourceRegistry;
use crate::Result;

/// Nested string-keyed field map
pub type FieldMap = Map<String, Value>;

/// Root segment for canonical field paths
pub const CANONICAL_ROOT: &str = "canonical";
/// Root segment for source field paths
pub const SOURCES_ROOT: &str = "sources";

/// The stored document for one space object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub identifier: String,
    #[serde(default)]
    pub canonical: FieldMap,
    #[serde(default)]
    pub sources: BTreeMap<String, FieldMap>,
    pub metadata: EnvelopeMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeMetadata {
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    #[serde(default)]
    pub sources_available: Vec<String>,
    #[serde(default)]
    pub source_priority: Vec<String>,
    /// Append-only promotion audit trail
    #[serde(default)]
    pub transformations: Vec<Transformation>,
}

/// Audit record for one applied promotion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transformation {
    pub timestamp: DateTime<Utc>,
    pub source_field: String,
    pub target_field: String,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub promoted_by: String,
}

impl Envelope {
    /// Fresh envelope with no sources and an empty canonical view
    pub fn new(identifier: impl Into<String>, registry: &SourceRegistry, now: DateTime<Utc>) -> Self {
        Self {
            identifier: identifier.into(),
            canonical: Map::new(),
            sources: BTreeMap::new(),
            metadata: EnvelopeMetadata {
                created_at: now,
                last_updated_at: now,
                sources_available: Vec::new(),
                source_priority: registry.all_sources().to_vec(),
                transformations: Vec::new(),
            },
        }
    }

    /// Replace one source's contribution and patch canonical
    ///
    /// The previous field map for `source_name` is discarded, not merged.
    /// Canonical fields no source has supplied are kept for the auditor.
    /// Returns the canonical paths of promotions that this ingestion reverted.
    pub fn ingest(
        &mut self,
        source_name: &str,
        fields: FieldMap,
        registry: &SourceRegistry,
        retention: OverrideRetention,
        now: DateTime<Utc>,
    ) -> Vec<String> {
        let previously_resolved = resolve(&self.sources, registry);
        self.sources.insert(source_name.to_string(), fields);

        let Recomputed { canonical, reverted } = recompute(
            &self.canonical,
            &previously_resolved,
            &self.sources,
            &self.metadata.transformations,
            registry,
            retention,
        );
        self.canonical = canonical;
        self.refresh_source_index(registry);
        self.metadata.last_updated_at = now;
        reverted
    }

    /// Keep `sources_available` equal to the key set of `sources`
    pub fn refresh_source_index(&mut self, registry: &SourceRegistry) {
        self.metadata.sources_available =
            registry.order_sources(self.sources.keys().map(String::as_str));
        self.metadata.source_priority = registry.all_sources().to_vec();
    }

    /// Serialize to the plain document shape
    pub fn to_document(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Value at a document-rooted path such as `canonical.orbit.apogee_km`
    pub fn field(&self, path: &str) -> Result<Option<Value>> {
        let document = self.to_document()?;
        let Value::Object(root) = document else {
            return Ok(None);
        };
        Ok(field_path::get(&root, path)?.cloned())
    }

    /// Value at a canonical-relative path
    pub fn canonical_field(&self, path: &str) -> std::result::Result<Option<&Value>, FieldPathError> {
        field_path::get(&self.canonical, path)
    }

    /// Canonical string value, if present and a string
    pub fn canonical_str(&self, key: &str) -> Option<&str> {
        self.canonical.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
    }

    /// Top-level canonical scalar in text form
    ///
    /// Numbers and booleans render as JSON text. Maps, arrays, null and the
    /// empty string give `None`.
    pub fn canonical_text(&self, key: &str) -> Option<String> {
        match self.canonical.get(key)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}
