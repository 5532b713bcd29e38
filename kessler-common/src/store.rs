//! Envelope store
//!
//! Durable keyed storage of envelopes in SQLite:
//! - exactly one row per identifier (UNIQUE constraint)
//! - insertion order preserved through `seq`
//! - per-identifier writes are read → compute → compare-and-swap on
//!   `revision`, retried with exponential backoff when another writer wins
//! - different identifiers never contend with each other
//!
//! Every ingestion goes through [`EnvelopeStore::upsert_source`], which
//! re-derives canonical from the full set of source nodes.

use futures::Stream;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::path::Path;
use tracing::{debug, error, info, warn};

use crate::config::{KesslerConfig, SearchConfig, StoreConfig};
use crate::db::{init_database, EnvelopeRow};
use crate::envelope::{Envelope, FieldMap};
use crate::field_path::{self, SEPARATOR};
use crate::resolver::OverrideRetention;
use crate::sources::SourceRegistry;
use crate::time::{self, backoff_delay};
use crate::{Error, Result};

const SELECT_ROW: &str = "SELECT seq, identifier, revision, document FROM envelopes";

/// Outcome of a read-modify-write closure
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation<T> {
    /// Envelope was modified and must be written back
    Changed(T),
    /// Nothing to write; the stored envelope stays byte-for-byte as it was
    Unchanged(T),
}

/// Secondary keys with an index over canonical fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlternateKey {
    InternationalDesignator,
    RegistrationNumber,
}

impl AlternateKey {
    /// Canonical field (and indexed column) backing this key
    pub fn field_name(self) -> &'static str {
        match self {
            AlternateKey::InternationalDesignator => "international_designator",
            AlternateKey::RegistrationNumber => "registration_number",
        }
    }

    /// Value written to the indexed column for `envelope`
    pub fn indexed_value(self, envelope: &Envelope) -> Option<String> {
        envelope.canonical_text(self.field_name())
    }
}

/// Canonical fields reachable from search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchField {
    Name,
    ObjectName,
    InternationalDesignator,
    RegistrationNumber,
    CountryOfOrigin,
    Status,
    OrbitalBand,
    CongestionRisk,
}

impl SearchField {
    /// Fields matched by free-text search
    pub const TEXT_FIELDS: [SearchField; 4] = [
        SearchField::Name,
        SearchField::ObjectName,
        SearchField::InternationalDesignator,
        SearchField::RegistrationNumber,
    ];

    pub fn canonical_key(self) -> &'static str {
        match self {
            SearchField::Name => "name",
            SearchField::ObjectName => "object_name",
            SearchField::InternationalDesignator => "international_designator",
            SearchField::RegistrationNumber => "registration_number",
            SearchField::CountryOfOrigin => "country_of_origin",
            SearchField::Status => "status",
            SearchField::OrbitalBand => "orbital_band",
            SearchField::CongestionRisk => "congestion_risk",
        }
    }

    fn json_path(self) -> String {
        format!("$.canonical.{}", self.canonical_key())
    }
}

/// Search request: free text plus equality filters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub text: Option<String>,
    pub country: Option<String>,
    pub status: Option<String>,
    pub orbital_band: Option<String>,
    pub congestion_risk: Option<String>,
    #[serde(default)]
    pub skip: u32,
    pub limit: Option<u32>,
}

impl SearchQuery {
    fn equality_filters(&self) -> Vec<(SearchField, &str)> {
        [
            (SearchField::CountryOfOrigin, &self.country),
            (SearchField::Status, &self.status),
            (SearchField::OrbitalBand, &self.orbital_band),
            (SearchField::CongestionRisk, &self.congestion_risk),
        ]
        .into_iter()
        .filter_map(|(field, value)| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(|v| (field, v))
        })
        .collect()
    }
}

/// One page of search results
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchPage {
    pub matches: Vec<Envelope>,
    /// Matches across all pages
    pub total: u64,
    pub skip: u32,
    /// Effective limit after clamping
    pub limit: u32,
}

/// SQLite-backed envelope store
#[derive(Clone)]
pub struct EnvelopeStore {
    pool: SqlitePool,
    registry: SourceRegistry,
    retention: OverrideRetention,
    search: SearchConfig,
    settings: StoreConfig,
}

impl EnvelopeStore {
    /// Wrap an initialized pool
    pub fn new(pool: SqlitePool, config: &KesslerConfig) -> Self {
        Self {
            pool,
            registry: config.sources.priority.clone(),
            retention: config.promotion.override_retention,
            search: config.search.clone(),
            settings: config.store.clone(),
        }
    }

    /// Open (creating if needed) the database at `db_path`
    pub async fn open(db_path: &Path, config: &KesslerConfig) -> Result<Self> {
        let pool = init_database(db_path, config.store.busy_timeout_ms).await?;
        Ok(Self::new(pool, config))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn retention(&self) -> OverrideRetention {
        self.retention
    }

    /// Replace one source's field map for `identifier` and recompute canonical
    ///
    /// Creates the envelope on first ingestion. Returns the stored envelope.
    pub async fn upsert_source(
        &self,
        identifier: &str,
        source_name: &str,
        fields: FieldMap,
    ) -> Result<Envelope> {
        validate_identifier(identifier)?;
        validate_source_name(source_name)?;

        let registry = &self.registry;
        let retention = self.retention;
        let written = self
            .write_with_retry(identifier, true, |envelope| {
                let reverted =
                    envelope.ingest(source_name, fields.clone(), registry, retention, time::now());
                Ok(Mutation::Changed((envelope.clone(), reverted)))
            })
            .await?;

        let Some((envelope, reverted)) = written else {
            return Err(Error::Internal(format!(
                "upsert of '{}' produced no envelope",
                identifier
            )));
        };

        for target in &reverted {
            warn!(
                identifier,
                source = source_name,
                target = target.as_str(),
                "Ingestion replaced a promoted canonical value"
            );
        }
        debug!(
            identifier,
            source = source_name,
            sources = envelope.metadata.sources_available.len(),
            "Upserted source node"
        );
        Ok(envelope)
    }

    /// Read-modify-write one existing envelope
    ///
    /// Returns `Ok(None)` when no envelope has this identifier. The closure may
    /// run more than once if a concurrent writer wins the compare-and-swap.
    pub async fn modify<T, F>(&self, identifier: &str, apply: F) -> Result<Option<T>>
    where
        F: FnMut(&mut Envelope) -> Result<Mutation<T>>,
    {
        self.write_with_retry(identifier, false, apply).await
    }

    pub async fn find_by_identifier(&self, identifier: &str) -> Result<Option<Envelope>> {
        self.load_row(identifier)
            .await?
            .map(|row| row.decode())
            .transpose()
    }

    /// Look up by an indexed canonical field
    ///
    /// Duplicates are a data-quality condition: the first envelope in
    /// insertion order is returned and a warning is logged.
    pub async fn find_by_alternate_key(
        &self,
        key: AlternateKey,
        value: &str,
    ) -> Result<Option<Envelope>> {
        let sql = format!(
            "{} WHERE {} = ? ORDER BY seq ASC LIMIT 2",
            SELECT_ROW,
            key.field_name()
        );
        let rows: Vec<EnvelopeRow> = sqlx::query_as(&sql)
            .bind(value)
            .fetch_all(&self.pool)
            .await?;

        if rows.len() > 1 {
            warn!(
                key = key.field_name(),
                value,
                first = rows[0].identifier.as_str(),
                "NonUniqueAlternateKey: several envelopes share this key, returning the first"
            );
        }

        rows.first().map(EnvelopeRow::decode).transpose()
    }

    /// Substring search over name/designator/registration plus equality filters
    pub async fn search(&self, query: &SearchQuery) -> Result<SearchPage> {
        let limit = query
            .limit
            .unwrap_or(self.search.default_limit)
            .clamp(1, self.search.max_limit.max(1));

        let mut clauses: Vec<String> = Vec::new();
        let mut binds: Vec<String> = Vec::new();

        if let Some(text) = query.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            let pattern = format!("%{}%", escape_like(text));
            let matchers: Vec<String> = SearchField::TEXT_FIELDS
                .iter()
                .map(|field| {
                    binds.push(pattern.clone());
                    format!("json_extract(document, '{}') LIKE ? ESCAPE '\\'", field.json_path())
                })
                .collect();
            clauses.push(format!("({})", matchers.join(" OR ")));
        }

        for (field, value) in query.equality_filters() {
            clauses.push(format!(
                "json_extract(document, '{}') = ? COLLATE NOCASE",
                field.json_path()
            ));
            binds.push(value.to_string());
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM envelopes{}", where_sql);
        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
        for value in &binds {
            count_query = count_query.bind(value.clone());
        }
        let total = count_query.fetch_one(&self.pool).await?;

        let page_sql = format!("{}{} ORDER BY seq ASC LIMIT ? OFFSET ?", SELECT_ROW, where_sql);
        let mut page_query = sqlx::query_as::<_, EnvelopeRow>(&page_sql);
        for value in &binds {
            page_query = page_query.bind(value.clone());
        }
        let rows = page_query
            .bind(i64::from(limit))
            .bind(i64::from(query.skip))
            .fetch_all(&self.pool)
            .await?;

        let matches = rows
            .iter()
            .map(EnvelopeRow::decode)
            .collect::<Result<Vec<_>>>()?;

        Ok(SearchPage {
            matches,
            total: u64::try_from(total).unwrap_or(0),
            skip: query.skip,
            limit,
        })
    }

    /// Number of stored envelopes
    pub async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM envelopes")
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Sorted distinct non-blank canonical values of `field`
    pub async fn distinct_values(&self, field: SearchField) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT DISTINCT CAST(json_extract(document, '{}') AS TEXT) FROM envelopes",
            field.json_path()
        );
        let values: Vec<Option<String>> = sqlx::query_scalar(&sql).fetch_all(&self.pool).await?;

        let mut values: Vec<String> = values
            .into_iter()
            .flatten()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .collect();
        values.sort();
        values.dedup();
        Ok(values)
    }

    /// Lazily stream every envelope in insertion order
    ///
    /// Rows are fetched in pages of `store.scan_page_size`; at most one page
    /// is held in memory. A document that fails to decode is yielded as an
    /// error and the scan continues.
    pub fn scan_all(&self) -> impl Stream<Item = Result<Envelope>> + '_ {
        let page_size = i64::from(self.settings.scan_page_size);
        let sql = format!("{} WHERE seq > ? ORDER BY seq ASC LIMIT ?", SELECT_ROW);

        async_stream::stream! {
            let mut last_seq = 0i64;
            loop {
                let page = sqlx::query_as::<_, EnvelopeRow>(&sql)
                    .bind(last_seq)
                    .bind(page_size)
                    .fetch_all(&self.pool)
                    .await;

                let rows = match page {
                    Ok(rows) => rows,
                    Err(e) => {
                        error!("Envelope scan failed after seq {}: {}", last_seq, e);
                        yield Err(Error::from(e));
                        break;
                    }
                };

                let Some(last) = rows.last() else {
                    break;
                };
                last_seq = last.seq;
                let exhausted = rows.len() < page_size as usize;

                for row in rows {
                    let decoded = row.decode();
                    if let Err(e) = &decoded {
                        warn!(identifier = row.identifier.as_str(), "Skipping undecodable envelope: {}", e);
                    }
                    yield decoded;
                }

                if exhausted {
                    break;
                }
            }
        }
    }

    async fn load_row(&self, identifier: &str) -> Result<Option<EnvelopeRow>> {
        let sql = format!("{} WHERE identifier = ?", SELECT_ROW);
        let row = sqlx::query_as::<_, EnvelopeRow>(&sql)
            .bind(identifier)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Insert a new envelope; `false` if the identifier already exists
    async fn insert(&self, envelope: &Envelope) -> Result<bool> {
        let document = serde_json::to_string(envelope)?;
        let result = sqlx::query(
            r#"
            INSERT INTO envelopes (identifier, revision, document, international_designator,
                                   registration_number, created_at, updated_at)
            VALUES (?, 1, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&envelope.identifier)
        .bind(document)
        .bind(AlternateKey::InternationalDesignator.indexed_value(envelope))
        .bind(AlternateKey::RegistrationNumber.indexed_value(envelope))
        .bind(envelope.metadata.created_at.to_rfc3339())
        .bind(envelope.metadata.last_updated_at.to_rfc3339())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(true),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace an envelope if nobody wrote since `expected_revision`
    async fn replace(&self, envelope: &Envelope, expected_revision: i64) -> Result<bool> {
        let document = serde_json::to_string(envelope)?;
        let result = sqlx::query(
            r#"
            UPDATE envelopes
            SET document = ?,
                revision = revision + 1,
                international_designator = ?,
                registration_number = ?,
                updated_at = ?
            WHERE identifier = ? AND revision = ?
            "#,
        )
        .bind(document)
        .bind(AlternateKey::InternationalDesignator.indexed_value(envelope))
        .bind(AlternateKey::RegistrationNumber.indexed_value(envelope))
        .bind(envelope.metadata.last_updated_at.to_rfc3339())
        .bind(&envelope.identifier)
        .bind(expected_revision)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn write_with_retry<T, F>(
        &self,
        identifier: &str,
        create_if_missing: bool,
        mut apply: F,
    ) -> Result<Option<T>>
    where
        F: FnMut(&mut Envelope) -> Result<Mutation<T>>,
    {
        let max_attempts = self.settings.max_cas_attempts;

        for attempt in 1..=max_attempts {
            let (mut envelope, revision) = match self.load_row(identifier).await? {
                Some(row) => (row.decode()?, Some(row.revision)),
                None if create_if_missing => {
                    (Envelope::new(identifier, &self.registry, time::now()), None)
                }
                None => return Ok(None),
            };

            let value = match apply(&mut envelope)? {
                Mutation::Unchanged(value) => return Ok(Some(value)),
                Mutation::Changed(value) => value,
            };

            let written = match revision {
                Some(expected) => self.replace(&envelope, expected).await?,
                None => self.insert(&envelope).await?,
            };

            if written {
                if attempt > 1 {
                    info!(identifier, attempt, "Write succeeded after revision conflict");
                }
                return Ok(Some(value));
            }

            if attempt < max_attempts {
                let delay = backoff_delay(attempt);
                warn!(
                    identifier,
                    attempt,
                    backoff_ms = delay.as_millis() as u64,
                    "Revision conflict, will retry after backoff"
                );
                tokio::time::sleep(delay).await;
            }
        }

        error!(identifier, attempts = max_attempts, "Write failed: revision conflicts exhausted retries");
        Err(Error::RevisionConflict {
            identifier: identifier.to_string(),
            attempts: max_attempts,
        })
    }
}

fn validate_identifier(identifier: &str) -> Result<()> {
    if identifier.trim().is_empty() {
        return Err(Error::InvalidInput("identifier must not be empty".into()));
    }
    Ok(())
}

/// Source names become the second segment of `sources.<name>.<field>` paths
fn validate_source_name(source_name: &str) -> Result<()> {
    field_path::validate_field_path(source_name)?;
    if source_name.contains(SEPARATOR) {
        return Err(Error::InvalidInput(format!(
            "source name '{}' must not contain '{}'",
            source_name, SEPARATOR
        )));
    }
    Ok(())
}

/// Escape LIKE wildcards so user text matches literally
fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("50%_a\\b"), "50\\%\\_a\\\\b");
        assert_eq!(escape_like("ISS"), "ISS");
    }

    #[test]
    fn test_source_name_validation() {
        assert!(validate_source_name("celestrak").is_ok());
        assert!(validate_source_name("").is_err());
        assert!(validate_source_name("a.b").is_err());
        assert!(validate_source_name("a b").is_err());
    }

    #[test]
    fn test_equality_filters_skip_blank() {
        let query = SearchQuery {
            country: Some("USA".into()),
            status: Some("   ".into()),
            ..Default::default()
        };
        let filters = query.equality_filters();
        assert_eq!(filters, vec![(SearchField::CountryOfOrigin, "USA")]);
    }
}
