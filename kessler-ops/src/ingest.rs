//! JSON-lines ingestion
//!
//! Each non-blank line is one source record:
//! `{"identifier": "...", "source": "...", "fields": {...}}`.
//! Bad lines and failed upserts are counted and logged; ingestion continues.

use kessler_common::{EnvelopeStore, FieldMap};
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IngestRecord {
    pub identifier: String,
    pub source: String,
    #[serde(default)]
    pub fields: FieldMap,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub lines: usize,
    pub upserted: usize,
    pub errors: usize,
}

/// Parse one line; `Ok(None)` for blank lines
pub fn parse_record(line: &str) -> serde_json::Result<Option<IngestRecord>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(line).map(Some)
}

pub async fn ingest_lines<R>(store: &EnvelopeStore, reader: R) -> std::io::Result<IngestSummary>
where
    R: AsyncBufRead + Unpin,
{
    let mut summary = IngestSummary::default();
    let mut lines = reader.lines();

    while let Some(line) = lines.next_line().await? {
        summary.lines += 1;

        let record = match parse_record(&line) {
            Ok(Some(record)) => record,
            Ok(None) => continue,
            Err(e) => {
                warn!(line = summary.lines, "Skipping malformed record: {}", e);
                summary.errors += 1;
                continue;
            }
        };

        match store
            .upsert_source(&record.identifier, &record.source, record.fields)
            .await
        {
            Ok(_) => summary.upserted += 1,
            Err(e) => {
                warn!(
                    line = summary.lines,
                    identifier = record.identifier.as_str(),
                    source = record.source.as_str(),
                    "Upsert failed: {}",
                    e
                );
                summary.errors += 1;
            }
        }
    }

    info!(
        lines = summary.lines,
        upserted = summary.upserted,
        errors = summary.errors,
        "Ingestion finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_record() {
        let record = parse_record(r#"{"identifier":"X1","source":"unoosa","fields":{"name":"Sat"}}"#)
            .unwrap()
            .unwrap();
        assert_eq!(record.identifier, "X1");
        assert_eq!(record.source, "unoosa");
        assert_eq!(record.fields["name"], json!("Sat"));
    }

    #[test]
    fn test_blank_and_fieldless_lines() {
        assert!(parse_record("   ").unwrap().is_none());
        let record = parse_record(r#"{"identifier":"X1","source":"kaggle"}"#).unwrap().unwrap();
        assert!(record.fields.is_empty());
    }

    #[test]
    fn test_malformed_lines() {
        assert!(parse_record("{not json").is_err());
        assert!(parse_record(r#"{"identifier":"X1"}"#).is_err());
        assert!(parse_record(r#"{"identifier":"X1","source":"a","fields":[1]}"#).is_err());
    }
}
