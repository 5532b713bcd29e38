//! Database row models

use sqlx::FromRow;

use crate::envelope::Envelope;
use crate::Result;

/// One row of the `envelopes` table
#[derive(Debug, Clone, FromRow)]
pub struct EnvelopeRow {
    pub seq: i64,
    pub identifier: String,
    pub revision: i64,
    pub document: String,
}

impl EnvelopeRow {
    pub fn decode(&self) -> Result<Envelope> {
        Ok(serde_json::from_str(&self.document)?)
    }
}
