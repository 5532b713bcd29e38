//! # Kessler Common Library
//!
//! Reconciliation engine for the Kessler space-object registry:
//! - Envelope document model (canonical view, raw source nodes, audit trail)
//! - Field-path access and validation over nested JSON maps
//! - Priority-based canonical resolution and promotion replay
//! - SQLite envelope store with per-identifier compare-and-swap writes
//! - Batch promotion engine and consistency auditor
//! - Configuration loading

pub mod auditor;
pub mod config;
pub mod db;
pub mod envelope;
pub mod error;
pub mod field_path;
pub mod promotion;
pub mod resolver;
pub mod sources;
pub mod store;
pub mod time;

pub use envelope::{Envelope, FieldMap};
pub use error::{Error, Result};
pub use sources::SourceRegistry;
pub use store::EnvelopeStore;
