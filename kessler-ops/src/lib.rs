//! kessler-ops library - operator tool for the Kessler registry
//!
//! Subcommands for ingesting source records, inspecting and searching
//! envelopes, batch promotion with confirmation, and consistency audits.

pub mod buildinfo;
pub mod cli;
pub mod commands;
pub mod exit;
pub mod ingest;
pub mod report;

pub use cli::Cli;
pub use exit::ExitStatus;
