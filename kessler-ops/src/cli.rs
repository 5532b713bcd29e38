//! Command-line interface definitions

use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

/// Operator tool for the Kessler space-object registry
#[derive(Debug, Parser)]
#[command(name = "kessler-ops")]
#[command(about = "Ingest, inspect, promote and audit space-object envelopes")]
#[command(version)]
pub struct Cli {
    /// Config file (default: KESSLER_CONFIG, then ~/.config/kessler/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Database file (default: KESSLER_DATABASE, then config, then data dir)
    #[arg(long, global = true)]
    pub database: Option<PathBuf>,

    /// Verbose output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Ingest JSON-lines records: {"identifier", "source", "fields"}
    Ingest {
        /// Input file, or `-` for stdin
        #[arg(default_value = "-")]
        input: PathBuf,
    },

    /// Promote a source field into canonical
    Promote(PromoteArgs),

    /// Find (and optionally repair) canonical orbital data with no source node
    Audit {
        /// Repair every drifted envelope
        #[arg(long)]
        repair: bool,
    },

    /// Print one envelope as JSON
    Show(ShowArgs),

    /// Search envelopes by text and filters
    Search(SearchArgs),

    /// Registry counts and distinct values
    Stats,
}

#[derive(Debug, Args)]
pub struct PromoteArgs {
    /// Source field path (e.g. kaggle.orbital_band or sources.kaggle.orbital_band)
    pub source_field: String,

    /// Target field path (e.g. canonical.orbital_band)
    pub target_field: String,

    /// Preview changes without applying them
    #[arg(long)]
    pub dry_run: bool,

    /// Process every matching envelope
    #[arg(long, conflicts_with = "limit")]
    pub all: bool,

    /// Process at most this many envelopes
    #[arg(long)]
    pub limit: Option<usize>,

    /// Filter envelopes with path=value clauses, comma separated
    #[arg(long, conflicts_with = "identifiers")]
    pub filter: Option<String>,

    /// Promote only these identifiers (repeatable)
    #[arg(long = "identifier", value_name = "IDENTIFIER")]
    pub identifiers: Vec<String>,

    /// Skip confirmation prompts
    #[arg(short, long)]
    pub yes: bool,

    /// Reason recorded in the transformation history
    #[arg(long)]
    pub reason: Option<String>,
}

impl PromoteArgs {
    pub fn candidate_limit(&self) -> Option<usize> {
        if self.all {
            None
        } else {
            self.limit
        }
    }
}

#[derive(Debug, Args)]
#[group(required = true, multiple = false)]
pub struct ShowArgs {
    /// Envelope identifier
    pub identifier: Option<String>,

    /// Look up by international designator
    #[arg(long)]
    pub designator: Option<String>,

    /// Look up by registration number
    #[arg(long)]
    pub registration: Option<String>,
}

#[derive(Debug, Args)]
pub struct SearchArgs {
    /// Case-insensitive substring over name, object name, designator and registration
    pub text: Option<String>,

    #[arg(long)]
    pub country: Option<String>,

    #[arg(long)]
    pub status: Option<String>,

    #[arg(long)]
    pub orbital_band: Option<String>,

    #[arg(long)]
    pub congestion_risk: Option<String>,

    #[arg(long, default_value_t = 0)]
    pub skip: u32,

    /// Maximum results (clamped to the configured maximum)
    #[arg(long)]
    pub limit: Option<u32>,

    /// Print the full result page as JSON
    #[arg(long)]
    pub json: bool,
}
