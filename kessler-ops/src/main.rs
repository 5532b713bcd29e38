//! kessler-ops - Operator tool for the Kessler space-object registry
//!
//! Logs go to stderr; command results go to stdout. The exit status
//! distinguishes success, fatal errors, validation errors, partial batch
//! failures and cancelled confirmations.

use clap::Parser;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use kessler_ops::buildinfo::BuildInfo;
use kessler_ops::commands;
use kessler_ops::{Cli, ExitStatus};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new(format!(
                    "kessler_ops={level},kessler_common={level},sqlx=warn",
                    level = default_level
                ))
            }),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("Starting Kessler Ops {}", BuildInfo::current());

    match commands::run(cli).await {
        Ok(status) => status.into(),
        Err(e) => {
            error!("{:#}", e);
            ExitStatus::for_error(&e).into()
        }
    }
}
