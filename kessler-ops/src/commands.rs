//! Subcommand implementations

use anyhow::{Context, Result};
use kessler_common::auditor::ConsistencyAuditor;
use kessler_common::config::KesslerConfig;
use kessler_common::promotion::{
    parse_filter, CandidateSelector, PlanOptions, PromotionEngine, PromotionRequest,
};
use kessler_common::store::{AlternateKey, SearchField, SearchQuery};
use kessler_common::{EnvelopeStore, Error};
use std::io::{self, BufReader};
use std::path::Path;
use tokio::io::AsyncBufRead;
use tracing::{debug, info};

use crate::cli::{Cli, Command, PromoteArgs, SearchArgs, ShowArgs};
use crate::exit::ExitStatus;
use crate::ingest::{ingest_lines, IngestSummary};
use crate::report;

/// Load configuration, open the store and dispatch
pub async fn run(cli: Cli) -> Result<ExitStatus> {
    let config = KesslerConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let db_path = config.resolve_database_path(cli.database.as_deref());
    info!("Database path: {}", db_path.display());

    let store = EnvelopeStore::open(&db_path, &config)
        .await
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;

    match cli.command {
        Command::Ingest { input } => ingest(&store, &input).await,
        Command::Promote(args) => promote(store, &config, &args).await,
        Command::Audit { repair } => audit(store, &config, repair).await,
        Command::Show(args) => show(&store, &args).await,
        Command::Search(args) => search(&store, &args).await,
        Command::Stats => stats(&store).await,
    }
}

async fn ingest(store: &EnvelopeStore, input: &Path) -> Result<ExitStatus> {
    let summary = if input == Path::new("-") {
        ingest_from(store, tokio::io::BufReader::new(tokio::io::stdin())).await?
    } else {
        let file = tokio::fs::File::open(input)
            .await
            .with_context(|| format!("Failed to open {}", input.display()))?;
        ingest_from(store, tokio::io::BufReader::new(file)).await?
    };

    println!(
        "Ingested {} records from {} lines ({} errors)",
        summary.upserted, summary.lines, summary.errors
    );
    Ok(ExitStatus::from_error_count(summary.errors))
}

async fn ingest_from<R>(store: &EnvelopeStore, reader: R) -> Result<IngestSummary>
where
    R: AsyncBufRead + Unpin,
{
    ingest_lines(store, reader)
        .await
        .context("Failed to read ingestion input")
}

/// Plan, confirm, execute
pub async fn promote(store: EnvelopeStore, config: &KesslerConfig, args: &PromoteArgs) -> Result<ExitStatus> {
    debug!(
        source = args.source_field.as_str(),
        target = args.target_field.as_str(),
        dry_run = args.dry_run,
        filter = ?args.filter,
        reason = ?args.reason,
        "Promote arguments"
    );

    let request = PromotionRequest::new(
        &args.source_field,
        &args.target_field,
        args.reason.clone(),
        store.registry(),
    )
    .map_err(Error::from)?
    .with_promoted_by(config.promotion.promoted_by.clone());

    let selector = if !args.identifiers.is_empty() {
        CandidateSelector::Identifiers(args.identifiers.clone())
    } else if let Some(filter) = &args.filter {
        CandidateSelector::Filter(parse_filter(filter).context("Invalid --filter")?)
    } else {
        CandidateSelector::AllWithSourceField
    };

    let options = PlanOptions {
        limit: args.candidate_limit(),
        dry_run: args.dry_run,
    };

    let engine = PromotionEngine::new(store, config.promotion.clone());
    let plan = engine.plan(&selector, &request, &options).await?;
    print!("{}", report::format_plan(&plan));

    if plan.total() == 0 {
        println!("No envelopes to update.");
        return Ok(ExitStatus::Success);
    }

    let needs_prompt = !args.dry_run && !args.yes && (plan.requires_confirmation || plan.conflicts.count > 0);
    if needs_prompt {
        let prompt = format!("Apply promotion to {} envelopes?", plan.candidates.len());
        let approved = report::confirm_blocking(BufReader::new(io::stdin()), io::stdout(), prompt)
            .await
            .context("Failed to read confirmation")?;
        if !approved {
            println!("Cancelled.");
            return Ok(ExitStatus::Cancelled);
        }
    }

    let batch = engine
        .execute(&plan, |processed, total| {
            eprintln!("Processed {}/{}", processed, total);
        })
        .await;
    print!("{}", report::format_batch_report(&batch));

    Ok(ExitStatus::from_error_count(batch.errors))
}

async fn audit(store: EnvelopeStore, config: &KesslerConfig, repair: bool) -> Result<ExitStatus> {
    let auditor = ConsistencyAuditor::new(store, config.sources.orbital_source.clone());

    if repair {
        let summary = auditor.repair_all().await?;
        print!("{}", report::format_audit_report(&summary));
        return Ok(ExitStatus::from_error_count(summary.errors as usize));
    }

    let findings = auditor.scan().await?;
    print!("{}", report::format_drift(&findings));
    Ok(ExitStatus::Success)
}

async fn show(store: &EnvelopeStore, args: &ShowArgs) -> Result<ExitStatus> {
    let (envelope, key) = if let Some(identifier) = &args.identifier {
        (store.find_by_identifier(identifier).await?, identifier)
    } else if let Some(designator) = &args.designator {
        (
            store
                .find_by_alternate_key(AlternateKey::InternationalDesignator, designator)
                .await?,
            designator,
        )
    } else if let Some(registration) = &args.registration {
        (
            store
                .find_by_alternate_key(AlternateKey::RegistrationNumber, registration)
                .await?,
            registration,
        )
    } else {
        return Err(Error::InvalidInput("an identifier, --designator or --registration is required".into()).into());
    };

    let envelope = envelope.ok_or_else(|| Error::NotFound(format!("no envelope for '{}'", key)))?;
    println!("{}", serde_json::to_string_pretty(&envelope)?);
    Ok(ExitStatus::Success)
}

async fn search(store: &EnvelopeStore, args: &SearchArgs) -> Result<ExitStatus> {
    let query = SearchQuery {
        text: args.text.clone(),
        country: args.country.clone(),
        status: args.status.clone(),
        orbital_band: args.orbital_band.clone(),
        congestion_risk: args.congestion_risk.clone(),
        skip: args.skip,
        limit: args.limit,
    };
    let page = store.search(&query).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&page)?);
    } else {
        print!("{}", report::format_search_page(&page));
    }
    Ok(ExitStatus::Success)
}

async fn stats(store: &EnvelopeStore) -> Result<ExitStatus> {
    println!("Envelopes: {}", store.count().await?);

    for (label, field) in [
        ("Countries", SearchField::CountryOfOrigin),
        ("Statuses", SearchField::Status),
        ("Orbital bands", SearchField::OrbitalBand),
        ("Congestion risks", SearchField::CongestionRisk),
    ] {
        let values = store.distinct_values(field).await?;
        println!("{} ({}): {}", label, values.len(), values.join(", "));
    }
    Ok(ExitStatus::Success)
}
