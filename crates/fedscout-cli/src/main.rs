use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use fedscout_core::{FetchFilter, SourceKind, SourceSelector};
use fedscout_web::AppState;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "fedscout")]
#[command(about = "FedScout procurement ingestion command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one ingestion pass (all sources unless --source is given).
    Ingest {
        #[arg(long)]
        source: Option<String>,
        #[arg(long)]
        naics: Option<String>,
        #[arg(long)]
        agency: Option<String>,
        #[arg(long)]
        year: Option<i32>,
    },
    /// Geocode up to --limit records missing coordinates.
    Geocode {
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
    /// Print geocoding coverage.
    Stats,
    /// Serve the trigger endpoints (and the cron scheduler, if enabled).
    Serve {
        #[arg(long, default_value_t = 8000)]
        port: u16,
    },
}

fn selector_from_args(
    source: Option<String>,
    naics: Option<String>,
    agency: Option<String>,
    year: Option<i32>,
) -> Result<SourceSelector> {
    let Some(source) = source else {
        if naics.is_some() || agency.is_some() || year.is_some() {
            bail!("--naics/--agency/--year require --source");
        }
        return Ok(SourceSelector::Full);
    };
    let Some(kind) = SourceKind::parse(&source) else {
        bail!("unknown source `{source}` (expected primary, sbir_sttr, or federal_spending)");
    };
    Ok(SourceSelector::Single(
        kind,
        FetchFilter {
            naics,
            agency,
            year,
        },
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Ingest {
        source: None,
        naics: None,
        agency: None,
        year: None,
    }) {
        Commands::Ingest {
            source,
            naics,
            agency,
            year,
        } => {
            let selector = selector_from_args(source, naics, agency, year)?;
            let result = fedscout_ingest::run_ingestion_once_from_env(selector).await?;
            println!(
                "ingest {:?}: {} (new={} updated={} skipped={} duration_ms={})",
                result.status,
                result.message,
                result.new_records,
                result.updated_records,
                result.skipped_records,
                result.duration_ms
            );
        }
        Commands::Geocode { limit } => {
            let runtime = fedscout_ingest::build_runtime_from_env().await?;
            let geocoded = runtime.enricher.batch_geocode(limit).await?;
            println!("geocoded {geocoded} of up to {limit} records");
        }
        Commands::Stats => {
            let runtime = fedscout_ingest::build_runtime_from_env().await?;
            let stats = runtime.enricher.stats().await?;
            println!(
                "opportunities={} geocoded={} needs_geocoding={} coverage={}%",
                stats.total_opportunities,
                stats.geocoded_count,
                stats.needs_geocoding_count,
                stats.geocoded_percentage
            );
        }
        Commands::Serve { port } => {
            let runtime = fedscout_ingest::build_runtime_from_env().await?;
            let scheduler = fedscout_ingest::maybe_build_scheduler(
                runtime.orchestrator.clone(),
                &runtime.config,
            )
            .await?;
            if let Some(mut scheduler) = scheduler {
                scheduler.start().await?;
            }
            fedscout_web::serve(
                AppState {
                    orchestrator: runtime.orchestrator,
                    enricher: runtime.enricher,
                },
                port,
            )
            .await?;
        }
    }

    Ok(())
}
