//! NBA betting insights service.
//!
//! `serve` runs the picks/props API over The Odds API. `ingest` pulls player
//! game logs from stats.nba.com into PostgreSQL; the other subcommands look
//! after the database.

use anyhow::{bail, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use nba_insights::api;
use nba_insights::config::{ApiConfig, DatabaseConfig, IngestConfig};
use nba_insights::db::{self, integrity, schema, MemoryStatStore, PgStatStore};
use nba_insights::ingest::Ingestor;
use nba_insights::stats::StatsClient;

#[derive(Parser, Debug)]
#[command(name = "nba-insights", version, about = "NBA odds confidence API and stats ingestion")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Serve /api/picks and /api/props
    Serve,
    /// Pull historical game logs for active players
    Ingest {
        /// Number of most recent completed seasons (default: INGEST_SEASONS)
        #[arg(long)]
        seasons: Option<usize>,
        /// Only process the first N players (default: INGEST_PLAYER_LIMIT)
        #[arg(long)]
        limit: Option<usize>,
        /// Keep rows in memory; leave the database, cache and retry queue untouched
        #[arg(long, default_value_t = false)]
        dry_run: bool,
        /// Optional override for the database URL
        #[arg(long)]
        db_url: Option<String>,
    },
    /// Run the data integrity checks
    Verify {
        #[arg(long)]
        db_url: Option<String>,
    },
    /// Remove duplicated (player, game) rows, keeping the oldest
    Dedupe {
        #[arg(long)]
        db_url: Option<String>,
    },
    /// Create the tables and unique constraint
    InitDb {
        /// Drop and recreate both tables
        #[arg(long, default_value_t = false)]
        reset: bool,
        #[arg(long)]
        db_url: Option<String>,
    },
    /// Check that every required table and column exists
    CheckSchema {
        #[arg(long)]
        db_url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("nba_insights=info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve => {
            let config = ApiConfig::from_env()?;
            info!("NBA insights API v{}", env!("CARGO_PKG_VERSION"));
            api::serve(config).await
        }
        Commands::Ingest {
            seasons,
            limit,
            dry_run,
            db_url,
        } => ingest(seasons, limit, dry_run, db_url).await,
        Commands::Verify { db_url } => {
            let pool = db::connect_with_retry(&DatabaseConfig::from_env()?.with_url(db_url)).await?;
            let report = integrity::run_checks(&pool).await?;
            report.log();
            if report.is_clean() {
                info!("Data integrity checks passed");
            }
            Ok(())
        }
        Commands::Dedupe { db_url } => {
            let pool = db::connect_with_retry(&DatabaseConfig::from_env()?.with_url(db_url)).await?;
            integrity::remove_duplicates(&pool).await?;
            Ok(())
        }
        Commands::InitDb { reset, db_url } => {
            let pool = db::connect_with_retry(&DatabaseConfig::from_env()?.with_url(db_url)).await?;
            schema::init(&pool, reset).await
        }
        Commands::CheckSchema { db_url } => {
            let pool = db::connect_with_retry(&DatabaseConfig::from_env()?.with_url(db_url)).await?;
            let report = schema::verify(&pool).await?;
            if !report.is_ok() {
                bail!("database schema is incomplete");
            }
            info!("All required tables and columns are present");
            Ok(())
        }
    }
}

async fn ingest(
    seasons: Option<usize>,
    limit: Option<usize>,
    dry_run: bool,
    db_url: Option<String>,
) -> Result<()> {
    let config = IngestConfig::from_env()?;
    let seasons = seasons.unwrap_or(config.seasons);
    if seasons == 0 {
        bail!("--seasons must be at least 1");
    }
    let limit = limit.or(config.player_limit);
    let provider = StatsClient::new(&config)?;
    let today = Utc::now().date_naive();

    if dry_run {
        warn!("Dry run: rows are kept in memory and discarded");
        let mut ingestor = Ingestor::new(provider, MemoryStatStore::new(), &config)
            .await?
            .read_only();
        ingestor.run(today, seasons, limit).await?;
        integrity::IntegrityReport::from_memory(ingestor.store()).log();
        return Ok(());
    }

    let pool = db::connect_with_retry(&DatabaseConfig::from_env()?.with_url(db_url)).await?;
    let store = PgStatStore::new(pool.clone());
    let mut ingestor = Ingestor::new(provider, store, &config).await?;
    let summary = ingestor.run(today, seasons, limit).await?;
    if summary.errors > 0 {
        warn!("Ingestion finished with {} errors", summary.errors);
    }

    info!("Verifying data integrity...");
    match integrity::run_checks(&pool).await {
        Ok(report) => report.log(),
        Err(e) => error!("Integrity checks failed to run: {:?}", e),
    }
    Ok(())
}
