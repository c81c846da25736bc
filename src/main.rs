mod config;
mod db;
mod error;
mod ingest;
mod logging;
mod models;
mod normalize;
mod pacing;
mod server;
mod source;
mod store;
mod supabase;
mod writer;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::{IngestArgs, StoreArgs, StoreKind};
use db::SqliteStore;
use error::SetupError;
use ingest::{Ingestor, RunSummary};
use logging::{init_logging, LogFormat};
use pacing::SystemClock;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "jobsweep")]
#[command(about = "Collect job listings from scraping providers into a deduplicated store")]
struct Cli {
    /// Log output format
    #[arg(long, global = true, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the SQLite listings table
    Init {
        /// SQLite database path
        #[arg(long, env = "JOBSWEEP_DB")]
        db: Option<PathBuf>,
    },

    /// Run one scrape across all configured locations
    Run {
        #[command(flatten)]
        ingest: IngestArgs,

        #[command(flatten)]
        store: StoreArgs,

        /// Write to an in-memory store instead of the configured one
        #[arg(long)]
        dry_run: bool,

        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Serve the HTTP trigger (/scrape-jobs, /health)
    Serve {
        #[command(flatten)]
        ingest: IngestArgs,

        #[command(flatten)]
        store: StoreArgs,

        /// Address to bind
        #[arg(long, env = "HOST", default_value = "0.0.0.0")]
        host: IpAddr,

        /// Port to bind
        #[arg(long, env = "PORT", default_value_t = 5000)]
        port: u16,
    },

    /// Check that the configured store is reachable
    Probe {
        #[command(flatten)]
        store: StoreArgs,
    },

    /// List the most recently scraped listings in the SQLite store
    List {
        /// SQLite database path
        #[arg(long, env = "JOBSWEEP_DB")]
        db: Option<PathBuf>,

        /// Number of listings to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
}

/// Builds a pipeline from flags and runs it once.
fn run_once(ingest: &IngestArgs, store: &StoreArgs) -> Result<RunSummary, SetupError> {
    let config = ingest.to_config()?;
    let provider = ingest.provider()?;
    let store = store.open()?;
    let ingestor = Ingestor::new(config, Box::new(provider), store, Arc::new(SystemClock))?;
    Ok(ingestor.run())
}

fn print_summary(summary: &RunSummary) {
    println!("\nResults:");
    println!("  Locations searched: {}", summary.partitions_attempted);
    println!("  Jobs processed:     {}", summary.total_records_processed);
    println!("  Jobs written:       {}", summary.writes.records_written);
    if summary.partitions_empty > 0 {
        println!("  Empty locations:    {}", summary.partitions_empty);
    }
    if summary.partitions_failed > 0 {
        println!("  Failed locations:   {}", summary.partitions_failed);
        for failure in &summary.failed_locations {
            println!("    {}: {}", failure.location, truncate(&failure.reason, 80));
        }
    }
    if summary.writes.batches_failed > 0 {
        println!(
            "  Failed batches:     {} ({} jobs dropped)",
            summary.writes.batches_failed, summary.writes.records_dropped
        );
    }
    if summary.records_rejected > 0 {
        println!("  Rejected (no id):   {}", summary.records_rejected);
    }
    let elapsed = summary.finished_at - summary.started_at;
    println!("  Elapsed:            {}s", elapsed.num_seconds());
}

fn main() -> Result<()> {
    // A missing .env is fine; real environment variables still apply
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_logging(cli.log_format)?;

    match cli.command {
        Commands::Init { db } => {
            let path = db.unwrap_or_else(SqliteStore::default_path);
            let store = SqliteStore::open_at(&path)?;
            store.init()?;
            println!("Database initialized at {}", store.path().display());
        }

        Commands::Run {
            ingest,
            mut store,
            dry_run,
            json,
        } => {
            if dry_run {
                store.store = StoreKind::Memory;
            }
            let summary = run_once(&ingest, &store).context("Job scraping could not start")?;

            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_summary(&summary);
                if dry_run {
                    println!("\n(Dry run - no jobs were actually stored)");
                }
            }
        }

        Commands::Serve {
            ingest,
            store,
            host,
            port,
        } => {
            // Fail fast on bad flags instead of on the first trigger
            ingest.to_config()?;

            let state = server::AppState::new(Arc::new(move || run_once(&ingest, &store)));
            let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
            runtime.block_on(server::serve(SocketAddr::new(host, port), state))?;
        }

        Commands::Probe { store } => {
            let opened = store.open()?;
            opened
                .probe()
                .with_context(|| format!("Store {} is not reachable", opened.describe()))?;
            println!("Store {} is reachable.", opened.describe());
        }

        Commands::List { db, limit } => {
            let path = db.unwrap_or_else(SqliteStore::default_path);
            let store = SqliteStore::open_at(&path)?;
            store.ensure_initialized()?;
            let listings = store.list_recent(limit)?;
            if listings.is_empty() {
                println!("No listings found.");
            } else {
                println!(
                    "{:<20} {:<10} {:<30} {:<20} {:<20}",
                    "ID", "SITE", "TITLE", "COMPANY", "SCRAPED"
                );
                println!("{}", "-".repeat(104));
                for listing in listings {
                    println!(
                        "{:<20} {:<10} {:<30} {:<20} {:<20}",
                        truncate(&listing.id, 18),
                        truncate(&listing.site.unwrap_or_default(), 8),
                        truncate(&listing.title.unwrap_or_default(), 28),
                        truncate(&listing.company.unwrap_or_default(), 18),
                        listing.scraped_at.format("%Y-%m-%d %H:%M")
                    );
                }
                println!("\n{} listing(s) stored in total.", store.count()?);
            }
        }
    }

    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("Pune", 10), "Pune");
        assert_eq!(truncate("Senior Product Manager", 10), "Senior ...");
        assert_eq!(truncate("बेंगलुरु कर्नाटक", 6), "बें...");
    }

    #[test]
    fn test_cli_parses_run_flags() {
        let cli = Cli::try_parse_from([
            "jobsweep",
            "run",
            "--dry-run",
            "--location",
            "Pune, IN",
            "--partition-pause",
            "0",
        ])
        .unwrap();
        match cli.command {
            Commands::Run { ingest, dry_run, .. } => {
                assert!(dry_run);
                assert_eq!(ingest.locations, vec!["Pune, IN".to_string()]);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_cli_serve_port() {
        let cli = Cli::try_parse_from(["jobsweep", "serve", "--port", "8080"]).unwrap();
        assert!(matches!(cli.command, Commands::Serve { port: 8080, .. }));
    }
}
