use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use stock_insight::analysis::{chip, recommend, technical};
use stock_insight::api::EastmoneyClient;
use stock_insight::cleaner;
use stock_insight::database::Database;
use stock_insight::downloader::{self, DownloadConfig};
use stock_insight::importer::{self, MetricsImportOptions, QuoteImportOptions};
use stock_insight::models::Config;
use stock_insight::scoring::{format_ranking, scorer_for, STRATEGY_KEYS};
use stock_insight::server;

#[derive(Parser)]
#[command(name = "stock-insight", about = "A-share market data and analytics platform")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scrape the SH/SZ stock code lists into CSV files
    ScrapeCodes,

    /// Download per-stock daily history CSVs
    Download {
        /// Output directory (default: <data_dir>/history)
        #[arg(long, short)]
        output: Option<PathBuf>,
        /// Stock list CSV (default: <data_dir>/all_stock_list.csv)
        #[arg(long, short)]
        stock_list: Option<PathBuf>,
        #[arg(long)]
        start_date: Option<NaiveDate>,
        #[arg(long)]
        end_date: Option<NaiveDate>,
        /// Concurrent downloads
        #[arg(long, short)]
        workers: Option<usize>,
    },

    /// Import downloaded history CSVs into the quote table
    ImportQuotes {
        /// Directory to walk for *_history.csv (default: <data_dir>/history)
        #[arg(long, short)]
        data_dir: Option<PathBuf>,
        #[arg(long)]
        start_date: Option<NaiveDate>,
        #[arg(long)]
        end_date: Option<NaiveDate>,
        #[arg(long, short)]
        workers: Option<usize>,
    },

    /// Import per-stock metric JSON snapshots into the metric tables
    ImportMetrics {
        /// Import a specific analysis date
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Import every available date
        #[arg(long)]
        full: bool,
        #[arg(long, short)]
        workers: Option<usize>,
    },

    /// Clean metric history for one date, or all of it
    Clean {
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Wipe all metric history (requires --yes)
        #[arg(long)]
        all: bool,
        #[arg(long)]
        yes: bool,
    },

    /// Delete historical quotes by stock code and date range
    DeleteQuotes {
        #[arg(long)]
        stock_code: Option<String>,
        #[arg(long)]
        start_date: NaiveDate,
        #[arg(long)]
        end_date: NaiveDate,
    },

    /// Run the daily chip-distribution analysis
    ChipAnalysis,

    /// Recompute daily technical scores
    TechnicalScore,

    /// Regenerate daily recommendations from technical scores
    Recommend,

    /// Run a strategy scorer and print the ranking
    Score {
        #[arg(long, default_value = "rtpv")]
        strategy: String,
        /// Scoring date (default: latest metric date)
        #[arg(long)]
        date: Option<NaiveDate>,
        /// RTPV window in days
        #[arg(long, default_value_t = 30)]
        period: i64,
        #[arg(long, default_value_t = 10)]
        top: usize,
    },

    /// Start the HTTP API server
    Serve {
        #[arg(long)]
        bind: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;
    let cli = Cli::parse();

    match cli.command {
        Command::ScrapeCodes => {
            let client = EastmoneyClient::new(&config)?;
            let count =
                downloader::scrape_stock_lists(&client, PathBuf::from(&config.data_dir).as_path())
                    .await?;
            println!("Scraped {} stock codes", count);
        }

        Command::Download {
            output,
            stock_list,
            start_date,
            end_date,
            workers,
        } => {
            let client = Arc::new(EastmoneyClient::new(&config)?);
            let download_config = DownloadConfig {
                output_dir: output
                    .unwrap_or_else(|| PathBuf::from(&config.data_dir).join("history")),
                stock_list: stock_list
                    .unwrap_or_else(|| PathBuf::from(&config.data_dir).join("all_stock_list.csv")),
                start_date,
                end_date,
                max_workers: workers.unwrap_or(config.max_workers),
                retry_attempts: 3,
            };
            let result = downloader::batch_download(client, download_config).await?;
            println!(
                "Downloaded {}/{} stocks ({} failed)",
                result.succeeded,
                result.total_stocks,
                result.failed.len()
            );
        }

        Command::ImportQuotes {
            data_dir,
            start_date,
            end_date,
            workers,
        } => {
            let db = Database::new(&config.database_path).await?;
            let options = QuoteImportOptions {
                data_dir: data_dir
                    .unwrap_or_else(|| PathBuf::from(&config.data_dir).join("history")),
                start_date,
                end_date,
                max_workers: workers.unwrap_or(config.max_workers),
            };
            let summary = importer::import_quotes(&db, &options).await?;
            println!(
                "Imported {} records from {}/{} files",
                summary.records, summary.succeeded, summary.total_files
            );
        }

        Command::ImportMetrics { date, full, workers } => {
            let db = Database::new(&config.database_path).await?;
            let options = MetricsImportOptions {
                data_dir: PathBuf::from(&config.data_dir),
                date,
                full_history: full,
                max_workers: workers.unwrap_or(config.max_workers),
            };
            let summary = importer::import_metrics(&db, &options).await?;
            println!(
                "Imported {} metric records from {}/{} files",
                summary.records, summary.succeeded, summary.total_files
            );
        }

        Command::Clean { date, all, yes } => {
            let db = Database::new(&config.database_path).await?;
            if all {
                if !yes {
                    println!("This wipes all metric history; re-run with --yes to confirm");
                    return Ok(());
                }
                cleaner::clean_all_metrics(&db).await?;
                println!("All metric history cleared");
            } else if let Some(date) = date {
                let deleted = cleaner::clean_metrics_by_date(&db, date).await?;
                println!("Cleaned {} rows for {}", deleted, date);
            } else {
                println!("Pass --date YYYY-MM-DD or --all");
            }
        }

        Command::DeleteQuotes {
            stock_code,
            start_date,
            end_date,
        } => {
            let db = Database::new(&config.database_path).await?;
            let deleted = cleaner::delete_quote_range(
                &db,
                stock_code.as_deref(),
                Some(start_date),
                Some(end_date),
            )
            .await?;
            println!("Deleted {} quote rows", deleted);
        }

        Command::ChipAnalysis => {
            let db = Database::new(&config.database_path).await?;
            if chip::update_chip_analysis(&db).await? {
                println!("Chip analysis updated");
            } else {
                println!("Chip analysis skipped (no data or already current)");
            }
        }

        Command::TechnicalScore => {
            let db = Database::new(&config.database_path).await?;
            if technical::update_technical_scores(&db).await? {
                println!("Technical scores updated");
            } else {
                println!("Technical scoring skipped (no data)");
            }
        }

        Command::Recommend => {
            let db = Database::new(&config.database_path).await?;
            let count = recommend::update_recommendations(&db).await?;
            println!("Generated {} recommendations", count);
        }

        Command::Score {
            strategy,
            date,
            period,
            top,
        } => {
            let db = Database::new(&config.database_path).await?;
            let Some(scorer) = scorer_for(&strategy, period) else {
                anyhow::bail!(
                    "unknown strategy '{}'; available: {}",
                    strategy,
                    STRATEGY_KEYS.join(", ")
                );
            };

            let date = match date {
                Some(date) => date,
                None => db
                    .latest_metric_date()
                    .await?
                    .ok_or_else(|| anyhow::anyhow!("no metric data in the database"))?,
            };

            let entries = scorer.calculate(&db, date, top).await?;
            println!("{} scores for {}", scorer.name(), date);
            println!();
            println!("{}", scorer.describe());
            println!();
            if entries.is_empty() {
                println!("No stocks could be scored for {}", date);
            } else {
                println!("Top {} stocks:", top);
                println!("{}", format_ranking(&entries, top));
            }
        }

        Command::Serve { bind } => {
            let mut config = config;
            if let Some(bind) = bind {
                config.http_bind = bind;
            }
            let db = Database::new(&config.database_path).await?;
            server::serve(db, config).await?;
        }
    }

    Ok(())
}
