//! Stock list scraping and per-stock history download.
//!
//! Fetches the A-share code list and daily OHLCV history from the market
//! data API and writes CSV files into the data directory, which the
//! importer later loads into the database.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::api::{EastmoneyClient, Market, MarketDataProvider};
use crate::models::{HistoryCsvRow, KlineBar, StockListEntry};

/// Configuration for a batch history download
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub output_dir: PathBuf,
    pub stock_list: PathBuf,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub max_workers: usize,
    pub retry_attempts: u32,
}

/// Result of a batch download run
#[derive(Debug)]
pub struct DownloadResult {
    pub total_stocks: usize,
    pub succeeded: usize,
    pub failed: Vec<String>,
}

/// Scrape the SH and SZ code lists and write per-market CSVs plus a
/// combined `all_stock_list.csv`. A failing market is logged and skipped.
pub async fn scrape_stock_lists(client: &EastmoneyClient, data_dir: &Path) -> Result<usize> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;

    let mut all_entries: Vec<StockListEntry> = Vec::new();

    for market in Market::ALL {
        info!("Fetching {} stock list...", market.label());
        match client.fetch_stock_list(market).await {
            Ok(entries) => {
                let filename = format!("{}_stock_list.csv", market.label().to_lowercase());
                let path = data_dir.join(filename);
                write_stock_list(&path, &entries)?;
                info!("Saved {} {} stocks to {}", entries.len(), market.label(), path.display());
                all_entries.extend(entries);
            }
            Err(e) => {
                error!("Failed to fetch {} stocks: {}", market.label(), e);
            }
        }
    }

    if all_entries.is_empty() {
        anyhow::bail!("no stock list data retrieved from any market");
    }

    let combined = data_dir.join("all_stock_list.csv");
    write_stock_list(&combined, &all_entries)?;
    info!("Total {} A-share stocks saved to {}", all_entries.len(), combined.display());

    Ok(all_entries.len())
}

fn write_stock_list(path: &Path, entries: &[StockListEntry]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for entry in entries {
        writer.serialize(entry)?;
    }
    writer.flush()?;
    Ok(())
}

/// Read a previously scraped stock list CSV.
pub fn read_stock_list(path: &Path) -> Result<Vec<StockListEntry>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("opening stock list {}", path.display()))?;
    let mut entries = Vec::new();
    for record in reader.deserialize() {
        let entry: StockListEntry = record?;
        entries.push(entry);
    }
    Ok(entries)
}

/// Download daily history for every stock in the list with bounded
/// concurrency. Failures are isolated per stock and reported at the end.
pub async fn batch_download(
    client: Arc<EastmoneyClient>,
    config: DownloadConfig,
) -> Result<DownloadResult> {
    let stocks = read_stock_list(&config.stock_list)?;
    let total_stocks = stocks.len();
    std::fs::create_dir_all(&config.output_dir)?;

    info!(
        "Downloading {} stocks ({} to {})",
        total_stocks,
        config
            .start_date
            .map(|d| d.to_string())
            .unwrap_or_else(|| "earliest".into()),
        config
            .end_date
            .map(|d| d.to_string())
            .unwrap_or_else(|| "latest".into()),
    );

    let workers = config.max_workers.max(1);
    let results = stream::iter(stocks)
        .map(|stock| {
            let client = Arc::clone(&client);
            let config = config.clone();
            async move {
                let outcome =
                    download_one_stock(&client, &stock, &config).await;
                (stock, outcome)
            }
        })
        .buffer_unordered(workers)
        .collect::<Vec<_>>()
        .await;

    let mut succeeded = 0;
    let mut failed = Vec::new();
    for (stock, outcome) in results {
        match outcome {
            Ok(records) => {
                succeeded += 1;
                info!("✅ {} ({}): {} records", stock.code, stock.name, records);
            }
            Err(e) => {
                error!("❌ {} ({}): {}", stock.code, stock.name, e);
                failed.push(stock.code);
            }
        }
    }

    info!("Download completed: {}/{} succeeded", succeeded, total_stocks);
    if !failed.is_empty() {
        warn!("Failed stocks: {}", failed.join(", "));
    }

    Ok(DownloadResult {
        total_stocks,
        succeeded,
        failed,
    })
}

/// Fetch one stock's history with retry, then write its CSV file.
async fn download_one_stock(
    client: &EastmoneyClient,
    stock: &StockListEntry,
    config: &DownloadConfig,
) -> Result<usize> {
    let mut attempts = 0;
    let bars = loop {
        match client
            .fetch_daily_history(&stock.code, config.start_date, config.end_date)
            .await
        {
            Ok(bars) if !bars.is_empty() => break bars,
            Ok(_) => anyhow::bail!("no data returned"),
            Err(e) => {
                attempts += 1;
                if attempts >= config.retry_attempts {
                    return Err(e);
                }
                warn!(
                    "Attempt {} failed for {}: {}. Retrying...",
                    attempts, stock.code, e
                );
                tokio::time::sleep(std::time::Duration::from_secs(2)).await;
            }
        }
    };

    let filename = format!("{}_{}_history.csv", stock.code, stock.name);
    let path = config.output_dir.join(filename);
    write_history_csv(&path, &bars)?;
    Ok(bars.len())
}

/// Write kline bars to a history CSV in the shared row layout.
pub fn write_history_csv(path: &Path, bars: &[KlineBar]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for bar in bars {
        writer.serialize(HistoryCsvRow {
            date: bar.trade_date.format("%Y-%m-%d").to_string(),
            open: bar.open,
            close: bar.close,
            high: bar.high,
            low: bar.low,
            volume: bar.volume,
            amount: Some(bar.amount),
            amplitude: Some(bar.amplitude),
            change_ratio: Some(bar.change_ratio),
            change_amount: Some(bar.change_amount),
            turnover_ratio: Some(bar.turnover_ratio),
        })?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    fn sample_bar(day: u32) -> KlineBar {
        KlineBar {
            trade_date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            open: 10.0,
            close: 10.5,
            high: 10.8,
            low: 9.9,
            volume: 1000,
            amount: 10_500.0,
            amplitude: 9.0,
            change_ratio: 5.0,
            change_amount: 0.5,
            turnover_ratio: 1.2,
        }
    }

    #[test]
    fn test_history_csv_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("600519_测试_history.csv");
        write_history_csv(&path, &[sample_bar(5), sample_bar(8)]).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let rows: Vec<HistoryCsvRow> = reader.deserialize().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].date, "2024-01-05");
        assert_eq!(rows[0].volume, 1000);
        assert_eq!(rows[1].change_amount, Some(0.5));
    }

    #[test]
    fn test_stock_list_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("all_stock_list.csv");
        let entries = vec![
            StockListEntry {
                code: "600519".into(),
                name: "贵州茅台".into(),
                market: "SH".into(),
            },
            StockListEntry {
                code: "000001".into(),
                name: "平安银行".into(),
                market: "SZ".into(),
            },
        ];
        write_stock_list(&path, &entries).unwrap();

        let loaded = read_stock_list(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].code, "600519");
        assert_eq!(loaded[1].market, "SZ");
    }
}
