//! Concurrent batch import of downloaded files into the database.
//!
//! Two pipelines share the same contract: bounded worker concurrency,
//! per-file error isolation (one bad file never aborts the batch),
//! idempotent upserts, and one `update_logs` row per run.

use anyhow::{anyhow, Context, Result};
use chrono::{NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::database::Database;
use crate::models::{
    DailyQuote, FinancialHealth, FundamentalMetrics, HistoryCsvRow, IndustryMetrics,
    InvestorMetrics, Stock, TechnicalMetrics,
};

/// Options for a historical quote import run
#[derive(Debug, Clone)]
pub struct QuoteImportOptions {
    pub data_dir: PathBuf,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub max_workers: usize,
}

/// Options for a metrics import run
#[derive(Debug, Clone)]
pub struct MetricsImportOptions {
    pub data_dir: PathBuf,
    pub date: Option<NaiveDate>,
    pub full_history: bool,
    pub max_workers: usize,
}

/// Summary of one import run
#[derive(Debug)]
pub struct ImportSummary {
    pub total_files: usize,
    pub succeeded: usize,
    pub records: usize,
    pub failed_files: Vec<PathBuf>,
}

// ----------------------------------------------------------------------
// historical quotes
// ----------------------------------------------------------------------

/// Import every `*_history.csv` under the data directory into
/// `stock_historical_quotes`.
pub async fn import_quotes(db: &Database, options: &QuoteImportOptions) -> Result<ImportSummary> {
    let start_time = Utc::now();
    let files = find_files(&options.data_dir, "_history.csv");
    info!("Found {} history CSV files in {}", files.len(), options.data_dir.display());

    let workers = options.max_workers.max(1);
    let results = stream::iter(files.clone())
        .map(|path| {
            let db = db.clone();
            let options = options.clone();
            async move {
                let outcome = import_quote_file(&db, &path, &options).await;
                (path, outcome)
            }
        })
        .buffer_unordered(workers)
        .collect::<Vec<_>>()
        .await;

    let mut summary = ImportSummary {
        total_files: files.len(),
        succeeded: 0,
        records: 0,
        failed_files: Vec::new(),
    };
    for (path, outcome) in results {
        match outcome {
            Ok(records) => {
                summary.succeeded += 1;
                summary.records += records;
            }
            Err(e) => {
                error!("Failed to import {}: {}", path.display(), e);
                summary.failed_files.push(path);
            }
        }
    }

    let mode = if options.start_date.is_some() || options.end_date.is_some() {
        "DATE_RANGE"
    } else {
        "ALL"
    };
    let status = if summary.succeeded > 0 { "SUCCESS" } else { "FAILED" };
    db.log_update(
        "stock_historical_quotes",
        mode,
        start_time,
        status,
        summary.records as i64,
        summary
            .failed_files
            .first()
            .map(|p| p.display().to_string())
            .as_deref(),
    )
    .await?;

    info!(
        "Import completed: {}/{} files, {} records",
        summary.succeeded, summary.total_files, summary.records
    );
    if !summary.failed_files.is_empty() {
        warn!("{} files failed to import", summary.failed_files.len());
    }
    Ok(summary)
}

/// Import one history CSV. The stock code and display name come from the
/// `<code>_<name>_history.csv` file name.
async fn import_quote_file(
    db: &Database,
    path: &Path,
    options: &QuoteImportOptions,
) -> Result<usize> {
    let (stock_code, stock_name) = stock_identity_from_filename(path)
        .ok_or_else(|| anyhow!("cannot derive stock code from {}", path.display()))?;

    db.ensure_stock_exists(&stock_code, &stock_name).await?;

    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;

    let mut imported = 0;
    for record in reader.deserialize() {
        let row: HistoryCsvRow = record?;
        let trade_date = NaiveDate::parse_from_str(&row.date, "%Y-%m-%d")
            .with_context(|| format!("bad date '{}' in {}", row.date, path.display()))?;

        if let Some(start) = options.start_date {
            if trade_date < start {
                continue;
            }
        }
        if let Some(end) = options.end_date {
            if trade_date > end {
                continue;
            }
        }

        let quote = DailyQuote {
            stock_code: stock_code.clone(),
            trade_date,
            open_price: row.open,
            close_price: row.close,
            high_price: row.high,
            low_price: row.low,
            volume: row.volume,
            amount: row.amount,
            amplitude: row.amplitude,
            change_ratio: row.change_ratio,
            change_amount: row.change_amount,
            turnover_ratio: row.turnover_ratio,
            source: "eastmoney".to_string(),
            adjust_type: "qfq".to_string(),
        };
        db.upsert_quote(&quote).await?;
        imported += 1;
    }

    Ok(imported)
}

/// `600519_贵州茅台_history.csv` → `("600519", "贵州茅台")`
fn stock_identity_from_filename(path: &Path) -> Option<(String, String)> {
    let stem = path.file_name()?.to_str()?.strip_suffix("_history.csv")?;
    let (code, name) = stem.split_once('_')?;
    if code.is_empty() {
        return None;
    }
    let name = if name.is_empty() { code } else { name };
    Some((code.to_string(), name.to_string()))
}

// ----------------------------------------------------------------------
// fundamental metric snapshots
// ----------------------------------------------------------------------

/// Metric table variants under `stock_analysis/<date>/<sector>/<kind>/`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MetricKind {
    Fundamental,
    Technical,
    Financial,
    Industry,
    Investor,
}

impl MetricKind {
    const ALL: [MetricKind; 5] = [
        MetricKind::Fundamental,
        MetricKind::Technical,
        MetricKind::Financial,
        MetricKind::Industry,
        MetricKind::Investor,
    ];

    fn dir_name(&self) -> &'static str {
        match self {
            MetricKind::Fundamental => "fundamental",
            MetricKind::Technical => "technical",
            MetricKind::Financial => "financial",
            MetricKind::Industry => "industry",
            MetricKind::Investor => "investor",
        }
    }
}

/// Import per-stock basic info JSON files (`stock_info/**/*_info.json`)
/// into the stocks table. Returns the number of stocks updated.
pub async fn import_stock_info(db: &Database, data_dir: &Path) -> Result<usize> {
    let info_dir = data_dir.join("stock_info");
    if !info_dir.exists() {
        return Ok(0);
    }

    let mut imported = 0;
    for path in find_files(&info_dir, "_info.json") {
        match parse_stock_info(&path) {
            Ok(stock) => {
                db.upsert_stock(&stock).await?;
                imported += 1;
            }
            Err(e) => error!("Failed to import {}: {}", path.display(), e),
        }
    }
    info!("Imported basic info for {} stocks", imported);
    Ok(imported)
}

fn parse_stock_info(path: &Path) -> Result<Stock> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let value: Value = serde_json::from_str(&content)
        .with_context(|| format!("parsing {}", path.display()))?;

    let stock_code = value
        .get("stock_code")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("missing stock_code in {}", path.display()))?;
    let stock_name = value
        .get("stock_name")
        .and_then(|v| v.as_str())
        .unwrap_or(stock_code);

    let text = |key: &str| {
        value
            .get(key)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    };

    // listing date arrives as a unix timestamp
    let listing_date = value
        .get("firstTradeDateEpochUtc")
        .and_then(|v| v.as_i64())
        .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
        .map(|dt| dt.date_naive());

    let mut stock = Stock::bare(stock_code, stock_name);
    stock.sector = text("sector");
    stock.industry = text("industry");
    stock.company_name_en = text("longName");
    stock.description = text("longBusinessSummary");
    stock.website = text("website");
    stock.employees = value.get("fullTimeEmployees").and_then(|v| v.as_i64());
    stock.listing_date = listing_date;
    Ok(stock)
}

/// Import per-stock metric JSON snapshots into the five metric tables.
/// Stock basic info files are loaded first so metric rows land on fully
/// described stocks.
pub async fn import_metrics(db: &Database, options: &MetricsImportOptions) -> Result<ImportSummary> {
    let start_time = Utc::now();
    import_stock_info(db, &options.data_dir).await?;

    let analysis_dir = options.data_dir.join("stock_analysis");
    if !analysis_dir.exists() {
        anyhow::bail!("analysis directory not found: {}", analysis_dir.display());
    }

    let dates = select_dates(&analysis_dir, options)?;
    if dates.is_empty() {
        anyhow::bail!("no analysis date directories to process");
    }

    let mut files: Vec<(MetricKind, PathBuf, NaiveDate)> = Vec::new();
    for (date_name, date) in &dates {
        let date_path = analysis_dir.join(date_name);
        for sector in list_dirs(&date_path)? {
            for kind in MetricKind::ALL {
                let metric_dir = sector.join(kind.dir_name());
                if !metric_dir.is_dir() {
                    continue;
                }
                for file in find_files(&metric_dir, ".json") {
                    files.push((kind, file, *date));
                }
            }
        }
    }
    info!("Found {} metric files across {} dates", files.len(), dates.len());

    let workers = options.max_workers.max(1);
    let results = stream::iter(files.clone())
        .map(|(kind, path, date)| {
            let db = db.clone();
            async move {
                let outcome = import_metric_file(&db, kind, &path, date).await;
                (path, outcome)
            }
        })
        .buffer_unordered(workers)
        .collect::<Vec<_>>()
        .await;

    let mut summary = ImportSummary {
        total_files: files.len(),
        succeeded: 0,
        records: 0,
        failed_files: Vec::new(),
    };
    for (path, outcome) in results {
        match outcome {
            Ok(true) => {
                summary.succeeded += 1;
                summary.records += 1;
            }
            Ok(false) => summary.succeeded += 1, // empty record, skipped
            Err(e) => {
                error!("Failed to import {}: {}", path.display(), e);
                summary.failed_files.push(path);
            }
        }
    }

    let update_type = if options.full_history {
        "FULL"
    } else if options.date.is_some() {
        "DATE"
    } else {
        "LATEST"
    };
    let status = if summary.records > 0 { "SUCCESS" } else { "FAILED" };
    db.log_update("all_tables", update_type, start_time, status, summary.records as i64, None)
        .await?;

    info!(
        "Metrics import completed: {} records from {}/{} files",
        summary.records, summary.succeeded, summary.total_files
    );
    Ok(summary)
}

/// Pick the analysis date directories to process.
fn select_dates(
    analysis_dir: &Path,
    options: &MetricsImportOptions,
) -> Result<Vec<(String, NaiveDate)>> {
    let mut dates: Vec<(String, NaiveDate)> = Vec::new();
    for entry in std::fs::read_dir(analysis_dir)? {
        let entry = entry?;
        if !entry.path().is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Ok(date) = NaiveDate::parse_from_str(&name, "%Y-%m-%d") {
            dates.push((name, date));
        }
    }
    dates.sort_by_key(|(_, d)| *d);

    if options.full_history {
        return Ok(dates);
    }
    if let Some(wanted) = options.date {
        return Ok(dates.into_iter().filter(|(_, d)| *d == wanted).collect());
    }
    Ok(dates.into_iter().last().into_iter().collect())
}

/// Import one metric JSON file; returns false when the record carried no
/// metric values and was skipped.
async fn import_metric_file(
    db: &Database,
    kind: MetricKind,
    path: &Path,
    fallback_date: NaiveDate,
) -> Result<bool> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let value: Value = serde_json::from_str(&content)
        .with_context(|| format!("parsing {}", path.display()))?;

    let stock_code = value
        .get("stock_code")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("missing stock_code in {}", path.display()))?
        .to_string();
    let stock_name = value
        .get("stock_name")
        .and_then(|v| v.as_str())
        .unwrap_or(&stock_code)
        .to_string();

    db.ensure_stock_exists(&stock_code, &stock_name).await?;

    let date_key = if kind == MetricKind::Financial { "report_date" } else { "date" };
    let date = value
        .get(date_key)
        .and_then(|v| v.as_str())
        .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
        .unwrap_or(fallback_date);

    let f = |key: &str| value.get(key).and_then(|v| v.as_f64());
    let i = |key: &str| value.get(key).and_then(|v| v.as_i64());

    match kind {
        MetricKind::Fundamental => {
            let m = FundamentalMetrics {
                stock_code,
                date,
                pe_ratio: f("pe_ratio"),
                pb_ratio: f("pb_ratio"),
                roe: f("roe"),
                revenue_growth: f("revenue_growth"),
                earnings_growth: f("earnings_growth"),
                gross_margin: f("gross_margin"),
                operating_margin: f("operating_margin"),
                dividend_yield: f("dividend_yield"),
            };
            if [m.pe_ratio, m.pb_ratio, m.roe, m.revenue_growth, m.earnings_growth,
                m.gross_margin, m.operating_margin, m.dividend_yield]
                .iter()
                .all(Option::is_none)
            {
                return Ok(false);
            }
            db.upsert_fundamental(&m).await?;
        }
        MetricKind::Technical => {
            let m = TechnicalMetrics {
                stock_code,
                date,
                current_price: f("current_price"),
                high_52week: f("high_52week"),
                low_52week: f("low_52week"),
                volume: i("volume"),
                avg_volume: i("avg_volume"),
                avg_volume_10d: i("avg_volume_10d"),
                ma_200: f("ma_200"),
                beta: f("beta"),
            };
            if m.current_price.is_none()
                && m.high_52week.is_none()
                && m.low_52week.is_none()
                && m.volume.is_none()
                && m.avg_volume.is_none()
                && m.avg_volume_10d.is_none()
                && m.ma_200.is_none()
                && m.beta.is_none()
            {
                return Ok(false);
            }
            db.upsert_technical(&m).await?;
        }
        MetricKind::Financial => {
            let m = FinancialHealth {
                stock_code,
                report_date: date,
                quick_ratio: f("quick_ratio"),
                current_ratio: f("current_ratio"),
                cash_ratio: f("cash_ratio"),
                debt_to_equity: f("debt_to_equity"),
                interest_coverage: f("interest_coverage"),
                operating_cash_flow: f("operating_cash_flow"),
                cash_flow_coverage: f("cash_flow_coverage"),
            };
            if [m.quick_ratio, m.current_ratio, m.cash_ratio, m.debt_to_equity,
                m.interest_coverage, m.operating_cash_flow, m.cash_flow_coverage]
                .iter()
                .all(Option::is_none)
            {
                return Ok(false);
            }
            db.upsert_financial_health(&m).await?;
        }
        MetricKind::Industry => {
            let m = IndustryMetrics {
                stock_code,
                date,
                profit_margin: f("profit_margin"),
                price_to_sales: f("price_to_sales"),
                industry_rank: i("industry_rank"),
            };
            if m.profit_margin.is_none()
                && m.price_to_sales.is_none()
                && m.industry_rank.is_none()
            {
                return Ok(false);
            }
            db.upsert_industry(&m).await?;
        }
        MetricKind::Investor => {
            let m = InvestorMetrics {
                stock_code,
                date,
                insider_holding: f("insider_holding"),
                institution_holding: f("institution_holding"),
            };
            if m.insider_holding.is_none() && m.institution_holding.is_none() {
                return Ok(false);
            }
            db.upsert_investor(&m).await?;
        }
    }

    Ok(true)
}

// ----------------------------------------------------------------------
// filesystem helpers
// ----------------------------------------------------------------------

/// Recursively collect files under `dir` whose names end with `suffix`.
fn find_files(dir: &Path, suffix: &str) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return files,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            files.extend(find_files(&path, suffix));
        } else if path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.ends_with(suffix))
            .unwrap_or(false)
        {
            files.push(path);
        }
    }
    files.sort();
    files
}

fn list_dirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stock_identity_from_filename() {
        let path = Path::new("/data/600519_贵州茅台_history.csv");
        let (code, name) = stock_identity_from_filename(path).unwrap();
        assert_eq!(code, "600519");
        assert_eq!(name, "贵州茅台");

        // names may themselves contain underscores
        let path = Path::new("000001_PING_AN_history.csv");
        let (code, name) = stock_identity_from_filename(path).unwrap();
        assert_eq!(code, "000001");
        assert_eq!(name, "PING_AN");

        assert!(stock_identity_from_filename(Path::new("notes.txt")).is_none());
    }

    #[test]
    fn test_find_files_recurses() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join("x_history.csv"), "Date\n").unwrap();
        std::fs::write(nested.join("y_history.csv"), "Date\n").unwrap();
        std::fs::write(nested.join("ignore.json"), "{}").unwrap();

        let found = find_files(dir.path(), "_history.csv");
        assert_eq!(found.len(), 2);
    }
}
