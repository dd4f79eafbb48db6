//! Data maintenance: clearing metric history and deleting quote ranges.

use anyhow::Result;
use chrono::NaiveDate;
use tracing::info;

use crate::database::Database;

/// Delete metric rows for one date across all metric tables.
pub async fn clean_metrics_by_date(db: &Database, date: NaiveDate) -> Result<u64> {
    let deleted = db.delete_metrics_on(date).await?;
    info!("Cleaned {} metric rows for {}", deleted, date);
    Ok(deleted)
}

/// Wipe all metric history while preserving stock basics.
pub async fn clean_all_metrics(db: &Database) -> Result<()> {
    db.clear_metric_tables().await?;
    info!("Cleared all metric history");
    Ok(())
}

/// Delete historical quotes by optional stock code and date range.
pub async fn delete_quote_range(
    db: &Database,
    stock_code: Option<&str>,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
) -> Result<u64> {
    let deleted = db.delete_quotes(stock_code, start_date, end_date).await?;
    info!(
        "Deleted {} quote rows (code={:?}, range={:?}..{:?})",
        deleted, stock_code, start_date, end_date
    );
    Ok(deleted)
}
