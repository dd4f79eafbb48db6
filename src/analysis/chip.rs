//! Daily chip-distribution analysis.
//!
//! Models which share of the trailing 60 trading days' volume is held at a
//! profit or loss relative to the 60-day VWAP, then ranks candidates for
//! three entry strategies. The whole computation is one window-function SQL
//! statement per strategy, inserting the top 50 ranked rows.

use anyhow::Result;
use chrono::Utc;
use tracing::{error, info};

use crate::database::Database;
use crate::models::ChipStrategy;

/// Shared CTE: per-stock trailing 60-row MA, average volume, VWAP, and the
/// four chip ratios, evaluated on the latest trade date.
const CHIP_BASE: &str = r#"
WITH price_data AS (
    SELECT
        stock_code,
        trade_date,
        close_price,
        volume,
        AVG(close_price) OVER w AS ma60,
        AVG(volume) OVER w AS avg_vol_60d,
        SUM(close_price * volume) OVER w
            / NULLIF(SUM(volume) OVER w, 0) AS vwap
    FROM stock_historical_quotes
    WHERE trade_date >= date(?1, '-60 days')
    WINDOW w AS (PARTITION BY stock_code ORDER BY trade_date
                 ROWS BETWEEN 59 PRECEDING AND CURRENT ROW)
),
chip_distribution AS (
    SELECT
        stock_code,
        trade_date,
        close_price,
        ma60, vwap, avg_vol_60d,
        CAST(SUM(CASE WHEN close_price > vwap THEN volume ELSE 0 END) OVER w AS REAL)
            / NULLIF(SUM(volume) OVER w, 0) AS profit_chip_ratio,
        CAST(SUM(CASE WHEN close_price < vwap THEN volume ELSE 0 END) OVER w AS REAL)
            / NULLIF(SUM(volume) OVER w, 0) AS locked_chip_ratio,
        CAST(SUM(CASE WHEN volume > 1.2 * avg_vol_60d
                       AND close_price BETWEEN vwap * 0.98 AND vwap * 1.02
                 THEN volume ELSE 0 END) OVER w AS REAL)
            / NULLIF(SUM(volume) OVER w, 0) AS main_chip_ratio,
        CAST(SUM(CASE WHEN volume < 0.8 * avg_vol_60d THEN volume ELSE 0 END) OVER w AS REAL)
            / NULLIF(SUM(volume) OVER w, 0) AS floating_chip_ratio
    FROM price_data
    WINDOW w AS (PARTITION BY stock_code ORDER BY trade_date
                 ROWS BETWEEN 59 PRECEDING AND CURRENT ROW)
),
latest_data AS (
    SELECT
        cd.*,
        s.stock_name,
        s.industry
    FROM chip_distribution cd
    JOIN stocks s ON cd.stock_code = s.stock_code
    WHERE cd.trade_date = ?1
)
"#;

/// Selection filter and ranking expression for each strategy.
fn strategy_tail(strategy: ChipStrategy) -> (&'static str, &'static str) {
    match strategy {
        ChipStrategy::BuyDip => (
            "main_chip_ratio >= 0.3 AND profit_chip_ratio < 0.5",
            "main_chip_ratio DESC, profit_chip_ratio ASC, ABS(close_price - vwap) ASC",
        ),
        ChipStrategy::FollowUp => (
            "profit_chip_ratio >= 0.6
             AND main_chip_ratio >= 0.3
             AND floating_chip_ratio < 0.4
             AND close_price > ma60
             AND close_price > vwap
             AND locked_chip_ratio < 0.3",
            "profit_chip_ratio * 0.4 + main_chip_ratio * 0.4
             + (1 - floating_chip_ratio) * 0.2 DESC",
        ),
        ChipStrategy::Potential => (
            "main_chip_ratio >= 0.5
             AND floating_chip_ratio < 0.3
             AND profit_chip_ratio BETWEEN 0.6 AND 0.85",
            "main_chip_ratio DESC, floating_chip_ratio ASC, profit_chip_ratio ASC",
        ),
    }
}

fn strategy_insert_sql(strategy: ChipStrategy) -> String {
    let (filter, order) = strategy_tail(strategy);
    format!(
        r#"
        INSERT INTO stock_chip_analysis (
            stock_code, stock_name, industry, analysis_date, strategy_type,
            close_price, ma60, vwap, profit_chip_ratio, locked_chip_ratio,
            main_chip_ratio, floating_chip_ratio, rank_num
        )
        {base}
        SELECT
            stock_code, stock_name, industry, ?1, '{strategy}',
            close_price, ma60, vwap, profit_chip_ratio, locked_chip_ratio,
            main_chip_ratio, floating_chip_ratio,
            ROW_NUMBER() OVER (ORDER BY {order}) AS rank_num
        FROM latest_data
        WHERE {filter}
        LIMIT 50
        "#,
        base = CHIP_BASE,
        strategy = strategy.as_str(),
        order = order,
        filter = filter,
    )
}

/// Run the daily chip analysis for the latest trade date. Returns false
/// when there is nothing to do (no data, or already analyzed today).
pub async fn update_chip_analysis(db: &Database) -> Result<bool> {
    let start_time = Utc::now();

    let latest_date = match db.latest_trade_date().await? {
        Some(date) => date,
        None => {
            error!("No trade data found, skipping chip analysis");
            return Ok(false);
        }
    };
    info!("Latest trade date: {}", latest_date);

    let (stock_count, earliest) = db.quote_coverage().await?;
    if stock_count == 0 {
        error!("Not enough historical data for chip analysis");
        return Ok(false);
    }
    info!(
        "Data coverage: {} stocks, {} to {}",
        stock_count,
        earliest.map(|d| d.to_string()).unwrap_or_default(),
        latest_date
    );

    if db.has_chip_analysis(latest_date).await? {
        info!("Chip analysis for {} already exists, skipping", latest_date);
        return Ok(false);
    }
    db.delete_chip_analysis(latest_date).await?;

    let mut total_rows = 0u64;
    for strategy in ChipStrategy::ALL {
        info!("Running {} strategy analysis...", strategy.as_str());
        let sql = strategy_insert_sql(strategy);
        let result = sqlx::query(&sql)
            .bind(latest_date)
            .execute(db.pool())
            .await?;
        total_rows += result.rows_affected();
    }

    db.log_update(
        "stock_chip_analysis",
        "DAILY",
        start_time,
        "SUCCESS",
        total_rows as i64,
        None,
    )
    .await?;

    info!("Chip analysis updated: {} rows", total_rows);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_sql_is_parameterized() {
        for strategy in ChipStrategy::ALL {
            let sql = strategy_insert_sql(strategy);
            assert!(sql.contains("?1"));
            assert!(sql.contains(strategy.as_str()));
            assert!(sql.contains("ROW_NUMBER() OVER"));
            assert!(sql.contains("LIMIT 50"));
        }
    }
}
