//! Daily technical scoring.
//!
//! Indicator math runs in Rust over per-stock price series (SQLite has no
//! stddev aggregate), using the same constants the scoring has always used:
//! trailing-row MAs, a two-term MACD smoothing with a 9-row signal average,
//! 20-row close volatility and ±2σ Bollinger bands. The top 50 stocks by
//! total score are stored per day.

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use sqlx::Row;
use std::collections::BTreeMap;
use tracing::{error, info};

use crate::database::Database;
use crate::models::TechnicalScore;

/// Indicator snapshot for the most recent bar of a series.
#[derive(Debug, Clone, PartialEq)]
pub struct Indicators {
    pub ma5: f64,
    pub ma20: f64,
    pub ma60: f64,
    pub vol_ma5: f64,
    pub vol_ma20: f64,
    pub volatility: f64,
    pub boll_upper: f64,
    pub boll_lower: f64,
    pub macd: f64,
    pub macd_signal: f64,
}

/// Mean of the trailing `n` values (or fewer when the series is short).
fn tail_mean(values: &[f64], n: usize) -> f64 {
    let window = &values[values.len().saturating_sub(n)..];
    window.iter().sum::<f64>() / window.len() as f64
}

/// Population standard deviation of the trailing `n` values.
fn tail_std(values: &[f64], n: usize) -> f64 {
    let window = &values[values.len().saturating_sub(n)..];
    let mean = window.iter().sum::<f64>() / window.len() as f64;
    let variance =
        window.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / window.len() as f64;
    variance.sqrt()
}

/// MACD line per bar: fast = (2·close + 11·prev)/13, slow = (2·close +
/// 25·prev)/27. The first bar has no predecessor and is skipped.
fn macd_series(closes: &[f64]) -> Vec<f64> {
    closes
        .windows(2)
        .map(|pair| {
            let (prev, close) = (pair[0], pair[1]);
            let fast = (2.0 * close + 11.0 * prev) / 13.0;
            let slow = (2.0 * close + 25.0 * prev) / 27.0;
            fast - slow
        })
        .collect()
}

/// Compute the indicator snapshot for the last bar of a close/volume series.
/// Returns None when the series is too short to say anything (fewer than
/// two bars).
pub fn compute_indicators(closes: &[f64], volumes: &[f64]) -> Option<Indicators> {
    if closes.len() < 2 || closes.len() != volumes.len() {
        return None;
    }

    let ma20 = tail_mean(closes, 20);
    let volatility = tail_std(closes, 20);
    let macd = macd_series(closes);
    let macd_last = *macd.last()?;
    let macd_signal = tail_mean(&macd, 9);

    Some(Indicators {
        ma5: tail_mean(closes, 5),
        ma20,
        ma60: tail_mean(closes, 60),
        vol_ma5: tail_mean(volumes, 5),
        vol_ma20: tail_mean(volumes, 20),
        volatility,
        boll_upper: ma20 + 2.0 * volatility,
        boll_lower: ma20 - 2.0 * volatility,
        macd: macd_last,
        macd_signal,
    })
}

/// Score one stock from its latest close and indicator snapshot.
/// Sub-scores: trend ≤40, momentum ≤40, volatility ≤10, volume ≤10,
/// bollinger ≤10.
pub fn score_stock(close: f64, ind: &Indicators) -> (i64, i64, i64, i64, i64) {
    let trend = if ind.ma5 > ind.ma20 && ind.ma20 > ind.ma60 {
        40
    } else if ind.ma5 > ind.ma20 {
        30
    } else if close > ind.ma20 {
        20
    } else {
        10
    };

    let momentum = if ind.macd > ind.macd_signal && close > ind.ma20 {
        40
    } else if ind.macd > ind.macd_signal {
        30
    } else if close < ind.ma20 {
        20
    } else {
        10
    };

    let volatility = if ind.volatility > 2.0 { 10 } else { 5 };
    let volume = if ind.vol_ma5 > ind.vol_ma20 { 10 } else { 5 };

    let bollinger = if close > ind.boll_upper {
        5
    } else if close < ind.boll_lower {
        10
    } else {
        0
    };

    (trend, momentum, volatility, volume, bollinger)
}

/// Recompute technical scores for the latest trade date and keep the top 50.
/// Returns false when no quote data exists.
pub async fn update_technical_scores(db: &Database) -> Result<bool> {
    let start_time = Utc::now();

    let latest_date = match db.latest_trade_date().await? {
        Some(date) => date,
        None => {
            error!("No trade data found, skipping technical scoring");
            return Ok(false);
        }
    };
    info!("Scoring technicals for {}", latest_date);

    // Trailing 60 calendar days of closes/volumes per stock, in date order.
    let rows = sqlx::query(
        r#"
        SELECT stock_code, trade_date, close_price, volume
        FROM stock_historical_quotes
        WHERE trade_date >= date(?1, '-60 days') AND trade_date <= ?1
        ORDER BY stock_code, trade_date
        "#,
    )
    .bind(latest_date)
    .fetch_all(db.pool())
    .await?;

    let mut series: BTreeMap<String, (Vec<f64>, Vec<f64>, NaiveDate)> = BTreeMap::new();
    for row in rows {
        let code: String = row.get("stock_code");
        let date: NaiveDate = row.get("trade_date");
        let close: f64 = row.get("close_price");
        let volume: i64 = row.get("volume");
        let entry = series.entry(code).or_insert_with(|| (Vec::new(), Vec::new(), date));
        entry.0.push(close);
        entry.1.push(volume as f64);
        entry.2 = date;
    }

    let mut scores: Vec<TechnicalScore> = Vec::new();
    for (code, (closes, volumes, last_date)) in &series {
        // only stocks that actually traded on the scoring date
        if *last_date != latest_date {
            continue;
        }
        let Some(ind) = compute_indicators(closes, volumes) else {
            continue;
        };
        let Some(&close) = closes.last() else {
            continue;
        };
        let (trend, momentum, volatility, volume, bollinger) = score_stock(close, &ind);

        scores.push(TechnicalScore {
            stock_code: code.clone(),
            score_date: latest_date,
            trend_score: trend,
            momentum_score: momentum,
            volatility_score: volatility,
            volume_score: volume,
            bollinger_score: bollinger,
            total_score: trend + momentum + volatility + volume + bollinger,
            ma5: ind.ma5,
            ma20: ind.ma20,
            ma60: ind.ma60,
            vol_ma5: ind.vol_ma5,
            vol_ma20: ind.vol_ma20,
            volatility: ind.volatility,
            boll_upper: ind.boll_upper,
            boll_lower: ind.boll_lower,
            macd: ind.macd,
            macd_signal: ind.macd_signal,
        });
    }

    scores.sort_by(|a, b| {
        b.total_score
            .cmp(&a.total_score)
            .then_with(|| a.stock_code.cmp(&b.stock_code))
    });
    scores.truncate(50);

    db.delete_technical_scores(latest_date).await?;
    for score in &scores {
        db.insert_technical_score(score).await?;
    }

    db.log_update(
        "stock_technical_scores",
        "DAILY",
        start_time,
        "SUCCESS",
        scores.len() as i64,
        None,
    )
    .await?;

    info!("Technical scores updated: {} stocks", scores.len());
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_tail_mean_short_series() {
        let values = [1.0, 2.0, 3.0];
        assert_eq!(tail_mean(&values, 5), 2.0);
        assert_eq!(tail_mean(&values, 2), 2.5);
    }

    #[test]
    fn test_tail_std_constant_series() {
        let values = [4.0; 20];
        assert_eq!(tail_std(&values, 20), 0.0);
    }

    #[test]
    fn test_macd_positive_on_uptrend() {
        // steadily rising closes: the fast term weighs today's close more
        // than the slow term, so the MACD line must be positive
        let closes: Vec<f64> = (1..=30).map(|i| i as f64).collect();
        let macd = macd_series(&closes);
        assert_eq!(macd.len(), 29);
        assert!(macd.iter().all(|m| *m > 0.0));
    }

    #[test]
    fn test_compute_indicators_rejects_short_series() {
        assert!(compute_indicators(&[10.0], &[100.0]).is_none());
        assert!(compute_indicators(&[10.0, 10.1], &[100.0]).is_none());
    }

    #[test]
    fn test_score_strong_uptrend() {
        // accelerating rally with rising volume: best trend and momentum
        // buckets (a linear rise keeps MACD flat against its signal)
        let closes: Vec<f64> = (1..=80).map(|i| 10.0 * 1.02f64.powi(i)).collect();
        let volumes: Vec<f64> = (1..=80).map(|i| 1000.0 + i as f64 * 50.0).collect();
        let ind = compute_indicators(&closes, &volumes).unwrap();
        let close = *closes.last().unwrap();

        let (trend, momentum, _, volume, _) = score_stock(close, &ind);
        assert_eq!(trend, 40);
        assert_eq!(momentum, 40);
        assert_eq!(volume, 10);
    }

    #[test]
    fn test_score_downtrend() {
        let closes: Vec<f64> = (1..=80).map(|i| 50.0 - i as f64 * 0.3).collect();
        let volumes: Vec<f64> = vec![1000.0; 80];
        let ind = compute_indicators(&closes, &volumes).unwrap();
        let close = *closes.last().unwrap();

        let (trend, momentum, _, _, _) = score_stock(close, &ind);
        assert_eq!(trend, 10); // ma5 < ma20 < ma60 and close below ma20
        assert_eq!(momentum, 20); // macd below signal, close below ma20
    }
}
