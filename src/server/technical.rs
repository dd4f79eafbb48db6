//! Technical analysis endpoints: each runs one parameterized
//! window-function query against the historical quote table.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::{Row, SqlitePool};
use std::sync::Arc;

use super::error::{ApiError, ApiResult};
use super::AppState;

#[derive(Debug, Deserialize)]
pub struct DateQuery {
    pub date: Option<String>,
}

pub(crate) fn require_date(query: &DateQuery) -> Result<NaiveDate, ApiError> {
    let raw = query
        .date
        .as_deref()
        .ok_or_else(|| ApiError::BadRequest("date is required".to_string()))?;
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| ApiError::BadRequest(format!("invalid date: {}", raw)))
}

// ----------------------------------------------------------------------
// moving averages
// ----------------------------------------------------------------------

#[derive(Debug)]
pub(crate) struct MaRow {
    pub trade_date: NaiveDate,
    pub ma_5: Option<f64>,
    pub ma_10: Option<f64>,
    pub ma_20: Option<f64>,
    pub ma_60: Option<f64>,
    pub ma_100: Option<f64>,
    pub ma_200: Option<f64>,
}

pub(crate) async fn fetch_moving_averages(
    pool: &SqlitePool,
    stock_code: &str,
    date: NaiveDate,
) -> anyhow::Result<Option<MaRow>> {
    let row = sqlx::query(
        r#"
        WITH ma_calculation AS (
            SELECT stock_code, trade_date,
                AVG(close_price) OVER (PARTITION BY stock_code ORDER BY trade_date
                    ROWS BETWEEN 4 PRECEDING AND CURRENT ROW) AS ma_5,
                AVG(close_price) OVER (PARTITION BY stock_code ORDER BY trade_date
                    ROWS BETWEEN 9 PRECEDING AND CURRENT ROW) AS ma_10,
                AVG(close_price) OVER (PARTITION BY stock_code ORDER BY trade_date
                    ROWS BETWEEN 19 PRECEDING AND CURRENT ROW) AS ma_20,
                AVG(close_price) OVER (PARTITION BY stock_code ORDER BY trade_date
                    ROWS BETWEEN 59 PRECEDING AND CURRENT ROW) AS ma_60,
                AVG(close_price) OVER (PARTITION BY stock_code ORDER BY trade_date
                    ROWS BETWEEN 99 PRECEDING AND CURRENT ROW) AS ma_100,
                AVG(close_price) OVER (PARTITION BY stock_code ORDER BY trade_date
                    ROWS BETWEEN 199 PRECEDING AND CURRENT ROW) AS ma_200
            FROM stock_historical_quotes
            WHERE stock_code = ?1
        )
        SELECT trade_date, ma_5, ma_10, ma_20, ma_60, ma_100, ma_200
        FROM ma_calculation
        WHERE trade_date = ?2
        "#,
    )
    .bind(stock_code)
    .bind(date)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| MaRow {
        trade_date: r.get("trade_date"),
        ma_5: r.get("ma_5"),
        ma_10: r.get("ma_10"),
        ma_20: r.get("ma_20"),
        ma_60: r.get("ma_60"),
        ma_100: r.get("ma_100"),
        ma_200: r.get("ma_200"),
    }))
}

/// GET /api/technical/ma/{code}?date=YYYY-MM-DD
pub async fn get_moving_averages(
    State(state): State<Arc<AppState>>,
    Path(stock_code): Path<String>,
    Query(query): Query<DateQuery>,
) -> ApiResult<Json<Value>> {
    let date = require_date(&query)?;
    let row = fetch_moving_averages(state.db.pool(), &stock_code, date)
        .await?
        .ok_or_else(|| ApiError::NotFound("no data found".to_string()))?;

    Ok(Json(json!({
        "stock_code": stock_code,
        "trade_date": row.trade_date.to_string(),
        "ma_5": row.ma_5,
        "ma_10": row.ma_10,
        "ma_20": row.ma_20,
        "ma_60": row.ma_60,
        "ma_100": row.ma_100,
        "ma_200": row.ma_200,
    })))
}

// ----------------------------------------------------------------------
// MA5/MA20 crossovers
// ----------------------------------------------------------------------

#[derive(Debug)]
pub(crate) struct CrossRow {
    pub trade_date: NaiveDate,
    pub ma_5: Option<f64>,
    pub ma_20: Option<f64>,
    pub cross_type: String,
    pub cross_strength: Option<f64>,
    pub ma_5_trend: Option<f64>,
    pub ma_20_trend: Option<f64>,
    pub volume_ratio: Option<f64>,
    pub reliability_score: i64,
}

pub(crate) async fn fetch_crossover(
    pool: &SqlitePool,
    stock_code: &str,
    date: NaiveDate,
) -> anyhow::Result<Option<CrossRow>> {
    let row = sqlx::query(
        r#"
        WITH moving_averages AS (
            SELECT
                stock_code,
                trade_date,
                close_price,
                volume,
                AVG(close_price) OVER (PARTITION BY stock_code ORDER BY trade_date
                    ROWS BETWEEN 4 PRECEDING AND CURRENT ROW) AS ma_5,
                AVG(close_price) OVER (PARTITION BY stock_code ORDER BY trade_date
                    ROWS BETWEEN 19 PRECEDING AND CURRENT ROW) AS ma_20,
                AVG(volume) OVER (PARTITION BY stock_code ORDER BY trade_date
                    ROWS BETWEEN 19 PRECEDING AND CURRENT ROW) AS volume_ma20
            FROM stock_historical_quotes
            WHERE stock_code = ?1
                AND trade_date >= date(?2, '-30 days')
        ),
        crossover_analysis AS (
            SELECT
                m.*,
                LAG(ma_5) OVER (PARTITION BY stock_code ORDER BY trade_date) AS prev_ma_5,
                LAG(ma_20) OVER (PARTITION BY stock_code ORDER BY trade_date) AS prev_ma_20,
                ABS(ma_5 - ma_20) / NULLIF(ma_20, 0) * 100 AS cross_strength,
                (ma_5 - LAG(ma_5, 5) OVER (PARTITION BY stock_code ORDER BY trade_date))
                    / NULLIF(LAG(ma_5, 5) OVER (PARTITION BY stock_code ORDER BY trade_date), 0)
                    * 100 AS ma_5_change,
                (ma_20 - LAG(ma_20, 5) OVER (PARTITION BY stock_code ORDER BY trade_date))
                    / NULLIF(LAG(ma_20, 5) OVER (PARTITION BY stock_code ORDER BY trade_date), 0)
                    * 100 AS ma_20_change,
                volume / NULLIF(volume_ma20, 0) AS volume_ratio
            FROM moving_averages m
        )
        SELECT
            trade_date,
            ROUND(ma_5, 2) AS ma_5,
            ROUND(ma_20, 2) AS ma_20,
            ROUND(cross_strength, 2) AS cross_strength_pct,
            ROUND(ma_5_change, 2) AS ma_5_trend,
            ROUND(ma_20_change, 2) AS ma_20_trend,
            ROUND(volume_ratio, 2) AS volume_ratio,
            CASE
                WHEN prev_ma_5 < prev_ma_20 AND ma_5 > ma_20 THEN
                    CASE
                        WHEN cross_strength >= 1 AND ma_5_change > 0 AND volume_ratio >= 1.5
                            THEN 'strong_golden_cross'
                        WHEN cross_strength >= 0.5 AND ma_5_change > 0 THEN 'golden_cross'
                        ELSE 'weak_golden_cross'
                    END
                WHEN prev_ma_5 > prev_ma_20 AND ma_5 < ma_20 THEN
                    CASE
                        WHEN cross_strength >= 1 AND ma_5_change < 0 AND volume_ratio >= 1.5
                            THEN 'strong_death_cross'
                        WHEN cross_strength >= 0.5 AND ma_5_change < 0 THEN 'death_cross'
                        ELSE 'weak_death_cross'
                    END
                ELSE 'none'
            END AS cross_type,
            CASE
                WHEN cross_strength >= 1 THEN 30
                WHEN cross_strength >= 0.5 THEN 20
                WHEN cross_strength >= 0.3 THEN 10
                ELSE 0
            END +
            CASE
                WHEN (prev_ma_5 < prev_ma_20 AND ma_5 > ma_20 AND ma_5_change > 0 AND ma_20_change > 0) OR
                     (prev_ma_5 > prev_ma_20 AND ma_5 < ma_20 AND ma_5_change < 0 AND ma_20_change < 0)
                THEN 30
                WHEN (prev_ma_5 < prev_ma_20 AND ma_5 > ma_20 AND ma_5_change > 0) OR
                     (prev_ma_5 > prev_ma_20 AND ma_5 < ma_20 AND ma_5_change < 0)
                THEN 20
                ELSE 10
            END +
            CASE
                WHEN volume_ratio >= 2 THEN 20
                WHEN volume_ratio >= 1.5 THEN 15
                WHEN volume_ratio >= 1 THEN 10
                ELSE 0
            END +
            CASE
                WHEN cross_strength <= 3 THEN 20
                WHEN cross_strength <= 5 THEN 15
                WHEN cross_strength <= 8 THEN 10
                ELSE 5
            END AS reliability_score
        FROM crossover_analysis
        WHERE trade_date = ?2
        "#,
    )
    .bind(stock_code)
    .bind(date)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| CrossRow {
        trade_date: r.get("trade_date"),
        ma_5: r.get("ma_5"),
        ma_20: r.get("ma_20"),
        cross_type: r.get("cross_type"),
        cross_strength: r.get("cross_strength_pct"),
        ma_5_trend: r.get("ma_5_trend"),
        ma_20_trend: r.get("ma_20_trend"),
        volume_ratio: r.get("volume_ratio"),
        reliability_score: r.get("reliability_score"),
    }))
}

/// GET /api/technical/cross/{code}?date=YYYY-MM-DD
pub async fn get_crossovers(
    State(state): State<Arc<AppState>>,
    Path(stock_code): Path<String>,
    Query(query): Query<DateQuery>,
) -> ApiResult<Json<Value>> {
    let date = require_date(&query)?;
    let row = fetch_crossover(state.db.pool(), &stock_code, date)
        .await?
        .ok_or_else(|| ApiError::NotFound("no data found".to_string()))?;

    Ok(Json(json!({
        "stock_code": stock_code,
        "trade_date": row.trade_date.to_string(),
        "ma_5": row.ma_5,
        "ma_20": row.ma_20,
        "cross_type": row.cross_type,
        "cross_strength": row.cross_strength,
        "ma_5_trend": row.ma_5_trend,
        "ma_20_trend": row.ma_20_trend,
        "volume_ratio": row.volume_ratio,
        "reliability_score": row.reliability_score,
    })))
}

// ----------------------------------------------------------------------
// three consecutive bullish candles
// ----------------------------------------------------------------------

#[derive(Debug)]
pub(crate) struct ThreeBullishRow {
    pub day3: NaiveDate,
    pub day3_gain: Option<f64>,
    pub day2_gain: Option<f64>,
    pub day1_gain: Option<f64>,
    pub total_gain: Option<f64>,
    pub volume_ratio: Option<f64>,
    pub pattern_type: String,
    pub reliability_score: i64,
    pub pattern_strength: String,
}

pub(crate) async fn fetch_three_bullish(
    pool: &SqlitePool,
    stock_code: &str,
    date: NaiveDate,
) -> anyhow::Result<Option<ThreeBullishRow>> {
    let row = sqlx::query(
        r#"
        WITH continuous_trading_days AS (
            SELECT
                a.stock_code,
                a.trade_date AS cur_date,
                (
                    SELECT MAX(trade_date)
                    FROM stock_historical_quotes b
                    WHERE b.stock_code = a.stock_code
                        AND b.trade_date < a.trade_date
                        AND b.trade_date >= date(a.trade_date, '-7 days')
                ) AS prev_date1,
                (
                    SELECT MAX(trade_date)
                    FROM stock_historical_quotes b
                    WHERE b.stock_code = a.stock_code
                        AND b.trade_date < (
                            SELECT MAX(trade_date)
                            FROM stock_historical_quotes c
                            WHERE c.stock_code = a.stock_code
                                AND c.trade_date < a.trade_date
                                AND c.trade_date >= date(a.trade_date, '-7 days')
                        )
                        AND b.trade_date >= date(a.trade_date, '-7 days')
                ) AS prev_date2
            FROM stock_historical_quotes a
            WHERE a.stock_code = ?1
                AND a.trade_date = ?2
        ),
        three_days_data AS (
            SELECT
                t.stock_code,
                c.trade_date,
                ABS(c.close_price - c.open_price) / c.open_price * 100 AS today_body,
                ABS(p1.close_price - p1.open_price) / p1.open_price * 100 AS prev1_body,
                ABS(p2.close_price - p2.open_price) / p2.open_price * 100 AS prev2_body,
                (c.close_price - c.open_price) / c.open_price * 100 AS today_gain,
                (p1.close_price - p1.open_price) / p1.open_price * 100 AS prev1_gain,
                (p2.close_price - p2.open_price) / p2.open_price * 100 AS prev2_gain,
                CAST(c.volume AS REAL) / NULLIF(p1.volume, 0) AS vol_ratio1,
                CASE WHEN c.close_price > c.open_price THEN 1 ELSE 0 END AS today_bullish,
                CASE WHEN p1.close_price > p1.open_price THEN 1 ELSE 0 END AS prev1_bullish,
                CASE WHEN p2.close_price > p2.open_price THEN 1 ELSE 0 END AS prev2_bullish,
                (c.close_price - p2.open_price) / p2.open_price * 100 AS total_gain
            FROM continuous_trading_days t
            JOIN stock_historical_quotes c ON t.stock_code = c.stock_code
                AND t.cur_date = c.trade_date
            LEFT JOIN stock_historical_quotes p1 ON t.stock_code = p1.stock_code
                AND t.prev_date1 = p1.trade_date
            LEFT JOIN stock_historical_quotes p2 ON t.stock_code = p2.stock_code
                AND t.prev_date2 = p2.trade_date
        )
        SELECT
            trade_date AS day3,
            ROUND(today_gain, 2) AS day3_gain,
            ROUND(prev1_gain, 2) AS day2_gain,
            ROUND(prev2_gain, 2) AS day1_gain,
            ROUND(total_gain, 2) AS total_gain,
            ROUND(vol_ratio1, 2) AS latest_vol_ratio,
            CASE
                WHEN today_bullish = 1 AND prev1_bullish = 1 AND prev2_bullish = 1
                THEN 'three_bullish'
                ELSE 'none'
            END AS pattern_type,
            CASE
                WHEN today_body >= 2 AND prev1_body >= 2 AND prev2_body >= 2 THEN 30
                WHEN today_body >= 1 AND prev1_body >= 1 AND prev2_body >= 1 THEN 20
                ELSE 10
            END +
            CASE
                WHEN total_gain >= 6 THEN 30
                WHEN total_gain >= 4 THEN 20
                WHEN total_gain >= 2 THEN 10
                ELSE 5
            END +
            CASE
                WHEN today_gain > prev1_gain AND prev1_gain > prev2_gain THEN 20
                WHEN today_gain > prev1_gain OR prev1_gain > prev2_gain THEN 10
                ELSE 5
            END +
            CASE
                WHEN vol_ratio1 > 1.5 THEN 20
                WHEN vol_ratio1 > 1.2 THEN 15
                WHEN vol_ratio1 > 1 THEN 10
                ELSE 5
            END AS reliability_score,
            CASE
                WHEN today_bullish = 1 AND prev1_bullish = 1 AND prev2_bullish = 1 THEN
                    CASE
                        WHEN total_gain >= 6 AND vol_ratio1 > 1.5 THEN 'strong'
                        WHEN total_gain >= 4 AND vol_ratio1 > 1.2 THEN 'standard'
                        ELSE 'weak'
                    END
                ELSE 'none'
            END AS pattern_strength
        FROM three_days_data
        "#,
    )
    .bind(stock_code)
    .bind(date)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| ThreeBullishRow {
        day3: r.get("day3"),
        day3_gain: r.get("day3_gain"),
        day2_gain: r.get("day2_gain"),
        day1_gain: r.get("day1_gain"),
        total_gain: r.get("total_gain"),
        volume_ratio: r.get("latest_vol_ratio"),
        pattern_type: r.get("pattern_type"),
        reliability_score: r.get("reliability_score"),
        pattern_strength: r.get("pattern_strength"),
    }))
}

/// GET /api/technical/three-bullish/{code}?date=YYYY-MM-DD
pub async fn get_three_bullish(
    State(state): State<Arc<AppState>>,
    Path(stock_code): Path<String>,
    Query(query): Query<DateQuery>,
) -> ApiResult<Json<Value>> {
    let date = require_date(&query)?;
    let row = fetch_three_bullish(state.db.pool(), &stock_code, date)
        .await?
        .ok_or_else(|| ApiError::NotFound("no data found".to_string()))?;

    Ok(Json(json!({
        "stock_code": stock_code,
        "day3": row.day3.to_string(),
        "day3_gain": row.day3_gain,
        "day2_gain": row.day2_gain,
        "day1_gain": row.day1_gain,
        "total_gain": row.total_gain,
        "volume_ratio": row.volume_ratio,
        "pattern_type": row.pattern_type,
        "reliability_score": row.reliability_score,
        "pattern_strength": row.pattern_strength,
    })))
}

// ----------------------------------------------------------------------
// engulfing pattern
// ----------------------------------------------------------------------

#[derive(Debug)]
pub(crate) struct EngulfingRow {
    pub trade_date: NaiveDate,
    pub prev_date: Option<NaiveDate>,
    pub engulfing_type: Option<String>,
    pub reliability_score: i64,
    pub reliability_level: String,
}

pub(crate) async fn fetch_engulfing(
    pool: &SqlitePool,
    stock_code: &str,
    date: NaiveDate,
) -> anyhow::Result<Option<EngulfingRow>> {
    let row = sqlx::query(
        r#"
        WITH continuous_trading_days AS (
            SELECT
                a.stock_code,
                a.trade_date AS cur_date,
                MAX(b.trade_date) AS prev_date
            FROM stock_historical_quotes a
            LEFT JOIN stock_historical_quotes b ON a.stock_code = b.stock_code
                AND b.trade_date < a.trade_date
                AND b.trade_date >= date(a.trade_date, '-7 days')
            WHERE a.stock_code = ?1
                AND a.trade_date = ?2
            GROUP BY a.stock_code, a.trade_date
        ),
        pattern_analysis AS (
            SELECT
                c.stock_code,
                c.trade_date,
                c.open_price,
                c.close_price,
                c.high_price,
                c.low_price,
                ABS(c.close_price - c.open_price) AS body_length,
                c.high_price - MAX(c.open_price, c.close_price) AS upper_shadow,
                MIN(c.open_price, c.close_price) - c.low_price AS lower_shadow,
                (c.high_price - c.low_price) / c.low_price * 100 AS price_range,
                CAST(c.volume AS REAL) / NULLIF(p.volume, 0) AS volume_ratio,
                p.open_price AS prev_open,
                p.close_price AS prev_close,
                p.trade_date AS prev_date
            FROM continuous_trading_days t
            JOIN stock_historical_quotes c ON t.stock_code = c.stock_code
                AND t.cur_date = c.trade_date
            JOIN stock_historical_quotes p ON t.stock_code = p.stock_code
                AND t.prev_date = p.trade_date
        ),
        reliability AS (
            SELECT
                trade_date,
                stock_code,
                prev_date,
                CASE
                    WHEN body_length / NULLIF((high_price - low_price), 0) > 0.7 THEN 25
                    WHEN body_length / NULLIF((high_price - low_price), 0) > 0.5 THEN 20
                    WHEN body_length / NULLIF((high_price - low_price), 0) > 0.3 THEN 10
                    ELSE 5
                END +
                CASE
                    WHEN COALESCE(volume_ratio, 0) > 2 THEN 25
                    WHEN COALESCE(volume_ratio, 0) > 1.5 THEN 20
                    WHEN COALESCE(volume_ratio, 0) > 1 THEN 15
                    ELSE 10
                END +
                CASE
                    WHEN price_range BETWEEN 2 AND 5 THEN 20
                    WHEN price_range BETWEEN 1 AND 7 THEN 15
                    ELSE 10
                END +
                CASE
                    WHEN upper_shadow < body_length * 0.3
                         AND lower_shadow < body_length * 0.3 THEN 15
                    WHEN upper_shadow < body_length * 0.5
                         AND lower_shadow < body_length * 0.5 THEN 10
                    ELSE 5
                END +
                CASE
                    WHEN prev_close IS NOT NULL
                         AND ((prev_close < prev_open AND close_price > open_price
                              AND open_price < prev_close AND close_price > prev_open)
                          OR (prev_close > prev_open AND close_price < open_price
                              AND open_price > prev_close AND close_price < prev_open))
                    THEN 15
                    ELSE 0
                END AS reliability_score,
                CASE
                    WHEN prev_close < prev_open AND close_price > open_price
                         AND open_price < prev_close AND close_price > prev_open
                    THEN 'Bullish'
                    WHEN prev_close > prev_open AND close_price < open_price
                         AND open_price > prev_close AND close_price < prev_open
                    THEN 'Bearish'
                    ELSE NULL
                END AS engulfing_type
            FROM pattern_analysis
        )
        SELECT
            trade_date,
            prev_date,
            reliability_score,
            CASE
                WHEN reliability_score >= 90 THEN 'very_high'
                WHEN reliability_score >= 80 THEN 'high'
                WHEN reliability_score >= 70 THEN 'elevated'
                WHEN reliability_score >= 60 THEN 'medium'
                ELSE 'low'
            END AS reliability_level,
            engulfing_type
        FROM reliability
        "#,
    )
    .bind(stock_code)
    .bind(date)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| EngulfingRow {
        trade_date: r.get("trade_date"),
        prev_date: r.get("prev_date"),
        engulfing_type: r.get("engulfing_type"),
        reliability_score: r.get("reliability_score"),
        reliability_level: r.get("reliability_level"),
    }))
}

/// GET /api/technical/engulfing/{code}?date=YYYY-MM-DD
pub async fn get_engulfing(
    State(state): State<Arc<AppState>>,
    Path(stock_code): Path<String>,
    Query(query): Query<DateQuery>,
) -> ApiResult<Json<Value>> {
    let date = require_date(&query)?;
    let row = fetch_engulfing(state.db.pool(), &stock_code, date)
        .await?
        .ok_or_else(|| ApiError::NotFound("no data found".to_string()))?;

    Ok(Json(json!({
        "stock_code": stock_code,
        "current_date": row.trade_date.to_string(),
        "previous_date": row.prev_date.map(|d| d.to_string()),
        "engulfing_type": row.engulfing_type,
        "reliability": row.reliability_score,
        "reliability_level": row.reliability_level,
    })))
}

// ----------------------------------------------------------------------
// support and resistance
// ----------------------------------------------------------------------

#[derive(Debug)]
pub(crate) struct SupportResistanceRow {
    pub trade_date: NaiveDate,
    pub min_price_5d: Option<f64>,
    pub min_price_10d: Option<f64>,
    pub min_price_20d: Option<f64>,
    pub max_price_5d: Option<f64>,
    pub max_price_10d: Option<f64>,
    pub max_price_20d: Option<f64>,
    pub vwap_20d: Option<f64>,
    pub support_strength: String,
    pub resistance_strength: String,
    pub price_position: String,
    pub price_range_position: String,
    pub volume_character: String,
    pub support_reliability: String,
    pub resistance_reliability: String,
}

pub(crate) async fn fetch_support_resistance(
    pool: &SqlitePool,
    stock_code: &str,
    date: NaiveDate,
) -> anyhow::Result<Option<SupportResistanceRow>> {
    let row = sqlx::query(
        r#"
        WITH price_levels AS (
            SELECT
                stock_code,
                trade_date,
                close_price,
                high_price,
                low_price,
                volume,
                MAX(high_price) OVER (PARTITION BY stock_code ORDER BY trade_date
                    ROWS BETWEEN 5 PRECEDING AND CURRENT ROW) AS max_price_5d,
                MIN(low_price) OVER (PARTITION BY stock_code ORDER BY trade_date
                    ROWS BETWEEN 5 PRECEDING AND CURRENT ROW) AS min_price_5d,
                MAX(high_price) OVER (PARTITION BY stock_code ORDER BY trade_date
                    ROWS BETWEEN 10 PRECEDING AND CURRENT ROW) AS max_price_10d,
                MIN(low_price) OVER (PARTITION BY stock_code ORDER BY trade_date
                    ROWS BETWEEN 10 PRECEDING AND CURRENT ROW) AS min_price_10d,
                MAX(high_price) OVER (PARTITION BY stock_code ORDER BY trade_date
                    ROWS BETWEEN 20 PRECEDING AND CURRENT ROW) AS max_price_20d,
                MIN(low_price) OVER (PARTITION BY stock_code ORDER BY trade_date
                    ROWS BETWEEN 20 PRECEDING AND CURRENT ROW) AS min_price_20d,
                SUM(close_price * volume) OVER (PARTITION BY stock_code ORDER BY trade_date
                    ROWS BETWEEN 20 PRECEDING AND CURRENT ROW)
                    / NULLIF(SUM(volume) OVER (PARTITION BY stock_code ORDER BY trade_date
                        ROWS BETWEEN 20 PRECEDING AND CURRENT ROW), 0) AS vwap_20d,
                AVG(volume) OVER (PARTITION BY stock_code ORDER BY trade_date
                    ROWS BETWEEN 20 PRECEDING AND CURRENT ROW) AS avg_volume_20d,
                (close_price - LAG(close_price, 20) OVER (PARTITION BY stock_code ORDER BY trade_date))
                    / NULLIF(LAG(close_price, 20) OVER (PARTITION BY stock_code ORDER BY trade_date), 0)
                    * 100 AS price_change_rate_20d
            FROM stock_historical_quotes
            WHERE stock_code = ?1
                AND trade_date >= date(?2, '-60 days')
        ),
        support_resistance_analysis AS (
            SELECT
                *,
                CASE
                    WHEN close_price > vwap_20d THEN 'above_vwap'
                    ELSE 'below_vwap'
                END AS price_position,
                CASE
                    WHEN low_price >= min_price_20d AND volume > avg_volume_20d * 1.5 THEN 'strong'
                    WHEN low_price >= min_price_20d THEN 'normal'
                    ELSE 'weak'
                END AS support_strength,
                CASE
                    WHEN high_price <= max_price_20d AND volume > avg_volume_20d * 1.5 THEN 'strong'
                    WHEN high_price <= max_price_20d THEN 'normal'
                    ELSE 'weak'
                END AS resistance_strength,
                CASE
                    WHEN close_price >= (max_price_20d + min_price_20d) / 2 THEN 'upper_half'
                    ELSE 'lower_half'
                END AS price_range_position,
                CASE
                    WHEN volume > avg_volume_20d * 1.5 THEN 'high_volume'
                    WHEN volume < avg_volume_20d * 0.7 THEN 'low_volume'
                    ELSE 'normal'
                END AS volume_character,
                (CASE
                    WHEN close_price <= min_price_5d THEN 30
                    WHEN close_price <= min_price_10d THEN 20
                    WHEN close_price <= min_price_20d THEN 10
                    ELSE 0
                END +
                CASE
                    WHEN volume > avg_volume_20d * 1.5 THEN 30
                    WHEN volume > avg_volume_20d * 1.2 THEN 20
                    WHEN volume > avg_volume_20d THEN 10
                    ELSE 0
                END +
                CASE
                    WHEN price_change_rate_20d <= -10 THEN 20
                    WHEN price_change_rate_20d <= -5 THEN 15
                    WHEN price_change_rate_20d <= 0 THEN 10
                    ELSE 5
                END +
                CASE
                    WHEN ABS(min_price_5d - min_price_20d) / min_price_20d * 100 <= 2 THEN 20
                    WHEN ABS(min_price_5d - min_price_20d) / min_price_20d * 100 <= 5 THEN 15
                    ELSE 10
                END) AS support_reliability_score,
                (CASE
                    WHEN close_price >= max_price_5d THEN 30
                    WHEN close_price >= max_price_10d THEN 20
                    WHEN close_price >= max_price_20d THEN 10
                    ELSE 0
                END +
                CASE
                    WHEN volume > avg_volume_20d * 1.5 THEN 30
                    WHEN volume > avg_volume_20d * 1.2 THEN 20
                    WHEN volume > avg_volume_20d THEN 10
                    ELSE 0
                END +
                CASE
                    WHEN price_change_rate_20d >= 10 THEN 20
                    WHEN price_change_rate_20d >= 5 THEN 15
                    WHEN price_change_rate_20d >= 0 THEN 10
                    ELSE 5
                END +
                CASE
                    WHEN ABS(max_price_5d - max_price_20d) / max_price_20d * 100 <= 2 THEN 20
                    WHEN ABS(max_price_5d - max_price_20d) / max_price_20d * 100 <= 5 THEN 15
                    ELSE 10
                END) AS resistance_reliability_score
            FROM price_levels
        )
        SELECT
            trade_date,
            min_price_5d, min_price_10d, min_price_20d,
            max_price_5d, max_price_10d, max_price_20d,
            vwap_20d,
            support_strength,
            resistance_strength,
            price_position,
            price_range_position,
            volume_character,
            CASE
                WHEN support_reliability_score >= 80 THEN 'very_strong'
                WHEN support_reliability_score >= 60 THEN 'strong'
                WHEN support_reliability_score >= 40 THEN 'normal'
                ELSE 'weak'
            END AS support_reliability,
            CASE
                WHEN resistance_reliability_score >= 80 THEN 'very_strong'
                WHEN resistance_reliability_score >= 60 THEN 'strong'
                WHEN resistance_reliability_score >= 40 THEN 'normal'
                ELSE 'weak'
            END AS resistance_reliability
        FROM support_resistance_analysis
        WHERE trade_date = ?2
        "#,
    )
    .bind(stock_code)
    .bind(date)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| SupportResistanceRow {
        trade_date: r.get("trade_date"),
        min_price_5d: r.get("min_price_5d"),
        min_price_10d: r.get("min_price_10d"),
        min_price_20d: r.get("min_price_20d"),
        max_price_5d: r.get("max_price_5d"),
        max_price_10d: r.get("max_price_10d"),
        max_price_20d: r.get("max_price_20d"),
        vwap_20d: r.get("vwap_20d"),
        support_strength: r.get("support_strength"),
        resistance_strength: r.get("resistance_strength"),
        price_position: r.get("price_position"),
        price_range_position: r.get("price_range_position"),
        volume_character: r.get("volume_character"),
        support_reliability: r.get("support_reliability"),
        resistance_reliability: r.get("resistance_reliability"),
    }))
}

/// GET /api/technical/support-resistance/{code}?date=YYYY-MM-DD
pub async fn get_support_resistance(
    State(state): State<Arc<AppState>>,
    Path(stock_code): Path<String>,
    Query(query): Query<DateQuery>,
) -> ApiResult<Json<Value>> {
    let date = require_date(&query)?;
    let row = fetch_support_resistance(state.db.pool(), &stock_code, date)
        .await?
        .ok_or_else(|| ApiError::NotFound("no data found".to_string()))?;

    Ok(Json(json!({
        "stock_code": stock_code,
        "trade_date": row.trade_date.to_string(),
        "support_levels": {
            "5d": row.min_price_5d,
            "10d": row.min_price_10d,
            "20d": row.min_price_20d,
        },
        "resistance_levels": {
            "5d": row.max_price_5d,
            "10d": row.max_price_10d,
            "20d": row.max_price_20d,
        },
        "vwap_20d": row.vwap_20d,
        "support_strength": row.support_strength,
        "resistance_strength": row.resistance_strength,
        "price_position": row.price_position,
        "price_range_position": row.price_range_position,
        "volume_character": row.volume_character,
        "support_reliability": row.support_reliability,
        "resistance_reliability": row.resistance_reliability,
    })))
}
