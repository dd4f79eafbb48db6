//! Ranking endpoints over the analytics tables: technical scores, daily
//! recommendations and chip-distribution lists.

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::Row;
use std::sync::Arc;

use super::error::{ApiError, ApiResult};
use super::AppState;
use crate::models::ChipStrategy;

#[derive(Debug, Deserialize)]
pub struct ScoresQuery {
    pub date: Option<String>,
    pub limit: Option<i64>,
}

fn parse_date(raw: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| ApiError::BadRequest(format!("invalid date: {}", raw)))
}

/// GET /api/technical/scores?date=&limit=
pub async fn get_technical_scores(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ScoresQuery>,
) -> ApiResult<Json<Value>> {
    let limit = query.limit.unwrap_or(50);
    let date = match &query.date {
        Some(raw) => Some(parse_date(raw)?),
        None => None,
    };

    let sql = r#"
        SELECT s.stock_code, s.stock_name, s.industry,
               ts.score_date, ts.total_score, ts.trend_score, ts.momentum_score,
               ts.volatility_score, ts.volume_score, ts.bollinger_score,
               ts.ma5, ts.ma20, ts.ma60, ts.vol_ma5, ts.vol_ma20,
               ts.volatility, ts.boll_upper, ts.boll_lower,
               ts.macd, ts.macd_signal,
               q.close_price,
               q.change_ratio
        FROM stock_technical_scores ts
        JOIN stocks s ON ts.stock_code = s.stock_code
        JOIN stock_historical_quotes q ON ts.stock_code = q.stock_code
            AND ts.score_date = q.trade_date
        WHERE ts.score_date = COALESCE(?1, (SELECT MAX(score_date) FROM stock_technical_scores))
        ORDER BY ts.total_score DESC
        LIMIT ?2
    "#;

    let rows = sqlx::query(sql)
        .bind(date)
        .bind(limit)
        .fetch_all(state.db.pool())
        .await?;

    let mut response_date: Option<String> = query.date.clone();
    let scores: Vec<Value> = rows
        .iter()
        .map(|r| {
            let close_price: f64 = r.get("close_price");
            let ma5: Option<f64> = r.get("ma5");
            let ma20: Option<f64> = r.get("ma20");
            let ma60: Option<f64> = r.get("ma60");
            let vol_ma5: Option<f64> = r.get("vol_ma5");
            let vol_ma20: Option<f64> = r.get("vol_ma20");
            let volatility: Option<f64> = r.get("volatility");
            let boll_upper: Option<f64> = r.get("boll_upper");
            let boll_lower: Option<f64> = r.get("boll_lower");
            let macd: Option<f64> = r.get("macd");
            let macd_signal: Option<f64> = r.get("macd_signal");
            let score_date: NaiveDate = r.get("score_date");
            if response_date.is_none() {
                response_date = Some(score_date.to_string());
            }

            let trend_status = match (ma5, ma20, ma60) {
                (Some(m5), Some(m20), Some(m60)) if m5 > m20 && m20 > m60 => "strong_uptrend",
                (Some(m5), Some(m20), _) if m5 > m20 => "short_term_up",
                (_, Some(m20), _) if close_price > m20 => "consolidation",
                _ => "weak",
            };
            let momentum_status = match (macd, macd_signal) {
                (Some(m), Some(s)) if m > s => "golden_cross",
                _ => "death_cross",
            };
            let volume_status = match (vol_ma5, vol_ma20) {
                (Some(v5), Some(v20)) if v5 > v20 * 1.2 => "expanding",
                (Some(v5), Some(v20)) if v5 < v20 * 0.8 => "shrinking",
                _ => "normal",
            };
            let volatility_status = match volatility {
                Some(v) if v > 3.0 => "high",
                Some(v) if v > 1.5 => "medium",
                _ => "calm",
            };
            let bollinger_status = match (boll_upper, boll_lower) {
                (Some(upper), _) if close_price > upper => "overbought",
                (_, Some(lower)) if close_price < lower => "oversold",
                _ => "normal",
            };

            json!({
                "stock_code": r.get::<String, _>("stock_code"),
                "stock_name": r.get::<String, _>("stock_name"),
                "industry": r.get::<Option<String>, _>("industry"),
                "current_price": close_price,
                "change_ratio": r.get::<Option<f64>, _>("change_ratio"),
                "total_score": r.get::<i64, _>("total_score"),
                "trend_analysis": {
                    "score": r.get::<i64, _>("trend_score"),
                    "ma5": ma5,
                    "ma20": ma20,
                    "ma60": ma60,
                    "status": trend_status,
                },
                "momentum_analysis": {
                    "score": r.get::<i64, _>("momentum_score"),
                    "macd": macd,
                    "macd_signal": macd_signal,
                    "status": momentum_status,
                },
                "volume_analysis": {
                    "score": r.get::<i64, _>("volume_score"),
                    "vol_ma5": vol_ma5,
                    "vol_ma20": vol_ma20,
                    "status": volume_status,
                },
                "volatility_analysis": {
                    "score": r.get::<i64, _>("volatility_score"),
                    "volatility": volatility,
                    "status": volatility_status,
                },
                "bollinger_analysis": {
                    "score": r.get::<i64, _>("bollinger_score"),
                    "upper": boll_upper,
                    "lower": boll_lower,
                    "status": bollinger_status,
                },
            })
        })
        .collect();

    Ok(Json(json!({
        "date": response_date,
        "scores": scores,
    })))
}

#[derive(Debug, Deserialize)]
pub struct RecommendationQuery {
    pub date: Option<String>,
}

/// GET /api/technical/recommendations?date=
pub async fn get_recommendations(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RecommendationQuery>,
) -> ApiResult<Json<Value>> {
    let pool = state.db.pool();

    let date = match &query.date {
        Some(raw) => Some(parse_date(raw)?),
        None => None,
    };

    let rows = sqlx::query(
        r#"
        SELECT recommend_date, stock_code, stock_name, industry,
               current_price, total_score, recommendation_level, reasons
        FROM stock_recommendations
        WHERE recommend_date = COALESCE(?1, (SELECT MAX(recommend_date) FROM stock_recommendations))
        ORDER BY total_score DESC
        "#,
    )
    .bind(date)
    .fetch_all(pool)
    .await?;

    if rows.is_empty() {
        if let Some(wanted) = date {
            let available = sqlx::query(
                "SELECT DISTINCT recommend_date FROM stock_recommendations
                 ORDER BY recommend_date DESC LIMIT 10",
            )
            .fetch_all(pool)
            .await?;
            let dates: Vec<String> = available
                .iter()
                .map(|r| r.get::<NaiveDate, _>("recommend_date").to_string())
                .collect();
            return Err(ApiError::NotFoundWith(json!({
                "error": format!("No data available for {}", wanted),
                "available_dates": dates,
            })));
        }
    }

    let recommendations: Vec<Value> = rows
        .iter()
        .map(|r| {
            json!({
                "recommend_date": r.get::<NaiveDate, _>("recommend_date").to_string(),
                "stock_code": r.get::<String, _>("stock_code"),
                "stock_name": r.get::<String, _>("stock_name"),
                "industry": r.get::<Option<String>, _>("industry"),
                "current_price": r.get::<f64, _>("current_price"),
                "total_score": r.get::<i64, _>("total_score"),
                "recommendation_level": r.get::<String, _>("recommendation_level"),
                "reasons": r.get::<String, _>("reasons"),
            })
        })
        .collect();

    let response_date = rows
        .first()
        .map(|r| r.get::<NaiveDate, _>("recommend_date").to_string());

    Ok(Json(json!({
        "date": response_date,
        "recommendations": recommendations,
    })))
}

#[derive(Debug, Deserialize)]
pub struct ChipQuery {
    pub date: Option<String>,
    #[serde(rename = "type")]
    pub strategy: Option<String>,
}

/// GET /api/chip/analysis?date=&type=buy_dip|follow_up|potential
pub async fn get_chip_analysis(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ChipQuery>,
) -> ApiResult<Json<Value>> {
    let pool = state.db.pool();
    let strategy = ChipStrategy::from_param(query.strategy.as_deref().unwrap_or("buy_dip"));

    let date = match &query.date {
        Some(raw) => parse_date(raw)?,
        None => {
            let row = sqlx::query("SELECT MAX(analysis_date) AS latest FROM stock_chip_analysis")
                .fetch_one(pool)
                .await?;
            row.get::<Option<NaiveDate>, _>("latest")
                .ok_or_else(|| ApiError::NotFound("no analysis data".to_string()))?
        }
    };

    let rows = sqlx::query(
        r#"
        SELECT stock_code, stock_name, industry, close_price, ma60, vwap,
               main_chip_ratio, profit_chip_ratio, locked_chip_ratio,
               floating_chip_ratio, rank_num
        FROM stock_chip_analysis
        WHERE analysis_date = ? AND strategy_type = ?
        ORDER BY rank_num ASC
        LIMIT 50
        "#,
    )
    .bind(date)
    .bind(strategy.as_str())
    .fetch_all(pool)
    .await?;

    if rows.is_empty() {
        return Err(ApiError::NotFound("no data for selected date".to_string()));
    }

    let pct = |value: Option<f64>| value.map(|v| format!("{:.2}", v * 100.0));

    let stocks: Vec<Value> = rows
        .iter()
        .map(|r| {
            let main: Option<f64> = r.get("main_chip_ratio");
            let profit: Option<f64> = r.get("profit_chip_ratio");
            let locked: Option<f64> = r.get("locked_chip_ratio");
            let floating: Option<f64> = r.get("floating_chip_ratio");
            json!({
                "stock_code": r.get::<String, _>("stock_code"),
                "stock_name": r.get::<String, _>("stock_name"),
                "industry": r.get::<Option<String>, _>("industry"),
                "close_price": r.get::<f64, _>("close_price"),
                "ma60": r.get::<Option<f64>, _>("ma60"),
                "vwap": r.get::<Option<f64>, _>("vwap"),
                "main_chip_ratio": main,
                "main_chip_ratio_display": pct(main),
                "profit_chip_ratio": profit,
                "profit_chip_ratio_display": pct(profit),
                "locked_chip_ratio": locked,
                "locked_chip_ratio_display": pct(locked),
                "floating_chip_ratio": floating,
                "floating_chip_ratio_display": pct(floating),
                "rank_num": r.get::<i64, _>("rank_num"),
            })
        })
        .collect();

    Ok(Json(json!({
        "date": date.to_string(),
        "stocks": stocks,
    })))
}
