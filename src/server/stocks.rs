//! Stock detail, search and history endpoints.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::Row;
use std::sync::Arc;

use super::error::{ApiError, ApiResult};
use super::AppState;

/// GET /api/stocks/{code}/details
///
/// Basic info plus the latest row from the quote table and each metric
/// table. Missing sections come back as nulls rather than errors.
pub async fn get_stock_details(
    State(state): State<Arc<AppState>>,
    Path(stock_code): Path<String>,
) -> ApiResult<Json<Value>> {
    let db = &state.db;
    let stock = db
        .get_stock(&stock_code)
        .await?
        .ok_or_else(|| ApiError::NotFound("stock not found".to_string()))?;

    let quote = db.latest_quote(&stock_code).await?;

    let technical = sqlx::query(
        r#"
        SELECT current_price, high_52week, low_52week, avg_volume, ma_200, beta
        FROM technical_metrics
        WHERE stock_code = ?
        ORDER BY date DESC
        LIMIT 1
        "#,
    )
    .bind(&stock_code)
    .fetch_optional(db.pool())
    .await?;

    let fundamental = sqlx::query(
        r#"
        SELECT pe_ratio, pb_ratio, roe, revenue_growth, earnings_growth, dividend_yield
        FROM fundamental_metrics
        WHERE stock_code = ?
        ORDER BY date DESC
        LIMIT 1
        "#,
    )
    .bind(&stock_code)
    .fetch_optional(db.pool())
    .await?;

    let financial = sqlx::query(
        r#"
        SELECT quick_ratio, current_ratio, debt_to_equity, operating_cash_flow
        FROM financial_health
        WHERE stock_code = ?
        ORDER BY report_date DESC
        LIMIT 1
        "#,
    )
    .bind(&stock_code)
    .fetch_optional(db.pool())
    .await?;

    let investor = sqlx::query(
        r#"
        SELECT insider_holding, institution_holding
        FROM investor_metrics
        WHERE stock_code = ?
        ORDER BY date DESC
        LIMIT 1
        "#,
    )
    .bind(&stock_code)
    .fetch_optional(db.pool())
    .await?;

    let f64_of = |row: &Option<sqlx::sqlite::SqliteRow>, col: &str| -> Option<f64> {
        row.as_ref().and_then(|r| r.get::<Option<f64>, _>(col))
    };

    Ok(Json(json!({
        "basic": {
            "code": stock.stock_code,
            "name": stock.stock_name,
            "sector": stock.sector,
            "industry": stock.industry,
            "description": stock.description,
            "listingDate": stock.listing_date.map(|d| d.to_string()),
            "website": stock.website,
            "employees": stock.employees,
        },
        "quote": {
            "date": quote.as_ref().map(|q| q.trade_date.to_string()),
            "open": quote.as_ref().map(|q| q.open_price),
            "close": quote.as_ref().map(|q| q.close_price),
            "high": quote.as_ref().map(|q| q.high_price),
            "low": quote.as_ref().map(|q| q.low_price),
            "volume": quote.as_ref().map(|q| q.volume),
            "amount": quote.as_ref().and_then(|q| q.amount),
        },
        "technical": {
            "currentPrice": f64_of(&technical, "current_price"),
            "high52Week": f64_of(&technical, "high_52week"),
            "low52Week": f64_of(&technical, "low_52week"),
            "avgVolume": technical.as_ref().and_then(|r| r.get::<Option<i64>, _>("avg_volume")),
            "ma200": f64_of(&technical, "ma_200"),
            "beta": f64_of(&technical, "beta"),
        },
        "fundamental": {
            "peRatio": f64_of(&fundamental, "pe_ratio"),
            "pbRatio": f64_of(&fundamental, "pb_ratio"),
            "roe": f64_of(&fundamental, "roe"),
            "revenueGrowth": f64_of(&fundamental, "revenue_growth"),
            "earningsGrowth": f64_of(&fundamental, "earnings_growth"),
            "dividendYield": f64_of(&fundamental, "dividend_yield"),
        },
        "financial": {
            "quickRatio": f64_of(&financial, "quick_ratio"),
            "currentRatio": f64_of(&financial, "current_ratio"),
            "debtToEquity": f64_of(&financial, "debt_to_equity"),
            "operatingCashFlow": f64_of(&financial, "operating_cash_flow"),
        },
        "investor": {
            "insiderHolding": f64_of(&investor, "insider_holding"),
            "institutionHolding": f64_of(&investor, "institution_holding"),
        },
    })))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub keyword: Option<String>,
}

/// GET /api/stocks/search?keyword=...
pub async fn search_stocks(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<Value>> {
    let keyword = query.keyword.unwrap_or_default();
    if keyword.is_empty() {
        return Ok(Json(json!([])));
    }

    let matches = state.db.search_stocks(&keyword).await?;
    let items: Vec<Value> = matches
        .into_iter()
        .map(|(code, name)| json!({ "code": code, "name": name }))
        .collect();
    Ok(Json(json!(items)))
}

/// GET /api/stocks/{code}/latest-trade-date
pub async fn get_latest_trade_date(
    State(state): State<Arc<AppState>>,
    Path(stock_code): Path<String>,
) -> ApiResult<Json<Value>> {
    let date = state
        .db
        .latest_trade_date_for(&stock_code)
        .await?
        .ok_or_else(|| ApiError::NotFound("no trade data found".to_string()))?;

    Ok(Json(json!({ "date": date.to_string() })))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub days: Option<i64>,
}

/// GET /api/stocks/{code}/history?days=N — recent OHLCV, oldest first.
pub async fn get_recent_history(
    State(state): State<Arc<AppState>>,
    Path(stock_code): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Value>> {
    let days = query.days.unwrap_or(5);
    let quotes = state.db.recent_history(&stock_code, days).await?;

    let items: Vec<Value> = quotes
        .iter()
        .map(|q| {
            json!({
                "date": q.trade_date.to_string(),
                "open": q.open_price,
                "close": q.close_price,
                "high": q.high_price,
                "low": q.low_price,
                "volume": q.volume,
            })
        })
        .collect();
    Ok(Json(json!(items)))
}
