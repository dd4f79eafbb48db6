//! AI analysis endpoint: assembles a natural-language prompt from the
//! technical analysis queries and forwards it to an OpenAI-compatible
//! chat-completions API.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{json, Value};
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use tracing::{error, info, warn};

use super::error::ApiResult;
use super::technical::{
    self, fetch_crossover, fetch_engulfing, fetch_moving_averages, fetch_support_resistance,
    fetch_three_bullish, DateQuery,
};
use super::AppState;
use crate::models::Config;

const SYSTEM_PROMPT: &str = "You are a financial analysis assistant specialized in stock \
    market trends, fundamentals, technical analysis and risk assessment. You will receive \
    analysis data for China A-share stocks with prices in CNY. Provide clear, professional \
    advice.";

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

/// Chat-completions client with retry and long timeouts.
pub struct AiAnalyzer {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
}

impl AiAnalyzer {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(30))
            .timeout(std::time::Duration::from_secs(120))
            .no_proxy()
            .build()?;

        Ok(Self {
            client,
            api_url: config.ai_api_url.clone(),
            api_key: config.ai_api_key.clone(),
        })
    }

    /// Call the completion API, retrying up to 3 times with exponential
    /// backoff.
    pub async fn get_analysis(&self, messages: &[ChatMessage]) -> anyhow::Result<String> {
        let body = json!({
            "model": "deepseek-chat",
            "messages": messages,
            "stream": false,
        });

        let mut last_error = None;
        for attempt in 0..3u32 {
            if attempt > 0 {
                let backoff = std::cmp::min(4 * 2u64.pow(attempt - 1), 60);
                warn!("AI call attempt {} failed, retrying in {}s", attempt, backoff);
                tokio::time::sleep(std::time::Duration::from_secs(backoff)).await;
            }

            let result = self
                .client
                .post(&self.api_url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body)
                .send()
                .await;

            match result {
                Ok(response) if response.status().is_success() => {
                    let payload: Value = response.json().await?;
                    let content = payload
                        .get("choices")
                        .and_then(|c| c.get(0))
                        .and_then(|c| c.get("message"))
                        .and_then(|m| m.get("content"))
                        .and_then(|c| c.as_str())
                        .ok_or_else(|| anyhow::anyhow!("unexpected AI response shape"))?;
                    return Ok(content.to_string());
                }
                Ok(response) => {
                    let status = response.status();
                    let text = response.text().await.unwrap_or_default();
                    last_error = Some(anyhow::anyhow!("AI API returned {}: {}", status, text));
                }
                Err(e) => {
                    last_error = Some(e.into());
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("AI analysis failed")))
    }
}

#[derive(Debug)]
struct VolumeRow {
    volume: i64,
    ma5: Option<f64>,
    ma20: Option<f64>,
    ma60: Option<f64>,
    ma100: Option<f64>,
    ma200: Option<f64>,
}

async fn fetch_volume_averages(
    pool: &SqlitePool,
    stock_code: &str,
    date: NaiveDate,
) -> anyhow::Result<Option<VolumeRow>> {
    let row = sqlx::query(
        r#"
        WITH volume_averages AS (
            SELECT stock_code, trade_date, volume,
                AVG(volume) OVER (PARTITION BY stock_code ORDER BY trade_date
                    ROWS BETWEEN 4 PRECEDING AND CURRENT ROW) AS volume_ma5,
                AVG(volume) OVER (PARTITION BY stock_code ORDER BY trade_date
                    ROWS BETWEEN 19 PRECEDING AND CURRENT ROW) AS volume_ma20,
                AVG(volume) OVER (PARTITION BY stock_code ORDER BY trade_date
                    ROWS BETWEEN 59 PRECEDING AND CURRENT ROW) AS volume_ma60,
                AVG(volume) OVER (PARTITION BY stock_code ORDER BY trade_date
                    ROWS BETWEEN 99 PRECEDING AND CURRENT ROW) AS volume_ma100,
                AVG(volume) OVER (PARTITION BY stock_code ORDER BY trade_date
                    ROWS BETWEEN 199 PRECEDING AND CURRENT ROW) AS volume_ma200
            FROM stock_historical_quotes
            WHERE stock_code = ?1
                AND trade_date >= date(?2, '-250 days')
        )
        SELECT volume, volume_ma5, volume_ma20, volume_ma60, volume_ma100, volume_ma200
        FROM volume_averages
        WHERE trade_date = ?2
        "#,
    )
    .bind(stock_code)
    .bind(date)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| VolumeRow {
        volume: r.get("volume"),
        ma5: r.get("volume_ma5"),
        ma20: r.get("volume_ma20"),
        ma60: r.get("volume_ma60"),
        ma100: r.get("volume_ma100"),
        ma200: r.get("volume_ma200"),
    }))
}

fn fmt(value: Option<f64>) -> String {
    value.map(|v| format!("{:.2}", v)).unwrap_or_else(|| "n/a".to_string())
}

/// GET /api/ai/analysis/{code}?date=YYYY-MM-DD
pub async fn get_ai_analysis(
    State(state): State<Arc<AppState>>,
    Path(stock_code): Path<String>,
    Query(query): Query<DateQuery>,
) -> ApiResult<Json<Value>> {
    let date = technical::require_date(&query)?;
    info!("AI analysis requested for {} on {}", stock_code, date);

    let analysis = build_technical_analysis(&state, &stock_code, date).await?;

    Ok(Json(json!({
        "stock_code": stock_code,
        "analysis_date": date.to_string(),
        "analysis": analysis,
    })))
}

/// Gather the technical picture and run it through the AI API. Missing
/// data comes back as explanatory text rather than an error.
async fn build_technical_analysis(
    state: &AppState,
    stock_code: &str,
    date: NaiveDate,
) -> anyhow::Result<String> {
    let db = &state.db;
    let pool = db.pool();

    if !db.has_quote(stock_code, date).await? {
        return Ok(format!(
            "No trading data for {} on {}; it may be a non-trading day or the data has not \
             been imported yet",
            stock_code, date
        ));
    }

    if let Some(latest) = db.latest_trade_date_for(stock_code).await? {
        if date > latest {
            return Ok(format!("Data is currently updated through {}", latest));
        }
    }

    let stock = match db.get_stock(stock_code).await? {
        Some(stock) => stock,
        None => return Ok(format!("Unknown stock code {}", stock_code)),
    };

    let ma = match fetch_moving_averages(pool, stock_code, date).await? {
        Some(ma) => ma,
        None => {
            return Ok(format!(
                "Could not compute moving averages for {} on {}; insufficient history",
                stock_code, date
            ))
        }
    };
    let volume = match fetch_volume_averages(pool, stock_code, date).await? {
        Some(volume) => volume,
        None => return Ok(format!("No volume data for {} on {}", stock_code, date)),
    };
    let cross = fetch_crossover(pool, stock_code, date).await?;
    let bullish = fetch_three_bullish(pool, stock_code, date).await?;
    let engulfing = fetch_engulfing(pool, stock_code, date).await?;
    let support = fetch_support_resistance(pool, stock_code, date).await?;

    let mut prompt = format!(
        "Stock code: {}\nStock name: {}\nAnalysis date: {}\n\n\
         The following technical indicators were computed from daily quotes; analyze the \
         trend and trading signals.\n\
         1. Moving averages:\n\
         - MA5={}\n- MA20={}\n- MA60={}\n- MA100={}\n- MA200={}\n",
        stock.stock_code,
        stock.stock_name,
        date,
        fmt(ma.ma_5),
        fmt(ma.ma_20),
        fmt(ma.ma_60),
        fmt(ma.ma_100),
        fmt(ma.ma_200),
    );

    if let Some(cross) = &cross {
        prompt.push_str(&format!(
            "- crossover: {} (strength {}%, MA5 change {}%, MA20 change {}%)\n",
            cross.cross_type,
            fmt(cross.cross_strength),
            fmt(cross.ma_5_trend),
            fmt(cross.ma_20_trend),
        ));
    }

    prompt.push_str(&format!(
        "2. Volume:\n\
         - current volume: {}\n- 5-day avg: {}\n- 20-day avg: {}\n- 60-day avg: {}\n\
         - 100-day avg: {}\n- 200-day avg: {}\n",
        volume.volume,
        fmt(volume.ma5),
        fmt(volume.ma20),
        fmt(volume.ma60),
        fmt(volume.ma100),
        fmt(volume.ma200),
    ));
    if let Some(ma20) = volume.ma20 {
        if ma20 > 0.0 {
            prompt.push_str(&format!(
                "- volume ratio (current / 20-day avg): {:.2}\n",
                volume.volume as f64 / ma20
            ));
        }
    }

    prompt.push_str("3. Candlestick patterns:\n");
    if let Some(bullish) = &bullish {
        prompt.push_str(&format!(
            "- last 3 sessions: {} (cumulative gain {}%)\n",
            bullish.pattern_type,
            fmt(bullish.total_gain),
        ));
    }
    if let Some(engulfing) = &engulfing {
        prompt.push_str(&format!(
            "- engulfing pattern today: {}\n",
            engulfing.engulfing_type.as_deref().unwrap_or("none"),
        ));
    }

    if let Some(sr) = &support {
        prompt.push_str(&format!(
            "4. Support and resistance:\n\
             - 5d support: {}\n- 10d support: {}\n- 20d support: {}\n\
             - 5d resistance: {}\n- 10d resistance: {}\n- 20d resistance: {}\n\
             - 20d VWAP: {}\n- support strength: {}\n- resistance strength: {}\n\
             - price position: {}\n- range position: {}\n- volume character: {}\n",
            fmt(sr.min_price_5d),
            fmt(sr.min_price_10d),
            fmt(sr.min_price_20d),
            fmt(sr.max_price_5d),
            fmt(sr.max_price_10d),
            fmt(sr.max_price_20d),
            fmt(sr.vwap_20d),
            sr.support_strength,
            sr.resistance_strength,
            sr.price_position,
            sr.price_range_position,
            sr.volume_character,
        ));
    }

    prompt.push_str(
        "\nRequested analysis:\n\
         1. Trend: is the stock bullish, bearish or ranging?\n\
         2. Trading signal: buy on a golden cross with volume expanding 50% over the \
         20-day average; sell near resistance on shrinking volume; hold when no clear \
         trend and amplitude is below 2%.\n\
         3. Risk assessment: validity of support/resistance, volatility and drawdown.\n\
         4. Potential return: estimate upside from the current price to historical \
         resistance.\n\
         5. Execution: concrete entry/exit levels, or the key indicators to watch.\n\
         \nRespond as JSON with fields: trend, signal, rationale, risk, return, execution.",
    );

    let analyzer = AiAnalyzer::new(&state.config)?;
    let messages = [
        ChatMessage {
            role: "system",
            content: SYSTEM_PROMPT.to_string(),
        },
        ChatMessage {
            role: "user",
            content: prompt,
        },
    ];

    match analyzer.get_analysis(&messages).await {
        Ok(analysis) => {
            info!("AI analysis completed for {}", stock_code);
            Ok(analysis)
        }
        Err(e) => {
            error!("AI analysis failed for {}: {:#}", stock_code, e);
            Ok("Sorry, the AI analysis service is temporarily unavailable; please try again later.".to_string())
        }
    }
}
