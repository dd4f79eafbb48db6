use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Core stock information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stock {
    pub stock_code: String,
    pub stock_name: String,
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub company_name_en: Option<String>,
    pub description: Option<String>,
    pub website: Option<String>,
    pub employees: Option<i64>,
    pub listing_date: Option<NaiveDate>,
}

impl Stock {
    /// Minimal stock row with just code and name, the rest filled in later.
    pub fn bare(stock_code: &str, stock_name: &str) -> Self {
        Self {
            stock_code: stock_code.to_string(),
            stock_name: stock_name.to_string(),
            sector: None,
            industry: None,
            company_name_en: None,
            description: None,
            website: None,
            employees: None,
            listing_date: None,
        }
    }
}

/// One daily OHLCV row as stored in `stock_historical_quotes`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyQuote {
    pub stock_code: String,
    pub trade_date: NaiveDate,
    pub open_price: f64,
    pub close_price: f64,
    pub high_price: f64,
    pub low_price: f64,
    pub volume: i64,
    pub amount: Option<f64>,
    pub amplitude: Option<f64>,
    pub change_ratio: Option<f64>,
    pub change_amount: Option<f64>,
    pub turnover_ratio: Option<f64>,
    pub source: String,
    pub adjust_type: String,
}

/// Fundamental valuation metrics snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FundamentalMetrics {
    pub stock_code: String,
    pub date: NaiveDate,
    pub pe_ratio: Option<f64>,
    pub pb_ratio: Option<f64>,
    pub roe: Option<f64>,
    pub revenue_growth: Option<f64>,
    pub earnings_growth: Option<f64>,
    pub gross_margin: Option<f64>,
    pub operating_margin: Option<f64>,
    pub dividend_yield: Option<f64>,
}

/// Technical snapshot metrics (52-week range, long averages, beta)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TechnicalMetrics {
    pub stock_code: String,
    pub date: NaiveDate,
    pub current_price: Option<f64>,
    pub high_52week: Option<f64>,
    pub low_52week: Option<f64>,
    pub volume: Option<i64>,
    pub avg_volume: Option<i64>,
    pub avg_volume_10d: Option<i64>,
    pub ma_200: Option<f64>,
    pub beta: Option<f64>,
}

/// Balance-sheet health metrics, keyed by report date
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FinancialHealth {
    pub stock_code: String,
    pub report_date: NaiveDate,
    pub quick_ratio: Option<f64>,
    pub current_ratio: Option<f64>,
    pub cash_ratio: Option<f64>,
    pub debt_to_equity: Option<f64>,
    pub interest_coverage: Option<f64>,
    pub operating_cash_flow: Option<f64>,
    pub cash_flow_coverage: Option<f64>,
}

/// Industry positioning metrics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndustryMetrics {
    pub stock_code: String,
    pub date: NaiveDate,
    pub profit_margin: Option<f64>,
    pub price_to_sales: Option<f64>,
    pub industry_rank: Option<i64>,
}

/// Ownership structure metrics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvestorMetrics {
    pub stock_code: String,
    pub date: NaiveDate,
    pub insider_holding: Option<f64>,
    pub institution_holding: Option<f64>,
}

/// Daily technical score row written by the scoring job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TechnicalScore {
    pub stock_code: String,
    pub score_date: NaiveDate,
    pub trend_score: i64,
    pub momentum_score: i64,
    pub volatility_score: i64,
    pub volume_score: i64,
    pub bollinger_score: i64,
    pub total_score: i64,
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

/// Daily stock recommendation derived from technical scores
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub recommend_date: NaiveDate,
    pub stock_code: String,
    pub stock_name: String,
    pub industry: Option<String>,
    pub current_price: f64,
    pub total_score: i64,
    pub recommendation_level: String,
    pub reasons: String,
}

/// Chip-distribution strategy variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChipStrategy {
    BuyDip,
    FollowUp,
    Potential,
}

impl ChipStrategy {
    pub const ALL: [ChipStrategy; 3] = [
        ChipStrategy::BuyDip,
        ChipStrategy::FollowUp,
        ChipStrategy::Potential,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChipStrategy::BuyDip => "buy_dip",
            ChipStrategy::FollowUp => "follow_up",
            ChipStrategy::Potential => "potential",
        }
    }

    /// Parse a request parameter, falling back to `buy_dip` for unknown keys.
    pub fn from_param(value: &str) -> Self {
        match value {
            "follow_up" => ChipStrategy::FollowUp,
            "potential" => ChipStrategy::Potential,
            _ => ChipStrategy::BuyDip,
        }
    }
}

/// Entry in the scraped stock code list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockListEntry {
    pub code: String,
    pub name: String,
    pub market: String,
}

/// One parsed daily kline bar from the market data API
#[derive(Debug, Clone, PartialEq)]
pub struct KlineBar {
    pub trade_date: NaiveDate,
    pub open: f64,
    pub close: f64,
    pub high: f64,
    pub low: f64,
    pub volume: i64,
    pub amount: f64,
    pub amplitude: f64,
    pub change_ratio: f64,
    pub change_amount: f64,
    pub turnover_ratio: f64,
}

/// Row layout of the downloaded per-stock history CSV files. The headers
/// follow the download side; the importer reads the same shape back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryCsvRow {
    #[serde(rename = "Date")]
    pub date: String,
    #[serde(rename = "Open")]
    pub open: f64,
    #[serde(rename = "Close")]
    pub close: f64,
    #[serde(rename = "High")]
    pub high: f64,
    #[serde(rename = "Low")]
    pub low: f64,
    #[serde(rename = "Volume")]
    pub volume: i64,
    #[serde(rename = "Amount")]
    pub amount: Option<f64>,
    #[serde(rename = "Amplitude")]
    pub amplitude: Option<f64>,
    #[serde(rename = "Change")]
    pub change_ratio: Option<f64>,
    #[serde(rename = "ChangeAmount")]
    pub change_amount: Option<f64>,
    #[serde(rename = "Turnover")]
    pub turnover_ratio: Option<f64>,
}

/// Configuration for the application
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub data_dir: String,
    pub http_bind: String,
    pub ai_api_url: String,
    pub ai_api_key: String,
    pub wechat_token: String,
    pub rate_limit_per_minute: u32,
    pub max_workers: usize,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if it exists

        Ok(Config {
            database_path: std::env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "stocks.db".to_string()),
            data_dir: std::env::var("DATA_DIR").unwrap_or_else(|_| "data".to_string()),
            http_bind: std::env::var("HTTP_BIND").unwrap_or_else(|_| "0.0.0.0:5000".to_string()),
            ai_api_url: std::env::var("AI_API_URL")
                .unwrap_or_else(|_| "https://api.deepseek.com/chat/completions".to_string()),
            ai_api_key: std::env::var("AI_API_KEY").unwrap_or_default(),
            wechat_token: std::env::var("WECHAT_TOKEN").unwrap_or_default(),
            rate_limit_per_minute: std::env::var("RATE_LIMIT_PER_MINUTE")
                .unwrap_or_else(|_| "120".to_string())
                .parse()
                .unwrap_or(120),
            max_workers: std::env::var("MAX_WORKERS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .unwrap_or(10),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chip_strategy_round_trip() {
        for strategy in ChipStrategy::ALL {
            assert_eq!(ChipStrategy::from_param(strategy.as_str()), strategy);
        }
        assert_eq!(ChipStrategy::from_param("nonsense"), ChipStrategy::BuyDip);
    }

    #[test]
    fn test_bare_stock() {
        let stock = Stock::bare("600519", "贵州茅台");
        assert_eq!(stock.stock_code, "600519");
        assert!(stock.sector.is_none());
        assert!(stock.listing_date.is_none());
    }
}
