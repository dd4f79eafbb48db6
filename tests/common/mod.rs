//! Shared fixtures: a temp-file database plus deterministic seed data.

use chrono::{Duration, NaiveDate};
use tempfile::TempDir;

use stock_insight::database::Database;
use stock_insight::models::{Config, DailyQuote, Stock};

pub struct TestDb {
    pub db: Database,
    // keeps the database file alive for the test's duration
    _dir: TempDir,
}

pub async fn test_db() -> TestDb {
    let dir = TempDir::new().expect("create temp dir");
    let path = dir.path().join("test.db");
    let db = Database::new(path.to_str().unwrap())
        .await
        .expect("open test database");
    TestDb { db, _dir: dir }
}

pub fn test_config() -> Config {
    Config {
        database_path: ":memory:".to_string(),
        data_dir: "data".to_string(),
        http_bind: "127.0.0.1:0".to_string(),
        ai_api_url: "http://127.0.0.1:1/v1/chat/completions".to_string(),
        ai_api_key: String::new(),
        wechat_token: "testtoken".to_string(),
        rate_limit_per_minute: 6000,
        max_workers: 2,
    }
}

pub async fn seed_stock(db: &Database, code: &str, name: &str, industry: Option<&str>) {
    let mut stock = Stock::bare(code, name);
    stock.industry = industry.map(|s| s.to_string());
    db.upsert_stock(&stock).await.expect("seed stock");
}

/// Seed `days` consecutive daily quotes starting at `start`, with prices
/// following `price_at(i)` and volumes following `volume_at(i)`.
pub async fn seed_quotes<P, V>(
    db: &Database,
    code: &str,
    start: NaiveDate,
    days: usize,
    price_at: P,
    volume_at: V,
) where
    P: Fn(usize) -> f64,
    V: Fn(usize) -> i64,
{
    for i in 0..days {
        let close = price_at(i);
        let open = if i == 0 { close } else { price_at(i - 1) };
        let quote = DailyQuote {
            stock_code: code.to_string(),
            trade_date: start + Duration::days(i as i64),
            open_price: open,
            close_price: close,
            high_price: close.max(open) * 1.01,
            low_price: close.min(open) * 0.99,
            volume: volume_at(i),
            amount: Some(close * volume_at(i) as f64),
            amplitude: Some(2.0),
            change_ratio: Some((close - open) / open * 100.0),
            change_amount: Some(close - open),
            turnover_ratio: Some(1.0),
            source: "eastmoney".to_string(),
            adjust_type: "qfq".to_string(),
        };
        db.upsert_quote(&quote).await.expect("seed quote");
    }
}

pub fn day(year: i32, month: u32, dayn: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, dayn).unwrap()
}
