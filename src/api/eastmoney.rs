use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use super::{ApiRateLimiter, Market, MarketDataProvider};
use crate::models::{Config, KlineBar, StockListEntry};

const DEFAULT_LIST_URL: &str = "https://push2.eastmoney.com/api/qt/clist/get";
const DEFAULT_KLINE_URL: &str = "https://push2his.eastmoney.com/api/qt/stock/kline/get";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Eastmoney market data client
pub struct EastmoneyClient {
    client: Client,
    list_url: String,
    kline_url: String,
    rate_limiter: ApiRateLimiter,
}

impl EastmoneyClient {
    /// Create a new client with the configured rate limit.
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            list_url: DEFAULT_LIST_URL.to_string(),
            kline_url: DEFAULT_KLINE_URL.to_string(),
            rate_limiter: ApiRateLimiter::new(config.rate_limit_per_minute),
        })
    }

    /// Point the client at a different host. Used by tests with a local
    /// mock server.
    pub fn with_base_url(mut self, base: &str) -> Self {
        self.list_url = format!("{}/api/qt/clist/get", base);
        self.kline_url = format!("{}/api/qt/stock/kline/get", base);
        self
    }

    async fn get_json(&self, url: &str, params: &[(&str, &str)]) -> Result<Value> {
        self.rate_limiter.wait().await;

        let response = self
            .client
            .get(url)
            .query(params)
            .header("Referer", "https://quote.eastmoney.com/")
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!("API request failed with status {}: {}", status, error_text));
        }

        let json: Value = response.json().await?;
        Ok(json)
    }
}

#[async_trait::async_trait]
impl MarketDataProvider for EastmoneyClient {
    /// Fetch the full code list for one market segment.
    async fn fetch_stock_list(&self, market: Market) -> Result<Vec<StockListEntry>> {
        let params = [
            ("pn", "1"),
            ("pz", "10000"),
            ("po", "1"),
            ("np", "1"),
            ("ut", "bd1d9ddb04089700cf9c27f6f7426281"),
            ("fltt", "2"),
            ("invt", "2"),
            ("fid", "f3"),
            ("fs", market.filter()),
            ("fields", "f12,f14"),
        ];

        let data = self.get_json(&self.list_url, &params).await?;

        let items = data
            .get("data")
            .and_then(|d| d.get("diff"))
            .and_then(|d| d.as_array())
            .cloned()
            .unwrap_or_default();

        let mut entries = Vec::with_capacity(items.len());
        for item in &items {
            // f12 is the code (occasionally numeric), f14 the display name
            let code = match item.get("f12") {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Number(n)) => n.to_string(),
                _ => continue,
            };
            let name = match item.get("f14").and_then(|v| v.as_str()) {
                Some(s) => s.to_string(),
                None => continue,
            };
            entries.push(StockListEntry {
                code: format!("{:0>6}", code),
                name,
                market: market.label().to_string(),
            });
        }

        debug!("Retrieved {} {} stocks", entries.len(), market.label());
        Ok(entries)
    }

    /// Fetch forward-adjusted daily kline bars for one stock.
    async fn fetch_daily_history(
        &self,
        stock_code: &str,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Result<Vec<KlineBar>> {
        let beg = start_date
            .map(|d| d.format("%Y%m%d").to_string())
            .unwrap_or_else(|| "0".to_string());
        let end = end_date
            .map(|d| d.format("%Y%m%d").to_string())
            .unwrap_or_else(|| "20500101".to_string());
        let secid = secid_for(stock_code);

        let params = [
            ("secid", secid.as_str()),
            ("fields1", "f1,f2,f3,f4,f5,f6"),
            ("fields2", "f51,f52,f53,f54,f55,f56,f57,f58,f59,f60,f61"),
            ("klt", "101"),
            ("fqt", "1"),
            ("beg", beg.as_str()),
            ("end", end.as_str()),
        ];

        let data = self.get_json(&self.kline_url, &params).await?;

        let klines = data
            .get("data")
            .and_then(|d| d.get("klines"))
            .and_then(|k| k.as_array())
            .cloned()
            .unwrap_or_default();

        let mut bars = Vec::with_capacity(klines.len());
        for line in &klines {
            if let Some(text) = line.as_str() {
                bars.push(parse_kline_line(text)?);
            }
        }

        debug!("Retrieved {} bars for {}", bars.len(), stock_code);
        Ok(bars)
    }
}

/// Eastmoney security id: market prefix 1 for Shanghai (codes starting
/// with 6), 0 for Shenzhen.
pub fn secid_for(stock_code: &str) -> String {
    if stock_code.starts_with('6') {
        format!("1.{}", stock_code)
    } else {
        format!("0.{}", stock_code)
    }
}

/// Parse one comma-joined kline row:
/// date,open,close,high,low,volume,amount,amplitude,change_ratio,change_amount,turnover
pub fn parse_kline_line(line: &str) -> Result<KlineBar> {
    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() < 11 {
        return Err(anyhow!("malformed kline row: {}", line));
    }

    let num = |i: usize| -> Result<f64> {
        fields[i]
            .parse::<f64>()
            .map_err(|_| anyhow!("invalid number '{}' in kline row", fields[i]))
    };

    Ok(KlineBar {
        trade_date: NaiveDate::parse_from_str(fields[0], "%Y-%m-%d")?,
        open: num(1)?,
        close: num(2)?,
        high: num(3)?,
        low: num(4)?,
        volume: num(5)? as i64,
        amount: num(6)?,
        amplitude: num(7)?,
        change_ratio: num(8)?,
        change_amount: num(9)?,
        turnover_ratio: num(10)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secid_prefixes() {
        assert_eq!(secid_for("600519"), "1.600519");
        assert_eq!(secid_for("000001"), "0.000001");
        assert_eq!(secid_for("300750"), "0.300750");
    }

    #[test]
    fn test_parse_kline_line() {
        let line = "2024-01-05,10.00,10.50,10.80,9.90,123456,1295040.0,9.00,5.00,0.50,1.20";
        let bar = parse_kline_line(line).unwrap();
        assert_eq!(bar.trade_date, NaiveDate::from_ymd_opt(2024, 1, 5).unwrap());
        assert_eq!(bar.open, 10.0);
        assert_eq!(bar.close, 10.5);
        assert_eq!(bar.volume, 123456);
        assert_eq!(bar.turnover_ratio, 1.2);
    }

    #[test]
    fn test_parse_kline_line_rejects_garbage() {
        assert!(parse_kline_line("not,a,row").is_err());
        assert!(parse_kline_line("2024-01-05,x,1,1,1,1,1,1,1,1,1").is_err());
    }
}
