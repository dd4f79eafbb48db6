use anyhow::Result;
use chrono::NaiveDate;
use std::time::Duration;

use crate::models::{KlineBar, StockListEntry};

pub mod eastmoney;
pub use eastmoney::EastmoneyClient;

/// Simple rate limiter for API requests
pub struct ApiRateLimiter {
    delay_ms: u64,
}

impl ApiRateLimiter {
    pub fn new(requests_per_minute: u32) -> Self {
        let delay_ms = if requests_per_minute > 0 {
            60_000 / requests_per_minute as u64
        } else {
            1000 // Default 1 second delay
        };

        Self { delay_ms }
    }

    pub async fn wait(&self) {
        tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
    }
}

/// Common trait for market data sources
#[async_trait::async_trait]
pub trait MarketDataProvider {
    /// Full code list for one market segment.
    async fn fetch_stock_list(&self, market: Market) -> Result<Vec<StockListEntry>>;

    /// Daily OHLCV history for one stock, optionally bounded by dates.
    async fn fetch_daily_history(
        &self,
        stock_code: &str,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Result<Vec<KlineBar>>;
}

/// A-share market segments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Market {
    Shanghai,
    Shenzhen,
}

impl Market {
    pub const ALL: [Market; 2] = [Market::Shanghai, Market::Shenzhen];

    pub fn label(&self) -> &'static str {
        match self {
            Market::Shanghai => "SH",
            Market::Shenzhen => "SZ",
        }
    }

    /// Eastmoney `fs` filter expression for this segment.
    pub fn filter(&self) -> &'static str {
        match self {
            Market::Shanghai => "m:1+t:2,m:1+t:23",
            Market::Shenzhen => "m:0+t:6,m:0+t:80",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rate_limiter() {
        let limiter = ApiRateLimiter::new(600); // 600 requests per minute

        let start = std::time::Instant::now();
        limiter.wait().await;
        limiter.wait().await;
        // With 600 req/min, each wait should sleep ~100ms
        assert!(start.elapsed() >= Duration::from_millis(150));
    }

    #[test]
    fn test_market_labels() {
        assert_eq!(Market::Shanghai.label(), "SH");
        assert_eq!(Market::Shenzhen.label(), "SZ");
        assert!(Market::Shanghai.filter().starts_with("m:1"));
        assert!(Market::Shenzhen.filter().starts_with("m:0"));
    }
}
