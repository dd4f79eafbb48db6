//! Daily recommendation generation from the technical score table.

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use sqlx::Row;
use tracing::{error, info};

use crate::database::Database;
use crate::models::Recommendation;

/// Map a total score to a recommendation level.
pub fn recommendation_level(total_score: i64) -> &'static str {
    if total_score >= 90 {
        "strong_buy"
    } else if total_score >= 75 {
        "buy"
    } else {
        "watch"
    }
}

/// Human-readable reasons string assembled from the sub-scores.
pub fn build_reasons(trend: i64, momentum: i64, volume: i64, volatility: i64, bollinger: i64) -> String {
    let mut reasons = Vec::new();
    if trend >= 40 {
        reasons.push("ma5/ma20/ma60 aligned upward".to_string());
    } else if trend >= 30 {
        reasons.push("short-term averages rising".to_string());
    }
    if momentum >= 30 {
        reasons.push("MACD above signal".to_string());
    }
    if volume >= 10 {
        reasons.push("volume expanding".to_string());
    }
    if bollinger >= 10 {
        reasons.push("price below lower Bollinger band".to_string());
    }
    if volatility >= 10 {
        reasons.push("high volatility".to_string());
    }
    if reasons.is_empty() {
        reasons.push("mixed technical picture".to_string());
    }
    reasons.join("; ")
}

/// Regenerate `stock_recommendations` for the latest score date.
pub async fn update_recommendations(db: &Database) -> Result<usize> {
    let start_time = Utc::now();

    let row = sqlx::query("SELECT MAX(score_date) AS latest FROM stock_technical_scores")
        .fetch_one(db.pool())
        .await?;
    let latest_date: Option<NaiveDate> = row.get("latest");
    let Some(recommend_date) = latest_date else {
        error!("No technical scores found, run technical-score first");
        return Ok(0);
    };

    let rows = sqlx::query(
        r#"
        SELECT ts.stock_code, s.stock_name, s.industry,
               ts.total_score, ts.trend_score, ts.momentum_score,
               ts.volume_score, ts.volatility_score, ts.bollinger_score,
               q.close_price
        FROM stock_technical_scores ts
        JOIN stocks s ON ts.stock_code = s.stock_code
        JOIN stock_historical_quotes q
             ON ts.stock_code = q.stock_code AND ts.score_date = q.trade_date
        WHERE ts.score_date = ?
        ORDER BY ts.total_score DESC
        "#,
    )
    .bind(recommend_date)
    .fetch_all(db.pool())
    .await?;

    db.delete_recommendations(recommend_date).await?;

    let mut inserted = 0;
    for row in rows {
        let trend: i64 = row.get("trend_score");
        let momentum: i64 = row.get("momentum_score");
        let volume: i64 = row.get("volume_score");
        let volatility: i64 = row.get("volatility_score");
        let bollinger: i64 = row.get("bollinger_score");
        let total_score: i64 = row.get("total_score");

        let rec = Recommendation {
            recommend_date,
            stock_code: row.get("stock_code"),
            stock_name: row.get("stock_name"),
            industry: row.get("industry"),
            current_price: row.get("close_price"),
            total_score,
            recommendation_level: recommendation_level(total_score).to_string(),
            reasons: build_reasons(trend, momentum, volume, volatility, bollinger),
        };
        db.insert_recommendation(&rec).await?;
        inserted += 1;
    }

    db.log_update(
        "stock_recommendations",
        "DAILY",
        start_time,
        if inserted > 0 { "SUCCESS" } else { "FAILED" },
        inserted as i64,
        None,
    )
    .await?;

    info!("Recommendations updated for {}: {} stocks", recommend_date, inserted);
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recommendation_levels() {
        assert_eq!(recommendation_level(95), "strong_buy");
        assert_eq!(recommendation_level(90), "strong_buy");
        assert_eq!(recommendation_level(80), "buy");
        assert_eq!(recommendation_level(60), "watch");
    }

    #[test]
    fn test_reasons_never_empty() {
        let reasons = build_reasons(10, 10, 5, 5, 0);
        assert_eq!(reasons, "mixed technical picture");

        let reasons = build_reasons(40, 40, 10, 10, 10);
        assert!(reasons.contains("aligned upward"));
        assert!(reasons.contains("MACD above signal"));
    }
}
