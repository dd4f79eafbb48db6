//! Strategy scorers: each wraps one SQL query joining the metric tables and
//! computing a weighted score, printed as a ranked top-N listing. Invoked
//! from the CLI and reused by the messaging webhook.

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::Row;

use crate::database::Database;

/// One scored stock with the per-metric values that fed the score.
#[derive(Debug, Clone)]
pub struct ScoreEntry {
    pub stock_code: String,
    pub stock_name: String,
    pub total_score: f64,
    pub details: Vec<(&'static str, String)>,
}

/// A scoring strategy backed by one parameterized SQL query.
#[async_trait]
pub trait Scorer: Send + Sync {
    /// Short key used on the command line and in webhook commands.
    fn name(&self) -> &'static str;

    /// Metric and scoring explanation shown above the ranking.
    fn describe(&self) -> &'static str;

    async fn calculate(
        &self,
        db: &Database,
        date: NaiveDate,
        top_n: usize,
    ) -> Result<Vec<ScoreEntry>>;
}

/// Look up a scorer by strategy key.
pub fn scorer_for(strategy: &str, period_days: i64) -> Option<Box<dyn Scorer>> {
    match strategy {
        "value" => Some(Box::new(ValueScorer)),
        "growth" => Some(Box::new(GrowthScorer)),
        "income" => Some(Box::new(IncomeScorer)),
        "trend" => Some(Box::new(TrendScorer)),
        "reverse" => Some(Box::new(ReverseScorer)),
        "rtpv" => Some(Box::new(RtpvScorer { period_days })),
        _ => None,
    }
}

pub const STRATEGY_KEYS: [&str; 6] = ["rtpv", "value", "growth", "income", "trend", "reverse"];

/// Format a ranking for terminal or webhook output.
pub fn format_ranking(entries: &[ScoreEntry], top_n: usize) -> String {
    let mut lines = Vec::new();
    for entry in entries.iter().take(top_n) {
        let details = entry
            .details
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join(", ");
        lines.push(format!(
            "{} {}: total={:.2} ({})",
            entry.stock_code, entry.stock_name, entry.total_score, details
        ));
    }
    lines.join("\n")
}

fn fmt_opt(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:.2}", v),
        None => "-".to_string(),
    }
}

// ----------------------------------------------------------------------
// value
// ----------------------------------------------------------------------

/// Value investing: cheap against industry PE, solid ROE and margins.
pub struct ValueScorer;

#[async_trait]
impl Scorer for ValueScorer {
    fn name(&self) -> &'static str {
        "value"
    }

    fn describe(&self) -> &'static str {
        "Value strategy\n\
         - pe_ratio (30): below 80% of industry average 30, below average 20, else 10\n\
         - pb_ratio (20): <3 scores 20, <5 scores 10\n\
         - roe (30): >15 scores 30, >10 scores 20, else 10\n\
         - gross_margin (10): >40 scores 10, >30 scores 5\n\
         - industry_rank (10): top 5 scores 10, top 10 scores 5"
    }

    async fn calculate(
        &self,
        db: &Database,
        date: NaiveDate,
        top_n: usize,
    ) -> Result<Vec<ScoreEntry>> {
        let rows = sqlx::query(
            r#"
            WITH industry_pe AS (
                SELECT s.industry, AVG(f.pe_ratio) AS avg_pe
                FROM stocks s
                JOIN fundamental_metrics f ON s.stock_code = f.stock_code
                WHERE f.date = ?1
                GROUP BY s.industry
            )
            SELECT
                s.stock_code,
                s.stock_name,
                f.pe_ratio,
                f.pb_ratio,
                f.roe,
                f.gross_margin,
                i.industry_rank,
                ROUND(
                    CASE
                        WHEN f.pe_ratio < ip.avg_pe * 0.8 THEN 30
                        WHEN f.pe_ratio < ip.avg_pe THEN 20
                        ELSE 10
                    END +
                    CASE
                        WHEN f.pb_ratio < 3 THEN 20
                        WHEN f.pb_ratio < 5 THEN 10
                        ELSE 0
                    END +
                    CASE
                        WHEN f.roe > 15 THEN 30
                        WHEN f.roe > 10 THEN 20
                        ELSE 10
                    END +
                    CASE
                        WHEN f.gross_margin > 40 THEN 10
                        WHEN f.gross_margin > 30 THEN 5
                        ELSE 0
                    END +
                    CASE
                        WHEN i.industry_rank <= 5 THEN 10
                        WHEN i.industry_rank <= 10 THEN 5
                        ELSE 0
                    END
                , 2) AS total_score
            FROM stocks s
            JOIN fundamental_metrics f ON s.stock_code = f.stock_code
            JOIN industry_metrics i ON s.stock_code = i.stock_code
            JOIN industry_pe ip ON s.industry = ip.industry
            WHERE f.date = ?1
              AND i.date = ?1
            ORDER BY total_score DESC
            LIMIT ?2
            "#,
        )
        .bind(date)
        .bind(top_n as i64)
        .fetch_all(db.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| ScoreEntry {
                stock_code: r.get("stock_code"),
                stock_name: r.get("stock_name"),
                total_score: r.get::<Option<f64>, _>("total_score").unwrap_or(0.0),
                details: vec![
                    ("pe_ratio", fmt_opt(r.get("pe_ratio"))),
                    ("pb_ratio", fmt_opt(r.get("pb_ratio"))),
                    ("roe", fmt_opt(r.get("roe"))),
                    ("gross_margin", fmt_opt(r.get("gross_margin"))),
                    (
                        "industry_rank",
                        r.get::<Option<i64>, _>("industry_rank")
                            .map(|v| v.to_string())
                            .unwrap_or_else(|| "-".to_string()),
                    ),
                ],
            })
            .collect())
    }
}

// ----------------------------------------------------------------------
// growth
// ----------------------------------------------------------------------

/// Growth investing: revenue/earnings expansion above a healthy balance.
pub struct GrowthScorer;

#[async_trait]
impl Scorer for GrowthScorer {
    fn name(&self) -> &'static str {
        "growth"
    }

    fn describe(&self) -> &'static str {
        "Growth strategy\n\
         - revenue_growth (30): >20 scores 30, >15 scores 20, else 10\n\
         - earnings_growth (30): >25 scores 30, >20 scores 20, else 10\n\
         - price trend (20): price above the 200-day average scores 20\n\
         - current_ratio (20): >=1.5 scores 20, >=1.2 scores 10"
    }

    async fn calculate(
        &self,
        db: &Database,
        date: NaiveDate,
        top_n: usize,
    ) -> Result<Vec<ScoreEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT
                s.stock_code,
                s.stock_name,
                f.revenue_growth,
                f.earnings_growth,
                t.current_price,
                t.ma_200,
                fh.current_ratio,
                ROUND(
                    CASE
                        WHEN f.revenue_growth > 20 THEN 30
                        WHEN f.revenue_growth > 15 THEN 20
                        ELSE 10
                    END +
                    CASE
                        WHEN f.earnings_growth > 25 THEN 30
                        WHEN f.earnings_growth > 20 THEN 20
                        ELSE 10
                    END +
                    CASE
                        WHEN t.current_price > t.ma_200 THEN 20
                        ELSE 0
                    END +
                    CASE
                        WHEN fh.current_ratio >= 1.5 THEN 20
                        WHEN fh.current_ratio >= 1.2 THEN 10
                        ELSE 0
                    END
                , 2) AS total_score
            FROM stocks s
            JOIN fundamental_metrics f ON s.stock_code = f.stock_code
            JOIN technical_metrics t ON s.stock_code = t.stock_code
            JOIN financial_health fh ON s.stock_code = fh.stock_code
            WHERE f.date = ?1
              AND t.date = ?1
              AND fh.report_date = (
                  SELECT MAX(report_date)
                  FROM financial_health
                  WHERE report_date <= ?1
              )
            ORDER BY total_score DESC
            LIMIT ?2
            "#,
        )
        .bind(date)
        .bind(top_n as i64)
        .fetch_all(db.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| ScoreEntry {
                stock_code: r.get("stock_code"),
                stock_name: r.get("stock_name"),
                total_score: r.get::<Option<f64>, _>("total_score").unwrap_or(0.0),
                details: vec![
                    ("revenue_growth", fmt_opt(r.get("revenue_growth"))),
                    ("earnings_growth", fmt_opt(r.get("earnings_growth"))),
                    ("current_price", fmt_opt(r.get("current_price"))),
                    ("ma_200", fmt_opt(r.get("ma_200"))),
                    ("current_ratio", fmt_opt(r.get("current_ratio"))),
                ],
            })
            .collect())
    }
}

// ----------------------------------------------------------------------
// income
// ----------------------------------------------------------------------

/// Income investing: dividend yield, low beta, liquid balance sheet.
pub struct IncomeScorer;

#[async_trait]
impl Scorer for IncomeScorer {
    fn name(&self) -> &'static str {
        "income"
    }

    fn describe(&self) -> &'static str {
        "Income strategy\n\
         - dividend_yield (40): >5 scores 40, >3 scores 30, >2 scores 20\n\
         - beta (30): <0.6 scores 30, <0.8 scores 20, <1.0 scores 10\n\
         - quick_ratio (30): >1.5 scores 30, >1.0 scores 20"
    }

    async fn calculate(
        &self,
        db: &Database,
        date: NaiveDate,
        top_n: usize,
    ) -> Result<Vec<ScoreEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT
                s.stock_code,
                s.stock_name,
                f.dividend_yield,
                t.beta,
                fh.quick_ratio,
                ROUND(
                    CASE
                        WHEN f.dividend_yield > 5 THEN 40
                        WHEN f.dividend_yield > 3 THEN 30
                        WHEN f.dividend_yield > 2 THEN 20
                        ELSE 0
                    END +
                    CASE
                        WHEN t.beta < 0.6 THEN 30
                        WHEN t.beta < 0.8 THEN 20
                        WHEN t.beta < 1.0 THEN 10
                        ELSE 0
                    END +
                    CASE
                        WHEN fh.quick_ratio > 1.5 THEN 30
                        WHEN fh.quick_ratio > 1.0 THEN 20
                        ELSE 0
                    END
                , 2) AS total_score
            FROM stocks s
            JOIN fundamental_metrics f ON s.stock_code = f.stock_code
            JOIN technical_metrics t ON s.stock_code = t.stock_code
            JOIN financial_health fh ON s.stock_code = fh.stock_code
            WHERE f.date = ?1
              AND t.date = ?1
              AND fh.report_date = (
                  SELECT MAX(report_date)
                  FROM financial_health
                  WHERE report_date <= ?1
              )
            ORDER BY total_score DESC
            LIMIT ?2
            "#,
        )
        .bind(date)
        .bind(top_n as i64)
        .fetch_all(db.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| ScoreEntry {
                stock_code: r.get("stock_code"),
                stock_name: r.get("stock_name"),
                total_score: r.get::<Option<f64>, _>("total_score").unwrap_or(0.0),
                details: vec![
                    ("dividend_yield", fmt_opt(r.get("dividend_yield"))),
                    ("beta", fmt_opt(r.get("beta"))),
                    ("quick_ratio", fmt_opt(r.get("quick_ratio"))),
                ],
            })
            .collect())
    }
}

// ----------------------------------------------------------------------
// trend
// ----------------------------------------------------------------------

/// Trend trading: proximity to 52-week highs with volume and RSI support.
pub struct TrendScorer;

#[async_trait]
impl Scorer for TrendScorer {
    fn name(&self) -> &'static str {
        "trend"
    }

    fn describe(&self) -> &'static str {
        "Trend strategy\n\
         - price position (30): within 5% of 52w high 30, within 10% 20\n\
         - volume (30): above 2x 10-day average 30, above 1.5x 20\n\
         - rsi (40): 50-80 scores 40, 40-90 scores 20"
    }

    async fn calculate(
        &self,
        db: &Database,
        date: NaiveDate,
        top_n: usize,
    ) -> Result<Vec<ScoreEntry>> {
        let rows = sqlx::query(
            r#"
            WITH rsi_calc AS (
                SELECT stock_code,
                       100 - 100 / (1 + AVG(gain) / NULLIF(AVG(loss), 0)) AS rsi
                FROM (
                    SELECT stock_code,
                           MAX(current_price - LAG(current_price) OVER (
                               PARTITION BY stock_code ORDER BY date), 0) AS gain,
                           MAX(LAG(current_price) OVER (
                               PARTITION BY stock_code ORDER BY date) - current_price, 0) AS loss
                    FROM technical_metrics
                    WHERE date >= date(?1, '-14 days')
                ) price_changes
                GROUP BY stock_code
            )
            SELECT
                s.stock_code,
                s.stock_name,
                t.current_price,
                t.high_52week,
                t.volume,
                t.avg_volume_10d,
                rc.rsi,
                ROUND(
                    CASE
                        WHEN t.current_price > t.high_52week * 0.95 THEN 30
                        WHEN t.current_price > t.high_52week * 0.90 THEN 20
                        ELSE 0
                    END +
                    CASE
                        WHEN t.volume > t.avg_volume_10d * 2 THEN 30
                        WHEN t.volume > t.avg_volume_10d * 1.5 THEN 20
                        ELSE 0
                    END +
                    CASE
                        WHEN rc.rsi BETWEEN 50 AND 80 THEN 40
                        WHEN rc.rsi BETWEEN 40 AND 90 THEN 20
                        ELSE 0
                    END
                , 2) AS total_score
            FROM stocks s
            JOIN technical_metrics t ON s.stock_code = t.stock_code
            JOIN rsi_calc rc ON s.stock_code = rc.stock_code
            WHERE t.date = ?1
            ORDER BY total_score DESC
            LIMIT ?2
            "#,
        )
        .bind(date)
        .bind(top_n as i64)
        .fetch_all(db.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| ScoreEntry {
                stock_code: r.get("stock_code"),
                stock_name: r.get("stock_name"),
                total_score: r.get::<Option<f64>, _>("total_score").unwrap_or(0.0),
                details: vec![
                    ("current_price", fmt_opt(r.get("current_price"))),
                    ("high_52week", fmt_opt(r.get("high_52week"))),
                    (
                        "volume",
                        r.get::<Option<i64>, _>("volume")
                            .map(|v| v.to_string())
                            .unwrap_or_else(|| "-".to_string()),
                    ),
                    ("rsi", fmt_opt(r.get("rsi"))),
                ],
            })
            .collect())
    }
}

// ----------------------------------------------------------------------
// reverse
// ----------------------------------------------------------------------

/// Contrarian investing: beaten-down price with intact profitability.
pub struct ReverseScorer;

#[async_trait]
impl Scorer for ReverseScorer {
    fn name(&self) -> &'static str {
        "reverse"
    }

    fn describe(&self) -> &'static str {
        "Reverse strategy\n\
         - price position (40): within 5% of 52w low 40, 10% 30, 15% 20\n\
         - roe (30): >15 scores 30, >10 scores 20\n\
         - gross_margin (20): >40 scores 20, >30 scores 10\n\
         - insider_holding (10): >50 scores 10, >30 scores 5"
    }

    async fn calculate(
        &self,
        db: &Database,
        date: NaiveDate,
        top_n: usize,
    ) -> Result<Vec<ScoreEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT
                s.stock_code,
                s.stock_name,
                t.current_price,
                t.low_52week,
                f.roe,
                f.gross_margin,
                im.insider_holding,
                ROUND(
                    CASE
                        WHEN t.current_price < t.low_52week * 1.05 THEN 40
                        WHEN t.current_price < t.low_52week * 1.10 THEN 30
                        WHEN t.current_price < t.low_52week * 1.15 THEN 20
                        ELSE 0
                    END +
                    CASE
                        WHEN f.roe > 15 THEN 30
                        WHEN f.roe > 10 THEN 20
                        ELSE 0
                    END +
                    CASE
                        WHEN f.gross_margin > 40 THEN 20
                        WHEN f.gross_margin > 30 THEN 10
                        ELSE 0
                    END +
                    CASE
                        WHEN im.insider_holding > 50 THEN 10
                        WHEN im.insider_holding > 30 THEN 5
                        ELSE 0
                    END
                , 2) AS total_score
            FROM stocks s
            JOIN technical_metrics t ON s.stock_code = t.stock_code
            JOIN fundamental_metrics f ON s.stock_code = f.stock_code
            JOIN investor_metrics im ON s.stock_code = im.stock_code
            WHERE t.date = ?1
              AND f.date = ?1
              AND im.date = ?1
            ORDER BY total_score DESC
            LIMIT ?2
            "#,
        )
        .bind(date)
        .bind(top_n as i64)
        .fetch_all(db.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| ScoreEntry {
                stock_code: r.get("stock_code"),
                stock_name: r.get("stock_name"),
                total_score: r.get::<Option<f64>, _>("total_score").unwrap_or(0.0),
                details: vec![
                    ("current_price", fmt_opt(r.get("current_price"))),
                    ("low_52week", fmt_opt(r.get("low_52week"))),
                    ("roe", fmt_opt(r.get("roe"))),
                    ("gross_margin", fmt_opt(r.get("gross_margin"))),
                    ("insider_holding", fmt_opt(r.get("insider_holding"))),
                ],
            })
            .collect())
    }
}

// ----------------------------------------------------------------------
// rtpv
// ----------------------------------------------------------------------

/// Composite ROE/RSI/price-change/volume score over a configurable window.
pub struct RtpvScorer {
    pub period_days: i64,
}

#[async_trait]
impl Scorer for RtpvScorer {
    fn name(&self) -> &'static str {
        "rtpv"
    }

    fn describe(&self) -> &'static str {
        "RTPV composite strategy\n\
         - weighted sum: 0.3*roe + 0.3*rsi + 0.3*price_change_pct + 0.1*volume_ratio\n\
         - rsi and price change computed over the configured period"
    }

    async fn calculate(
        &self,
        db: &Database,
        date: NaiveDate,
        top_n: usize,
    ) -> Result<Vec<ScoreEntry>> {
        let rows = sqlx::query(
            r#"
            WITH price_changes AS (
                SELECT stock_code, date,
                       MAX(current_price - LAG(current_price) OVER (
                           PARTITION BY stock_code ORDER BY date), 0) AS gain,
                       MAX(LAG(current_price) OVER (
                           PARTITION BY stock_code ORDER BY date) - current_price, 0) AS loss
                FROM technical_metrics
                WHERE date >= date(?1, '-' || ?2 || ' days')
            ),
            fundamental_score AS (
                SELECT stock_code, roe
                FROM fundamental_metrics
                WHERE date = (SELECT MAX(date) FROM fundamental_metrics WHERE date <= ?1)
            ),
            technical_score AS (
                SELECT pc.stock_code,
                       100 - 100 / (1 + COALESCE(AVG(pc.gain), 0)
                           / NULLIF(COALESCE(AVG(pc.loss), 0), 0)) AS rsi,
                       (MAX(tm.current_price) - MIN(tm.current_price))
                           / NULLIF(MIN(tm.current_price), 0) * 100 AS price_change_percent,
                       COALESCE(AVG(tm.volume), 0) AS avg_volume
                FROM price_changes pc
                JOIN technical_metrics tm
                     ON pc.stock_code = tm.stock_code AND pc.date = tm.date
                WHERE tm.date >= date(?1, '-' || ?2 || ' days')
                GROUP BY pc.stock_code
            )
            SELECT
                s.stock_code,
                s.stock_name,
                fs.roe AS roe_score,
                ts.rsi AS rsi_score,
                ts.price_change_percent AS price_change_score,
                (COALESCE(tm.volume, 0) / NULLIF(COALESCE(ts.avg_volume, 1), 0)) AS volume_ratio,
                ROUND(0.3 * COALESCE(fs.roe, 0) +
                      0.3 * COALESCE(ts.rsi, 0) +
                      0.3 * COALESCE(ts.price_change_percent, 0) +
                      0.1 * (COALESCE(tm.volume, 0) / NULLIF(COALESCE(ts.avg_volume, 1), 0)), 2)
                    AS total_score
            FROM stocks s
            LEFT JOIN fundamental_score fs ON s.stock_code = fs.stock_code
            LEFT JOIN technical_score ts ON s.stock_code = ts.stock_code
            LEFT JOIN technical_metrics tm ON s.stock_code = tm.stock_code AND tm.date = ?1
            ORDER BY total_score DESC
            LIMIT ?3
            "#,
        )
        .bind(date)
        .bind(self.period_days)
        .bind(top_n as i64)
        .fetch_all(db.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| ScoreEntry {
                stock_code: r.get("stock_code"),
                stock_name: r.get("stock_name"),
                total_score: r.get::<Option<f64>, _>("total_score").unwrap_or(0.0),
                details: vec![
                    ("roe", fmt_opt(r.get("roe_score"))),
                    ("rsi", fmt_opt(r.get("rsi_score"))),
                    ("price_change", fmt_opt(r.get("price_change_score"))),
                    ("volume_ratio", fmt_opt(r.get("volume_ratio"))),
                ],
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scorer_lookup() {
        for key in STRATEGY_KEYS {
            let scorer = scorer_for(key, 30).unwrap();
            assert_eq!(scorer.name(), key);
        }
        assert!(scorer_for("unknown", 30).is_none());
    }

    #[test]
    fn test_format_ranking() {
        let entries = vec![ScoreEntry {
            stock_code: "600519".into(),
            stock_name: "贵州茅台".into(),
            total_score: 88.5,
            details: vec![("roe", "21.00".into()), ("rsi", "64.20".into())],
        }];
        let text = format_ranking(&entries, 10);
        assert_eq!(text, "600519 贵州茅台: total=88.50 (roe=21.00, rsi=64.20)");
    }
}
