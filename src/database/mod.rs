use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Row, SqlitePool,
};
use tracing::info;

use crate::models::{
    DailyQuote, FinancialHealth, FundamentalMetrics, IndustryMetrics, InvestorMetrics,
    Recommendation, Stock, TechnicalMetrics, TechnicalScore,
};

/// Schema statements, executed one by one at startup. All tables are created
/// idempotently so repeated runs against the same file are safe.
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS stocks (
        stock_code TEXT PRIMARY KEY,
        stock_name TEXT NOT NULL,
        sector TEXT,
        industry TEXT,
        company_name_en TEXT,
        description TEXT,
        website TEXT,
        employees INTEGER,
        listing_date DATE,
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS stock_historical_quotes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        stock_code TEXT NOT NULL,
        trade_date DATE NOT NULL,
        open_price REAL NOT NULL,
        close_price REAL NOT NULL,
        high_price REAL NOT NULL,
        low_price REAL NOT NULL,
        volume INTEGER NOT NULL,
        amount REAL,
        amplitude REAL,
        change_ratio REAL,
        change_amount REAL,
        turnover_ratio REAL,
        source TEXT NOT NULL DEFAULT 'eastmoney',
        adjust_type TEXT NOT NULL DEFAULT 'qfq',
        UNIQUE(stock_code, trade_date)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS fundamental_metrics (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        stock_code TEXT NOT NULL,
        date DATE NOT NULL,
        pe_ratio REAL,
        pb_ratio REAL,
        roe REAL,
        revenue_growth REAL,
        earnings_growth REAL,
        gross_margin REAL,
        operating_margin REAL,
        dividend_yield REAL,
        UNIQUE(stock_code, date)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS technical_metrics (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        stock_code TEXT NOT NULL,
        date DATE NOT NULL,
        current_price REAL,
        high_52week REAL,
        low_52week REAL,
        volume INTEGER,
        avg_volume INTEGER,
        avg_volume_10d INTEGER,
        ma_200 REAL,
        beta REAL,
        UNIQUE(stock_code, date)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS financial_health (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        stock_code TEXT NOT NULL,
        report_date DATE NOT NULL,
        quick_ratio REAL,
        current_ratio REAL,
        cash_ratio REAL,
        debt_to_equity REAL,
        interest_coverage REAL,
        operating_cash_flow REAL,
        cash_flow_coverage REAL,
        UNIQUE(stock_code, report_date)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS industry_metrics (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        stock_code TEXT NOT NULL,
        date DATE NOT NULL,
        profit_margin REAL,
        price_to_sales REAL,
        industry_rank INTEGER,
        UNIQUE(stock_code, date)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS investor_metrics (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        stock_code TEXT NOT NULL,
        date DATE NOT NULL,
        insider_holding REAL,
        institution_holding REAL,
        UNIQUE(stock_code, date)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS stock_chip_analysis (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        stock_code TEXT NOT NULL,
        stock_name TEXT NOT NULL,
        industry TEXT,
        analysis_date DATE NOT NULL,
        strategy_type TEXT NOT NULL,
        close_price REAL NOT NULL,
        ma60 REAL,
        vwap REAL,
        profit_chip_ratio REAL,
        locked_chip_ratio REAL,
        main_chip_ratio REAL,
        floating_chip_ratio REAL,
        rank_num INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS stock_technical_scores (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        stock_code TEXT NOT NULL,
        score_date DATE NOT NULL,
        trend_score INTEGER NOT NULL,
        momentum_score INTEGER NOT NULL,
        volatility_score INTEGER NOT NULL,
        volume_score INTEGER NOT NULL,
        bollinger_score INTEGER NOT NULL,
        total_score INTEGER NOT NULL,
        ma5 REAL, ma20 REAL, ma60 REAL,
        vol_ma5 REAL, vol_ma20 REAL,
        volatility REAL,
        boll_upper REAL, boll_lower REAL,
        macd REAL, macd_signal REAL,
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
        UNIQUE(stock_code, score_date)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS stock_recommendations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        recommend_date DATE NOT NULL,
        stock_code TEXT NOT NULL,
        stock_name TEXT NOT NULL,
        industry TEXT,
        current_price REAL NOT NULL,
        total_score INTEGER NOT NULL,
        recommendation_level TEXT NOT NULL,
        reasons TEXT NOT NULL,
        UNIQUE(stock_code, recommend_date)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS update_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        table_name TEXT NOT NULL,
        update_type TEXT NOT NULL,
        start_time DATETIME NOT NULL,
        end_time DATETIME NOT NULL,
        status TEXT NOT NULL,
        records_affected INTEGER NOT NULL DEFAULT 0,
        error_message TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_quotes_code_date ON stock_historical_quotes(stock_code, trade_date)",
    "CREATE INDEX IF NOT EXISTS idx_quotes_date ON stock_historical_quotes(trade_date)",
    "CREATE INDEX IF NOT EXISTS idx_chip_date_type ON stock_chip_analysis(analysis_date, strategy_type)",
    "CREATE INDEX IF NOT EXISTS idx_scores_date ON stock_technical_scores(score_date)",
    "CREATE INDEX IF NOT EXISTS idx_recommendations_date ON stock_recommendations(recommend_date)",
];

/// SQLX-based database manager shared by the importers, analytics jobs and
/// the HTTP server.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (or create) the database file and apply the schema.
    pub async fn new(database_path: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(16)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect_with(
                SqliteConnectOptions::new()
                    .filename(database_path)
                    .create_if_missing(true),
            )
            .await?;

        // WAL mode for concurrent readers during imports
        sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
        sqlx::query("PRAGMA synchronous = NORMAL").execute(&pool).await?;
        sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;

        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }

        info!("Database initialized at {}", database_path);
        Ok(Self { pool })
    }

    /// Raw pool handle for modules that run their own analytics SQL.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ------------------------------------------------------------------
    // stocks
    // ------------------------------------------------------------------

    /// Insert or update a stock's basic information.
    pub async fn upsert_stock(&self, stock: &Stock) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO stocks (stock_code, stock_name, sector, industry, company_name_en,
                                description, website, employees, listing_date)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(stock_code) DO UPDATE SET
                stock_name = excluded.stock_name,
                sector = excluded.sector,
                industry = excluded.industry,
                company_name_en = excluded.company_name_en,
                description = excluded.description,
                website = excluded.website,
                employees = excluded.employees,
                listing_date = excluded.listing_date
            "#,
        )
        .bind(&stock.stock_code)
        .bind(&stock.stock_name)
        .bind(&stock.sector)
        .bind(&stock.industry)
        .bind(&stock.company_name_en)
        .bind(&stock.description)
        .bind(&stock.website)
        .bind(stock.employees)
        .bind(stock.listing_date)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Create a minimal stock row if the code has never been seen.
    pub async fn ensure_stock_exists(&self, stock_code: &str, stock_name: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO stocks (stock_code, stock_name) VALUES (?, ?)
             ON CONFLICT(stock_code) DO NOTHING",
        )
        .bind(stock_code)
        .bind(stock_name)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_stock(&self, stock_code: &str) -> Result<Option<Stock>> {
        let row = sqlx::query(
            r#"
            SELECT stock_code, stock_name, sector, industry, company_name_en,
                   description, website, employees, listing_date
            FROM stocks
            WHERE stock_code = ?
            "#,
        )
        .bind(stock_code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Stock {
            stock_code: r.get("stock_code"),
            stock_name: r.get("stock_name"),
            sector: r.get("sector"),
            industry: r.get("industry"),
            company_name_en: r.get("company_name_en"),
            description: r.get("description"),
            website: r.get("website"),
            employees: r.get("employees"),
            listing_date: r.get("listing_date"),
        }))
    }

    /// Code/name substring search used by the API.
    pub async fn search_stocks(&self, keyword: &str) -> Result<Vec<(String, String)>> {
        let pattern = format!("%{}%", keyword);
        let rows = sqlx::query(
            "SELECT stock_code, stock_name FROM stocks
             WHERE stock_code LIKE ? OR stock_name LIKE ?
             LIMIT 50",
        )
        .bind(&pattern)
        .bind(&pattern)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| (r.get("stock_code"), r.get("stock_name")))
            .collect())
    }

    // ------------------------------------------------------------------
    // historical quotes
    // ------------------------------------------------------------------

    /// Upsert one daily quote keyed on (stock_code, trade_date).
    pub async fn upsert_quote(&self, quote: &DailyQuote) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO stock_historical_quotes (
                stock_code, trade_date, open_price, close_price, high_price, low_price,
                volume, amount, amplitude, change_ratio, change_amount, turnover_ratio,
                source, adjust_type
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(stock_code, trade_date) DO UPDATE SET
                open_price = excluded.open_price,
                close_price = excluded.close_price,
                high_price = excluded.high_price,
                low_price = excluded.low_price,
                volume = excluded.volume,
                amount = excluded.amount,
                amplitude = excluded.amplitude,
                change_ratio = excluded.change_ratio,
                change_amount = excluded.change_amount,
                turnover_ratio = excluded.turnover_ratio,
                source = excluded.source,
                adjust_type = excluded.adjust_type
            "#,
        )
        .bind(&quote.stock_code)
        .bind(quote.trade_date)
        .bind(quote.open_price)
        .bind(quote.close_price)
        .bind(quote.high_price)
        .bind(quote.low_price)
        .bind(quote.volume)
        .bind(quote.amount)
        .bind(quote.amplitude)
        .bind(quote.change_ratio)
        .bind(quote.change_amount)
        .bind(quote.turnover_ratio)
        .bind(&quote.source)
        .bind(&quote.adjust_type)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Most recent trade date across all stocks.
    pub async fn latest_trade_date(&self) -> Result<Option<NaiveDate>> {
        let row = sqlx::query("SELECT MAX(trade_date) AS latest FROM stock_historical_quotes")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<Option<NaiveDate>, _>("latest"))
    }

    /// Most recent trade date for one stock.
    pub async fn latest_trade_date_for(&self, stock_code: &str) -> Result<Option<NaiveDate>> {
        let row = sqlx::query(
            "SELECT MAX(trade_date) AS latest FROM stock_historical_quotes WHERE stock_code = ?",
        )
        .bind(stock_code)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<Option<NaiveDate>, _>("latest"))
    }

    pub async fn has_quote(&self, stock_code: &str, date: NaiveDate) -> Result<bool> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count FROM stock_historical_quotes
             WHERE stock_code = ? AND trade_date = ?",
        )
        .bind(stock_code)
        .bind(date)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>("count") > 0)
    }

    /// Last `days` quotes for a stock, oldest first.
    pub async fn recent_history(&self, stock_code: &str, days: i64) -> Result<Vec<DailyQuote>> {
        let rows = sqlx::query(
            r#"
            SELECT stock_code, trade_date, open_price, close_price, high_price, low_price,
                   volume, amount, amplitude, change_ratio, change_amount, turnover_ratio,
                   source, adjust_type
            FROM stock_historical_quotes
            WHERE stock_code = ?
            ORDER BY trade_date DESC
            LIMIT ?
            "#,
        )
        .bind(stock_code)
        .bind(days)
        .fetch_all(&self.pool)
        .await?;

        let mut quotes: Vec<DailyQuote> = rows.into_iter().map(map_quote).collect();
        quotes.reverse();
        Ok(quotes)
    }

    /// Latest quote row for a stock.
    pub async fn latest_quote(&self, stock_code: &str) -> Result<Option<DailyQuote>> {
        let row = sqlx::query(
            r#"
            SELECT stock_code, trade_date, open_price, close_price, high_price, low_price,
                   volume, amount, amplitude, change_ratio, change_amount, turnover_ratio,
                   source, adjust_type
            FROM stock_historical_quotes
            WHERE stock_code = ?
            ORDER BY trade_date DESC
            LIMIT 1
            "#,
        )
        .bind(stock_code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(map_quote))
    }

    /// Count of distinct stocks plus earliest trade date, used to sanity-check
    /// data coverage before running analytics.
    pub async fn quote_coverage(&self) -> Result<(i64, Option<NaiveDate>)> {
        let row = sqlx::query(
            "SELECT COUNT(DISTINCT stock_code) AS stock_count, MIN(trade_date) AS earliest
             FROM stock_historical_quotes",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok((row.get("stock_count"), row.get("earliest")))
    }

    /// Delete quotes filtered by optional stock code and date range; returns
    /// the number of deleted rows.
    pub async fn delete_quotes(
        &self,
        stock_code: Option<&str>,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Result<u64> {
        let mut conditions = Vec::new();
        if stock_code.is_some() {
            conditions.push("stock_code = ?");
        }
        if start_date.is_some() {
            conditions.push("trade_date >= ?");
        }
        if end_date.is_some() {
            conditions.push("trade_date <= ?");
        }
        let where_clause = if conditions.is_empty() {
            "1=1".to_string()
        } else {
            conditions.join(" AND ")
        };

        let sql = format!("DELETE FROM stock_historical_quotes WHERE {}", where_clause);
        let mut query = sqlx::query(&sql);
        if let Some(code) = stock_code {
            query = query.bind(code.to_string());
        }
        if let Some(start) = start_date {
            query = query.bind(start);
        }
        if let Some(end) = end_date {
            query = query.bind(end);
        }

        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    // ------------------------------------------------------------------
    // metric tables
    // ------------------------------------------------------------------

    pub async fn upsert_fundamental(&self, m: &FundamentalMetrics) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO fundamental_metrics (stock_code, date, pe_ratio, pb_ratio, roe,
                revenue_growth, earnings_growth, gross_margin, operating_margin, dividend_yield)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(stock_code, date) DO UPDATE SET
                pe_ratio = excluded.pe_ratio,
                pb_ratio = excluded.pb_ratio,
                roe = excluded.roe,
                revenue_growth = excluded.revenue_growth,
                earnings_growth = excluded.earnings_growth,
                gross_margin = excluded.gross_margin,
                operating_margin = excluded.operating_margin,
                dividend_yield = excluded.dividend_yield
            "#,
        )
        .bind(&m.stock_code)
        .bind(m.date)
        .bind(m.pe_ratio)
        .bind(m.pb_ratio)
        .bind(m.roe)
        .bind(m.revenue_growth)
        .bind(m.earnings_growth)
        .bind(m.gross_margin)
        .bind(m.operating_margin)
        .bind(m.dividend_yield)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_technical(&self, m: &TechnicalMetrics) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO technical_metrics (stock_code, date, current_price, high_52week,
                low_52week, volume, avg_volume, avg_volume_10d, ma_200, beta)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(stock_code, date) DO UPDATE SET
                current_price = excluded.current_price,
                high_52week = excluded.high_52week,
                low_52week = excluded.low_52week,
                volume = excluded.volume,
                avg_volume = excluded.avg_volume,
                avg_volume_10d = excluded.avg_volume_10d,
                ma_200 = excluded.ma_200,
                beta = excluded.beta
            "#,
        )
        .bind(&m.stock_code)
        .bind(m.date)
        .bind(m.current_price)
        .bind(m.high_52week)
        .bind(m.low_52week)
        .bind(m.volume)
        .bind(m.avg_volume)
        .bind(m.avg_volume_10d)
        .bind(m.ma_200)
        .bind(m.beta)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_financial_health(&self, m: &FinancialHealth) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO financial_health (stock_code, report_date, quick_ratio, current_ratio,
                cash_ratio, debt_to_equity, interest_coverage, operating_cash_flow,
                cash_flow_coverage)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(stock_code, report_date) DO UPDATE SET
                quick_ratio = excluded.quick_ratio,
                current_ratio = excluded.current_ratio,
                cash_ratio = excluded.cash_ratio,
                debt_to_equity = excluded.debt_to_equity,
                interest_coverage = excluded.interest_coverage,
                operating_cash_flow = excluded.operating_cash_flow,
                cash_flow_coverage = excluded.cash_flow_coverage
            "#,
        )
        .bind(&m.stock_code)
        .bind(m.report_date)
        .bind(m.quick_ratio)
        .bind(m.current_ratio)
        .bind(m.cash_ratio)
        .bind(m.debt_to_equity)
        .bind(m.interest_coverage)
        .bind(m.operating_cash_flow)
        .bind(m.cash_flow_coverage)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_industry(&self, m: &IndustryMetrics) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO industry_metrics (stock_code, date, profit_margin, price_to_sales,
                industry_rank)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(stock_code, date) DO UPDATE SET
                profit_margin = excluded.profit_margin,
                price_to_sales = excluded.price_to_sales,
                industry_rank = excluded.industry_rank
            "#,
        )
        .bind(&m.stock_code)
        .bind(m.date)
        .bind(m.profit_margin)
        .bind(m.price_to_sales)
        .bind(m.industry_rank)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_investor(&self, m: &InvestorMetrics) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO investor_metrics (stock_code, date, insider_holding, institution_holding)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(stock_code, date) DO UPDATE SET
                insider_holding = excluded.insider_holding,
                institution_holding = excluded.institution_holding
            "#,
        )
        .bind(&m.stock_code)
        .bind(m.date)
        .bind(m.insider_holding)
        .bind(m.institution_holding)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Most recent metric date, used as the default scoring date.
    pub async fn latest_metric_date(&self) -> Result<Option<NaiveDate>> {
        let row = sqlx::query("SELECT MAX(date) AS latest FROM fundamental_metrics")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<Option<NaiveDate>, _>("latest"))
    }

    // ------------------------------------------------------------------
    // technical scores / recommendations
    // ------------------------------------------------------------------

    pub async fn delete_technical_scores(&self, date: NaiveDate) -> Result<u64> {
        let result = sqlx::query("DELETE FROM stock_technical_scores WHERE score_date = ?")
            .bind(date)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn insert_technical_score(&self, score: &TechnicalScore) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO stock_technical_scores (
                stock_code, score_date, trend_score, momentum_score, volatility_score,
                volume_score, bollinger_score, total_score, ma5, ma20, ma60,
                vol_ma5, vol_ma20, volatility, boll_upper, boll_lower, macd, macd_signal
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(stock_code, score_date) DO UPDATE SET
                trend_score = excluded.trend_score,
                momentum_score = excluded.momentum_score,
                volatility_score = excluded.volatility_score,
                volume_score = excluded.volume_score,
                bollinger_score = excluded.bollinger_score,
                total_score = excluded.total_score,
                ma5 = excluded.ma5, ma20 = excluded.ma20, ma60 = excluded.ma60,
                vol_ma5 = excluded.vol_ma5, vol_ma20 = excluded.vol_ma20,
                volatility = excluded.volatility,
                boll_upper = excluded.boll_upper, boll_lower = excluded.boll_lower,
                macd = excluded.macd, macd_signal = excluded.macd_signal
            "#,
        )
        .bind(&score.stock_code)
        .bind(score.score_date)
        .bind(score.trend_score)
        .bind(score.momentum_score)
        .bind(score.volatility_score)
        .bind(score.volume_score)
        .bind(score.bollinger_score)
        .bind(score.total_score)
        .bind(score.ma5)
        .bind(score.ma20)
        .bind(score.ma60)
        .bind(score.vol_ma5)
        .bind(score.vol_ma20)
        .bind(score.volatility)
        .bind(score.boll_upper)
        .bind(score.boll_lower)
        .bind(score.macd)
        .bind(score.macd_signal)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_recommendations(&self, date: NaiveDate) -> Result<u64> {
        let result = sqlx::query("DELETE FROM stock_recommendations WHERE recommend_date = ?")
            .bind(date)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn insert_recommendation(&self, rec: &Recommendation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO stock_recommendations (recommend_date, stock_code, stock_name,
                industry, current_price, total_score, recommendation_level, reasons)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(stock_code, recommend_date) DO UPDATE SET
                current_price = excluded.current_price,
                total_score = excluded.total_score,
                recommendation_level = excluded.recommendation_level,
                reasons = excluded.reasons
            "#,
        )
        .bind(rec.recommend_date)
        .bind(&rec.stock_code)
        .bind(&rec.stock_name)
        .bind(&rec.industry)
        .bind(rec.current_price)
        .bind(rec.total_score)
        .bind(&rec.recommendation_level)
        .bind(&rec.reasons)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // chip analysis
    // ------------------------------------------------------------------

    pub async fn has_chip_analysis(&self, date: NaiveDate) -> Result<bool> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count FROM stock_chip_analysis WHERE analysis_date = ?",
        )
        .bind(date)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>("count") > 0)
    }

    pub async fn delete_chip_analysis(&self, date: NaiveDate) -> Result<u64> {
        let result = sqlx::query("DELETE FROM stock_chip_analysis WHERE analysis_date = ?")
            .bind(date)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    // ------------------------------------------------------------------
    // maintenance / update logs
    // ------------------------------------------------------------------

    /// Record the outcome of a batch run.
    pub async fn log_update(
        &self,
        table_name: &str,
        update_type: &str,
        start_time: DateTime<Utc>,
        status: &str,
        records_affected: i64,
        error_message: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO update_logs (table_name, update_type, start_time, end_time, status,
                records_affected, error_message)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(table_name)
        .bind(update_type)
        .bind(start_time)
        .bind(Utc::now())
        .bind(status)
        .bind(records_affected)
        .bind(error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete metric rows for one date across the five metric tables, plus
    /// the matching update log entries.
    pub async fn delete_metrics_on(&self, date: NaiveDate) -> Result<u64> {
        let mut deleted = 0u64;
        for table in ["investor_metrics", "industry_metrics", "technical_metrics", "fundamental_metrics"] {
            let sql = format!("DELETE FROM {} WHERE date = ?", table);
            deleted += sqlx::query(&sql).bind(date).execute(&self.pool).await?.rows_affected();
        }
        deleted += sqlx::query("DELETE FROM financial_health WHERE report_date = ?")
            .bind(date)
            .execute(&self.pool)
            .await?
            .rows_affected();
        sqlx::query("DELETE FROM update_logs WHERE DATE(start_time) = ?")
            .bind(date)
            .execute(&self.pool)
            .await?;
        Ok(deleted)
    }

    /// Wipe all metric history, preserving the stocks table.
    pub async fn clear_metric_tables(&self) -> Result<()> {
        for table in [
            "investor_metrics",
            "industry_metrics",
            "technical_metrics",
            "fundamental_metrics",
            "financial_health",
            "update_logs",
        ] {
            let sql = format!("DELETE FROM {}", table);
            sqlx::query(&sql).execute(&self.pool).await?;
        }
        Ok(())
    }
}

fn map_quote(r: sqlx::sqlite::SqliteRow) -> DailyQuote {
    DailyQuote {
        stock_code: r.get("stock_code"),
        trade_date: r.get("trade_date"),
        open_price: r.get("open_price"),
        close_price: r.get("close_price"),
        high_price: r.get("high_price"),
        low_price: r.get("low_price"),
        volume: r.get("volume"),
        amount: r.get("amount"),
        amplitude: r.get("amplitude"),
        change_ratio: r.get("change_ratio"),
        change_amount: r.get("change_amount"),
        turnover_ratio: r.get("turnover_ratio"),
        source: r.get("source"),
        adjust_type: r.get("adjust_type"),
    }
}
