//! Read-only HTTP API over the analytics tables, plus the AI analysis
//! proxy and the messaging webhook.

use anyhow::Result;
use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::database::Database;
use crate::models::Config;

pub mod ai;
pub mod error;
pub mod scores;
pub mod stocks;
pub mod technical;
pub mod wechat;

/// Shared state handed to every handler.
pub struct AppState {
    pub db: Database,
    pub config: Config,
}

async fn health() -> &'static str {
    "OK"
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/technical/ma/{code}", get(technical::get_moving_averages))
        .route("/api/technical/cross/{code}", get(technical::get_crossovers))
        .route("/api/technical/three-bullish/{code}", get(technical::get_three_bullish))
        .route("/api/technical/engulfing/{code}", get(technical::get_engulfing))
        .route(
            "/api/technical/support-resistance/{code}",
            get(technical::get_support_resistance),
        )
        .route("/api/technical/scores", get(scores::get_technical_scores))
        .route("/api/technical/recommendations", get(scores::get_recommendations))
        .route("/api/chip/analysis", get(scores::get_chip_analysis))
        .route("/api/stocks/{code}/details", get(stocks::get_stock_details))
        .route("/api/stocks/search", get(stocks::search_stocks))
        .route("/api/stocks/{code}/latest-trade-date", get(stocks::get_latest_trade_date))
        .route("/api/stocks/{code}/history", get(stocks::get_recent_history))
        .route("/api/ai/analysis/{code}", get(ai::get_ai_analysis))
        .route("/wx", get(wechat::verify).post(wechat::receive_message))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until shutdown.
pub async fn serve(db: Database, config: Config) -> Result<()> {
    let bind = config.http_bind.clone();
    let state = Arc::new(AppState { db, config });
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!("HTTP server listening on {}", bind);
    axum::serve(listener, app).await?;
    Ok(())
}
