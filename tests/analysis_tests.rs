//! Tests for the daily analytics jobs against seeded quote history.

mod common;

use pretty_assertions::assert_eq;
use sqlx::Row;

use stock_insight::analysis::{chip, recommend, technical};

#[tokio::test]
async fn technical_scores_rank_uptrend_over_downtrend() {
    let fixture = common::test_db().await;
    let start = common::day(2024, 1, 1);

    common::seed_stock(&fixture.db, "600519", "贵州茅台", Some("Beverages")).await;
    common::seed_stock(&fixture.db, "000002", "万科A", Some("Real Estate")).await;

    // accelerating uptrend with expanding volume
    common::seed_quotes(
        &fixture.db,
        "600519",
        start,
        70,
        |i| 100.0 * 1.01f64.powi(i as i32),
        |i| 10_000 + i as i64 * 200,
    )
    .await;
    // steady decline on flat volume
    common::seed_quotes(
        &fixture.db,
        "000002",
        start,
        70,
        |i| 50.0 - i as f64 * 0.2,
        |_| 10_000,
    )
    .await;

    assert!(technical::update_technical_scores(&fixture.db).await.unwrap());

    let rows = sqlx::query(
        "SELECT stock_code, total_score, trend_score FROM stock_technical_scores
         ORDER BY total_score DESC",
    )
    .fetch_all(fixture.db.pool())
    .await
    .unwrap();
    assert_eq!(rows.len(), 2);

    // the uptrend must outrank the decline, with the full trend bucket
    assert_eq!(rows[0].get::<String, _>("stock_code"), "600519");
    assert_eq!(rows[0].get::<i64, _>("trend_score"), 40);
    assert!(rows[0].get::<i64, _>("total_score") > rows[1].get::<i64, _>("total_score"));

    // rerunning for the same date replaces rather than duplicates
    assert!(technical::update_technical_scores(&fixture.db).await.unwrap());
    let count = sqlx::query("SELECT COUNT(*) AS count FROM stock_technical_scores")
        .fetch_one(fixture.db.pool())
        .await
        .unwrap();
    assert_eq!(count.get::<i64, _>("count"), 2);
}

#[tokio::test]
async fn technical_scores_skip_empty_database() {
    let fixture = common::test_db().await;
    assert!(!technical::update_technical_scores(&fixture.db).await.unwrap());
}

#[tokio::test]
async fn chip_analysis_selects_accumulation_candidate() {
    let fixture = common::test_db().await;
    let start = common::day(2024, 1, 1);

    common::seed_stock(&fixture.db, "600519", "贵州茅台", Some("Beverages")).await;
    // flat price at 10.0 with bursts of heavy volume right at the cost
    // line: classic accumulation, so the buy_dip filter must match
    common::seed_quotes(
        &fixture.db,
        "600519",
        start,
        70,
        |_| 10.0,
        |i| if i % 3 == 0 { 2000 } else { 1000 },
    )
    .await;

    assert!(chip::update_chip_analysis(&fixture.db).await.unwrap());

    let rows = sqlx::query(
        "SELECT stock_code, strategy_type, rank_num, main_chip_ratio
         FROM stock_chip_analysis
         WHERE strategy_type = 'buy_dip'",
    )
    .fetch_all(fixture.db.pool())
    .await
    .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get::<String, _>("stock_code"), "600519");
    assert_eq!(rows[0].get::<i64, _>("rank_num"), 1);
    assert!(rows[0].get::<Option<f64>, _>("main_chip_ratio").unwrap() >= 0.3);

    // second run for the same date is a no-op
    assert!(!chip::update_chip_analysis(&fixture.db).await.unwrap());
}

#[tokio::test]
async fn chip_analysis_skips_empty_database() {
    let fixture = common::test_db().await;
    assert!(!chip::update_chip_analysis(&fixture.db).await.unwrap());
}

#[tokio::test]
async fn recommendations_follow_score_thresholds() {
    let fixture = common::test_db().await;
    let start = common::day(2024, 1, 1);

    common::seed_stock(&fixture.db, "600519", "贵州茅台", Some("Beverages")).await;
    common::seed_quotes(
        &fixture.db,
        "600519",
        start,
        70,
        |i| 100.0 * 1.01f64.powi(i as i32),
        |i| 10_000 + i as i64 * 200,
    )
    .await;

    assert!(technical::update_technical_scores(&fixture.db).await.unwrap());
    let count = recommend::update_recommendations(&fixture.db).await.unwrap();
    assert_eq!(count, 1);

    let row = sqlx::query(
        "SELECT total_score, recommendation_level, reasons FROM stock_recommendations",
    )
    .fetch_one(fixture.db.pool())
    .await
    .unwrap();

    let total: i64 = row.get("total_score");
    let level: String = row.get("recommendation_level");
    let expected = if total >= 90 {
        "strong_buy"
    } else if total >= 75 {
        "buy"
    } else {
        "watch"
    };
    assert_eq!(level, expected);
    assert!(!row.get::<String, _>("reasons").is_empty());
}
