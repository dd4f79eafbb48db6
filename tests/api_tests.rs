//! Router-level tests driven through tower's oneshot.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use pretty_assertions::assert_eq;
use serde_json::Value;
use std::sync::Arc;
use tower::util::ServiceExt;

use stock_insight::analysis::technical;
use stock_insight::server::{router, AppState};

async fn test_app() -> (axum::Router, common::TestDb) {
    let fixture = common::test_db().await;
    let state = Arc::new(AppState {
        db: fixture.db.clone(),
        config: common::test_config(),
    });
    (router(state), fixture)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_returns_ok() {
    let (app, _fixture) = test_app().await;
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn search_matches_code_and_name() {
    let (app, fixture) = test_app().await;
    common::seed_stock(&fixture.db, "600519", "贵州茅台", None).await;
    common::seed_stock(&fixture.db, "000001", "平安银行", None).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/stocks/search?keyword=600")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    let items = json.as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["code"], "600519");
    assert_eq!(items[0]["name"], "贵州茅台");
}

#[tokio::test]
async fn history_returns_ascending_quotes() {
    let (app, fixture) = test_app().await;
    common::seed_stock(&fixture.db, "600519", "贵州茅台", None).await;
    common::seed_quotes(
        &fixture.db,
        "600519",
        common::day(2024, 1, 1),
        10,
        |i| 10.0 + i as f64,
        |_| 1000,
    )
    .await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/stocks/600519/history?days=3")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    let items = json.as_array().unwrap();
    assert_eq!(items.len(), 3);
    assert_eq!(items[0]["date"], "2024-01-08");
    assert_eq!(items[2]["date"], "2024-01-10");
    assert!(items[0]["close"].as_f64().unwrap() < items[2]["close"].as_f64().unwrap());
}

#[tokio::test]
async fn moving_averages_require_date() {
    let (app, fixture) = test_app().await;
    common::seed_stock(&fixture.db, "600519", "贵州茅台", None).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/technical/ma/600519")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("date"));
}

#[tokio::test]
async fn moving_averages_for_seeded_series() {
    let (app, fixture) = test_app().await;
    common::seed_stock(&fixture.db, "600519", "贵州茅台", None).await;
    // constant price makes every average exactly 10.0
    common::seed_quotes(
        &fixture.db,
        "600519",
        common::day(2024, 1, 1),
        30,
        |_| 10.0,
        |_| 1000,
    )
    .await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/technical/ma/600519?date=2024-01-30")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["stock_code"], "600519");
    assert_eq!(json["ma_5"].as_f64().unwrap(), 10.0);
    assert_eq!(json["ma_20"].as_f64().unwrap(), 10.0);
}

#[tokio::test]
async fn moving_averages_missing_date_is_404() {
    let (app, fixture) = test_app().await;
    common::seed_stock(&fixture.db, "600519", "贵州茅台", None).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/technical/ma/600519?date=2024-06-01")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn technical_scores_endpoint_returns_ranking() {
    let (app, fixture) = test_app().await;
    common::seed_stock(&fixture.db, "600519", "贵州茅台", Some("Beverages")).await;
    common::seed_quotes(
        &fixture.db,
        "600519",
        common::day(2024, 1, 1),
        70,
        |i| 100.0 * 1.01f64.powi(i as i32),
        |i| 10_000 + i as i64 * 200,
    )
    .await;
    technical::update_technical_scores(&fixture.db).await.unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/technical/scores?limit=10")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    let scores = json["scores"].as_array().unwrap();
    assert_eq!(scores.len(), 1);
    assert_eq!(scores[0]["stock_code"], "600519");
    assert_eq!(scores[0]["trend_analysis"]["status"], "strong_uptrend");
    assert!(scores[0]["total_score"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn chip_analysis_endpoint_without_data_is_404() {
    let (app, _fixture) = test_app().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/chip/analysis")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn recommendations_unknown_date_lists_available() {
    let (app, _fixture) = test_app().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/technical/recommendations?date=2020-01-01")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let json = body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("2020-01-01"));
    assert!(json["available_dates"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn webhook_get_verifies_signature() {
    let (app, _fixture) = test_app().await;

    // sha1 of sorted (token="testtoken", "111", "222")
    use sha1::{Digest, Sha1};
    let mut parts = ["testtoken", "111", "222"];
    parts.sort_unstable();
    let mut hasher = Sha1::new();
    hasher.update(parts.concat().as_bytes());
    let signature = hex::encode(hasher.finalize());

    let uri = format!(
        "/wx?signature={}&timestamp=111&nonce=222&echostr=hello-world",
        signature
    );
    let response = app
        .oneshot(Request::builder().uri(&uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"hello-world");
}

#[tokio::test]
async fn webhook_post_replies_with_help() {
    let (app, _fixture) = test_app().await;

    let xml = "<xml>\
        <ToUserName><![CDATA[server]]></ToUserName>\
        <FromUserName><![CDATA[user42]]></FromUserName>\
        <MsgType><![CDATA[text]]></MsgType>\
        <Content><![CDATA[help]]></Content>\
        </xml>";

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/wx")
                .body(Body::from(xml))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let reply = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(reply.contains("<ToUserName><![CDATA[user42]]></ToUserName>"));
    assert!(reply.contains("Strategy ranking"));
}

#[tokio::test]
async fn webhook_score_without_data_degrades_gracefully() {
    let (app, _fixture) = test_app().await;

    let xml = "<xml>\
        <ToUserName><![CDATA[server]]></ToUserName>\
        <FromUserName><![CDATA[user42]]></FromUserName>\
        <MsgType><![CDATA[text]]></MsgType>\
        <Content><![CDATA[score rtpv 5]]></Content>\
        </xml>";

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/wx")
                .body(Body::from(xml))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let reply = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(reply.contains("No valid trading data found"));
}
