//! Market data client tests against a mocked HTTP server.

mod common;

use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use stock_insight::api::{EastmoneyClient, Market, MarketDataProvider};

#[tokio::test]
async fn stock_list_parses_codes_and_names() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/qt/clist/get"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "diff": [
                    {"f12": "600519", "f14": "贵州茅台"},
                    {"f12": 1, "f14": "短代码"},
                ]
            }
        })))
        .mount(&server)
        .await;

    let client = EastmoneyClient::new(&common::test_config())
        .unwrap()
        .with_base_url(&server.uri());

    let entries = client.fetch_stock_list(Market::Shanghai).await.unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].code, "600519");
    assert_eq!(entries[0].name, "贵州茅台");
    assert_eq!(entries[0].market, "SH");
    // numeric codes get zero-padded to six digits
    assert_eq!(entries[1].code, "000001");
}

#[tokio::test]
async fn daily_history_parses_kline_rows() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/qt/stock/kline/get"))
        .and(query_param("secid", "1.600519"))
        .and(query_param("klt", "101"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "code": "600519",
                "name": "贵州茅台",
                "klines": [
                    "2024-01-02,1690.0,1700.0,1712.0,1688.0,25000,42500000.0,1.42,0.59,10.0,0.2",
                    "2024-01-03,1700.0,1695.0,1705.0,1690.0,21000,35595000.0,0.88,-0.29,-5.0,0.17"
                ]
            }
        })))
        .mount(&server)
        .await;

    let client = EastmoneyClient::new(&common::test_config())
        .unwrap()
        .with_base_url(&server.uri());

    let bars = client
        .fetch_daily_history("600519", None, None)
        .await
        .unwrap();
    assert_eq!(bars.len(), 2);
    assert_eq!(bars[0].trade_date, common::day(2024, 1, 2));
    assert_eq!(bars[0].close, 1700.0);
    assert_eq!(bars[1].volume, 21000);
    assert_eq!(bars[1].change_amount, -5.0);
}

#[tokio::test]
async fn daily_history_surfaces_http_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/qt/stock/kline/get"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let client = EastmoneyClient::new(&common::test_config())
        .unwrap()
        .with_base_url(&server.uri());

    let result = client.fetch_daily_history("600519", None, None).await;
    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("500"));
}
