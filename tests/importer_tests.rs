//! End-to-end tests for the concurrent batch importers.

mod common;

use chrono::NaiveDate;
use pretty_assertions::assert_eq;
use sqlx::Row;
use tempfile::tempdir;

use stock_insight::importer::{self, MetricsImportOptions, QuoteImportOptions};

const CSV_HEADER: &str = "Date,Open,Close,High,Low,Volume,Amount,Amplitude,Change,ChangeAmount,Turnover";

fn write_history_csv(dir: &std::path::Path, name: &str, rows: &[&str]) {
    let mut content = String::from(CSV_HEADER);
    for row in rows {
        content.push('\n');
        content.push_str(row);
    }
    std::fs::write(dir.join(name), content).unwrap();
}

#[tokio::test]
async fn quote_import_loads_all_rows() {
    let fixture = common::test_db().await;
    let data_dir = tempdir().unwrap();

    write_history_csv(
        data_dir.path(),
        "600519_贵州茅台_history.csv",
        &[
            "2024-01-02,10.0,10.5,10.8,9.9,1000,10500,9.0,5.0,0.5,1.2",
            "2024-01-03,10.5,10.7,10.9,10.4,1100,11770,4.7,1.9,0.2,1.3",
        ],
    );
    write_history_csv(
        data_dir.path(),
        "000001_平安银行_history.csv",
        &["2024-01-02,8.0,8.1,8.2,7.9,2000,16200,3.7,1.2,0.1,0.8"],
    );

    let options = QuoteImportOptions {
        data_dir: data_dir.path().to_path_buf(),
        start_date: None,
        end_date: None,
        max_workers: 4,
    };
    let summary = importer::import_quotes(&fixture.db, &options).await.unwrap();

    assert_eq!(summary.total_files, 2);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.records, 3);
    assert!(summary.failed_files.is_empty());

    // stock rows were created on demand
    let stock = fixture.db.get_stock("600519").await.unwrap().unwrap();
    assert_eq!(stock.stock_name, "贵州茅台");

    let history = fixture.db.recent_history("600519", 10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].trade_date, common::day(2024, 1, 2));
    assert_eq!(history[1].close_price, 10.7);

    // one update_logs row with the affected record count
    let log = sqlx::query("SELECT status, records_affected FROM update_logs")
        .fetch_one(fixture.db.pool())
        .await
        .unwrap();
    assert_eq!(log.get::<String, _>("status"), "SUCCESS");
    assert_eq!(log.get::<i64, _>("records_affected"), 3);
}

#[tokio::test]
async fn quote_import_is_idempotent() {
    let fixture = common::test_db().await;
    let data_dir = tempdir().unwrap();

    write_history_csv(
        data_dir.path(),
        "600519_贵州茅台_history.csv",
        &["2024-01-02,10.0,10.5,10.8,9.9,1000,10500,9.0,5.0,0.5,1.2"],
    );

    let options = QuoteImportOptions {
        data_dir: data_dir.path().to_path_buf(),
        start_date: None,
        end_date: None,
        max_workers: 1,
    };
    importer::import_quotes(&fixture.db, &options).await.unwrap();
    importer::import_quotes(&fixture.db, &options).await.unwrap();

    let history = fixture.db.recent_history("600519", 10).await.unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn quote_import_isolates_bad_files() {
    let fixture = common::test_db().await;
    let data_dir = tempdir().unwrap();

    write_history_csv(
        data_dir.path(),
        "600519_贵州茅台_history.csv",
        &["2024-01-02,10.0,10.5,10.8,9.9,1000,10500,9.0,5.0,0.5,1.2"],
    );
    // malformed date in the second file must not abort the batch
    write_history_csv(
        data_dir.path(),
        "000002_万科A_history.csv",
        &["not-a-date,1,1,1,1,1,1,1,1,1,1"],
    );

    let options = QuoteImportOptions {
        data_dir: data_dir.path().to_path_buf(),
        start_date: None,
        end_date: None,
        max_workers: 4,
    };
    let summary = importer::import_quotes(&fixture.db, &options).await.unwrap();

    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed_files.len(), 1);
    assert!(summary.failed_files[0].to_string_lossy().contains("000002"));

    let history = fixture.db.recent_history("600519", 10).await.unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn quote_import_respects_date_range() {
    let fixture = common::test_db().await;
    let data_dir = tempdir().unwrap();

    write_history_csv(
        data_dir.path(),
        "600519_贵州茅台_history.csv",
        &[
            "2024-01-02,10.0,10.5,10.8,9.9,1000,10500,9.0,5.0,0.5,1.2",
            "2024-01-03,10.5,10.7,10.9,10.4,1100,11770,4.7,1.9,0.2,1.3",
            "2024-01-04,10.7,10.6,10.8,10.5,900,9540,2.8,-0.9,-0.1,1.0",
        ],
    );

    let options = QuoteImportOptions {
        data_dir: data_dir.path().to_path_buf(),
        start_date: Some(NaiveDate::from_ymd_opt(2024, 1, 3).unwrap()),
        end_date: Some(NaiveDate::from_ymd_opt(2024, 1, 3).unwrap()),
        max_workers: 1,
    };
    let summary = importer::import_quotes(&fixture.db, &options).await.unwrap();

    assert_eq!(summary.records, 1);
    let history = fixture.db.recent_history("600519", 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].trade_date, common::day(2024, 1, 3));
}

#[tokio::test]
async fn stock_info_import_fills_basic_columns() {
    let fixture = common::test_db().await;
    let data_dir = tempdir().unwrap();

    let info_dir = data_dir.path().join("stock_info/2024-01-05/Beverages");
    std::fs::create_dir_all(&info_dir).unwrap();
    std::fs::write(
        info_dir.join("600519_贵州茅台_info.json"),
        r#"{"stock_code": "600519", "stock_name": "贵州茅台", "sector": "Consumer Defensive",
            "industry": "Beverages", "longName": "Kweichow Moutai Co., Ltd.",
            "website": "https://www.moutaichina.com", "fullTimeEmployees": 33672,
            "firstTradeDateEpochUtc": 998524800}"#,
    )
    .unwrap();

    let imported = importer::import_stock_info(&fixture.db, data_dir.path())
        .await
        .unwrap();
    assert_eq!(imported, 1);

    let stock = fixture.db.get_stock("600519").await.unwrap().unwrap();
    assert_eq!(stock.sector.as_deref(), Some("Consumer Defensive"));
    assert_eq!(stock.employees, Some(33672));
    assert_eq!(stock.listing_date, Some(common::day(2001, 8, 23)));
}

#[tokio::test]
async fn metrics_import_loads_latest_date() {
    let fixture = common::test_db().await;
    let data_dir = tempdir().unwrap();

    let fundamental_dir = data_dir
        .path()
        .join("stock_analysis/2024-01-05/Technology/fundamental");
    std::fs::create_dir_all(&fundamental_dir).unwrap();
    std::fs::write(
        fundamental_dir.join("600519_贵州茅台_fundamental.json"),
        r#"{"stock_code": "600519", "stock_name": "贵州茅台", "date": "2024-01-05",
            "pe_ratio": 28.5, "pb_ratio": 8.1, "roe": 24.0}"#,
    )
    .unwrap();

    // a record with no metric values is skipped, not an error
    std::fs::write(
        fundamental_dir.join("000001_平安银行_fundamental.json"),
        r#"{"stock_code": "000001", "stock_name": "平安银行", "date": "2024-01-05"}"#,
    )
    .unwrap();

    let investor_dir = data_dir
        .path()
        .join("stock_analysis/2024-01-05/Technology/investor");
    std::fs::create_dir_all(&investor_dir).unwrap();
    std::fs::write(
        investor_dir.join("600519_贵州茅台_investor.json"),
        r#"{"stock_code": "600519", "date": "2024-01-05", "insider_holding": 60.5}"#,
    )
    .unwrap();

    let options = MetricsImportOptions {
        data_dir: data_dir.path().to_path_buf(),
        date: None,
        full_history: false,
        max_workers: 2,
    };
    let summary = importer::import_metrics(&fixture.db, &options).await.unwrap();

    assert_eq!(summary.total_files, 3);
    assert_eq!(summary.succeeded, 3);
    assert_eq!(summary.records, 2); // the empty record was skipped

    let row = sqlx::query("SELECT pe_ratio FROM fundamental_metrics WHERE stock_code = '600519'")
        .fetch_one(fixture.db.pool())
        .await
        .unwrap();
    assert_eq!(row.get::<Option<f64>, _>("pe_ratio"), Some(28.5));

    let date = fixture.db.latest_metric_date().await.unwrap();
    assert_eq!(date, Some(common::day(2024, 1, 5)));
}
