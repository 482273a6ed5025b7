//! "Coordinator skip" scenario from `spec.md` §8 (scenario 5): when the
//! stored option-contracts-index min `as_of` already precedes the
//! requested end date, the option path must not issue any vendor calls.

use chrono::{TimeZone, Utc};
use ingest_core::{Config, Coordinator};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(store_uri: &str, vendor_uri: &str) -> Config {
    let authority = store_uri.trim_start_matches("http://");
    let (host, port) = authority.split_once(':').unwrap();
    Config {
        polygon_api_key: "key".into(),
        polygon_base_url: vendor_uri.to_string(),
        polygon_ws_url: "wss://example.invalid".into(),
        polygon_access_key: None,
        polygon_secret_key: None,
        option_trade_value_threshold: rust_decimal::Decimal::from(10_000),
        skip_option_contracts: false,
        skip_option_trades: true,
        skip_option_quotes: true,
        option_quotes_chunk_size: 1000,
        option_concurrency_limit: 5,
        skip_stock_aggregates: true,
        backfill_max_days: 0,
        tickers: vec!["AAPL".to_string()],
        questdb_host: host.to_string(),
        questdb_port: port.parse().unwrap(),
        test_mode: true,
    }
}

#[tokio::test]
async fn option_path_skips_vendor_calls_when_index_already_covers_the_target_date() {
    let store = MockServer::start().await;

    // Every store query returns one row: has_data -> true, get_min_date ->
    // 2024-01-01. That min precedes the backfill target (2024-01-05), so
    // the coordinator's option path must skip without calling the vendor.
    Mock::given(method("GET"))
        .and(path("/exec"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "columns": [],
            "dataset": [["2024-01-01T00:00:00.000000Z"]],
        })))
        .mount(&store)
        .await;

    let vendor = MockServer::start().await;
    // No mocks registered for the vendor server: any request fails the
    // test's assumptions by surfacing as a coordinator-reported error,
    // which the assertion below checks for absence of.

    let cfg = config_for(&store.uri(), &vendor.uri());
    let coordinator = Coordinator::new(cfg);

    let end_date = Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap();
    let report = coordinator.backfill_ticker_to_date("AAPL", end_date).await;

    assert!(report.error.is_none(), "expected the skip path to avoid any vendor error: {:?}", report.error);
    assert_eq!(vendor.received_requests().await.unwrap().len(), 0);
}
