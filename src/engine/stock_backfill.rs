//! Stock-Bars Backfill & real-time poller. See `spec.md` §4.7.

use crate::dates::{self, day_range};
use crate::models::{StockAggregate, SyncState};
use crate::store::Gateway;
use crate::vendor::equity_rest::{EquityBarsClient, VendorBar};
use crate::write;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use tracing::{error, warn};

fn to_stock_aggregate(symbol: &str, bar: &VendorBar) -> Option<StockAggregate> {
    Some(StockAggregate {
        symbol: symbol.to_string(),
        timestamp: Utc.timestamp_millis_opt(bar.t).single()?,
        open: Decimal::try_from(bar.o).ok()?,
        high: Decimal::try_from(bar.h).ok()?,
        low: Decimal::try_from(bar.l).ok()?,
        close: Decimal::try_from(bar.c).ok()?,
        vwap: bar.vw.and_then(|v| Decimal::try_from(v).ok()).unwrap_or_default(),
        volume: Decimal::try_from(bar.v).ok()?,
        transaction_count: bar.n.unwrap_or(0),
    })
}

/// Forward day scan from `start_date` to `end_date` inclusive. Per-day
/// errors are logged and the day is skipped; a reversed range warns and
/// does no work. Returns the count of rows inserted.
pub async fn process_stock_aggregate_backfill(
    gw: &Gateway,
    vendor: &EquityBarsClient,
    ticker: &str,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
    table: &str,
) -> usize {
    if end_date > Utc::now() {
        warn!(ticker, end_date = %end_date, "stock backfill end date is in the future");
    }
    if let Err(e) = dates::validate_range(start_date, end_date) {
        warn!(ticker, %start_date, %end_date, error = %e, "stock backfill start date is after end date, skipping");
        return 0;
    }

    let mut total = 0;
    for day_start in day_range(start_date, end_date) {
        let day_end = day_start + Duration::days(1);

        let bars = match vendor.get_historical_bars(ticker, day_start, day_end, "1Min").await {
            Ok(bars) => bars,
            Err(e) => {
                error!(ticker, day = %day_start, error = %e, "stock bars day fetch failed");
                continue;
            }
        };

        let rows: Vec<StockAggregate> = bars.iter().filter_map(|b| to_stock_aggregate(ticker, b)).collect();

        match write::batch_insert_if_absent_stock_aggregates(gw, &rows, table).await {
            Ok(n) => total += n,
            Err(e) => error!(ticker, day = %day_start, error = %e, "stock bars day write failed"),
        }

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    total
}

/// One real-time poll: fetch the latest bar, upsert it, and record the
/// catch-up state for the ticker. Intended to be driven by a 10s interval
/// timer owned by the caller (`engine::streaming` or the `ingest` CLI
/// command).
pub async fn poll_latest_bar(gw: &Gateway, vendor: &EquityBarsClient, ticker: &str, table: &str, sync_state_table: &str) {
    match vendor.get_latest_bar(ticker).await {
        Ok(Some(bar)) => {
            if let Some(row) = to_stock_aggregate(ticker, &bar) {
                let aggregate_timestamp = row.timestamp;
                if let Err(e) = write::upsert_stock_aggregate(gw, &row, table).await {
                    error!(ticker, error = %e, "latest bar upsert failed");
                    return;
                }
                let sync_state = SyncState {
                    ticker: ticker.to_string(),
                    last_aggregate_timestamp: Some(aggregate_timestamp),
                    last_sync: Utc::now(),
                    is_streaming: true,
                };
                if let Err(e) = write::upsert_sync_state(gw, &sync_state, sync_state_table).await {
                    error!(ticker, error = %e, "sync state upsert failed");
                }
            }
        }
        Ok(None) => {}
        Err(e) => error!(ticker, error = %e, "latest bar fetch failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn reversed_range_warns_and_writes_nothing() {
        let store = MockServer::start().await;
        let gw = Gateway::new(store.uri());
        let vendor = EquityBarsClient::new("http://127.0.0.1:1", "key");

        let start = Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap();

        let n = process_stock_aggregate_backfill(&gw, &vendor, "AAPL", start, end, "stock_aggregates").await;
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn per_day_vendor_failure_is_skipped_not_fatal() {
        let store = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/exec"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "columns": [], "dataset": []
            })))
            .mount(&store)
            .await;
        let gw = Gateway::new(store.uri());
        gw.connect().await.unwrap();

        // No mock registered on this server for the vendor path -> every
        // request errors; the loop must still finish without panicking.
        let vendor_server = MockServer::start().await;
        let vendor = EquityBarsClient::new(vendor_server.uri(), "key");

        let start = Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 4, 0, 0, 0).unwrap();
        let n = process_stock_aggregate_backfill(&gw, &vendor, "AAPL", start, end, "stock_aggregates").await;
        assert_eq!(n, 0);
    }
}
