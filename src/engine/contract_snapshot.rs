//! Contract Snapshot Engine. See `spec.md` §4.5.

use crate::dates::normalize_to_midnight;
use crate::error::Result;
use crate::models::{ContractType, ExerciseStyle, OptionContract, OptionContractIndex};
use crate::store::Gateway;
use crate::vendor::options_rest::{OptionsRestClient, VendorOptionContract};
use crate::write;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use tracing::{error, warn};

fn convert_contract(v: &VendorOptionContract) -> Option<OptionContract> {
    let expiration_date = NaiveDate::parse_from_str(&v.expiration_date, "%Y-%m-%d").ok()?;
    Some(OptionContract {
        ticker: v.ticker.clone(),
        underlying_ticker: v.underlying_ticker.clone(),
        contract_type: ContractType::parse(&v.contract_type)?,
        exercise_style: ExerciseStyle::parse(&v.exercise_style)?,
        expiration_date,
        shares_per_contract: v.shares_per_contract,
        strike_price: rust_decimal::Decimal::try_from(v.strike_price).ok()?,
    })
}

/// Fetches the vendor's contract list for `underlying` as of `as_of`,
/// upserts every contract, and appends the (underlying, as_of) snapshot
/// marker.
pub async fn ingest_contracts_as_of(
    gw: &Gateway,
    vendor: &OptionsRestClient,
    underlying: &str,
    as_of: DateTime<Utc>,
    contracts_table: &str,
    index_table: &str,
) -> Result<usize> {
    let vendor_contracts = vendor
        .get_option_contracts(underlying, as_of.date_naive())
        .await?;

    let rows: Vec<OptionContract> = vendor_contracts
        .iter()
        .filter_map(|v| {
            let parsed = convert_contract(v);
            if parsed.is_none() {
                warn!(ticker = %v.ticker, "skipping unparseable vendor contract");
            }
            parsed
        })
        .collect();

    write::batch_upsert_option_contracts(gw, &rows, contracts_table).await?;
    write::upsert_option_contract_index(
        gw,
        &OptionContractIndex {
            underlying_ticker: underlying.to_string(),
            as_of: normalize_to_midnight(as_of),
        },
        index_table,
    )
    .await?;

    Ok(rows.len())
}

/// Backwards day walk from `from - 1 day` down to and including `to`. Each
/// day's failure is logged and does not stop the walk.
pub async fn backfill_option_contracts_with_as_of(
    gw: &Gateway,
    vendor: &OptionsRestClient,
    underlying: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    contracts_table: &str,
    index_table: &str,
) {
    let mut cursor = normalize_to_midnight(from) - Duration::days(1);
    let floor = normalize_to_midnight(to);

    while cursor >= floor {
        if let Err(e) =
            ingest_contracts_as_of(gw, vendor, underlying, cursor, contracts_table, index_table).await
        {
            error!(underlying, as_of = %cursor, error = %e, "contract snapshot day failed");
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        cursor -= Duration::days(1);
    }
}

/// Forward walk from the day after the newest stored `as_of` up to today.
/// If no prior `as_of` exists, ingests only for today.
pub async fn catch_up_contracts(
    gw: &Gateway,
    vendor: &OptionsRestClient,
    underlying: &str,
    newest_as_of: Option<DateTime<Utc>>,
    contracts_table: &str,
    index_table: &str,
) {
    let today = normalize_to_midnight(Utc::now());

    let Some(newest) = newest_as_of else {
        if let Err(e) =
            ingest_contracts_as_of(gw, vendor, underlying, today, contracts_table, index_table).await
        {
            error!(underlying, error = %e, "initial contract snapshot failed");
        }
        return;
    };

    let mut cursor = normalize_to_midnight(newest) + Duration::days(1);
    while cursor <= today {
        if let Err(e) =
            ingest_contracts_as_of(gw, vendor, underlying, cursor, contracts_table, index_table).await
        {
            error!(underlying, as_of = %cursor, error = %e, "contract snapshot catch-up day failed");
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        cursor += Duration::days(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn contracts_body(n: usize) -> serde_json::Value {
        let results: Vec<_> = (0..n)
            .map(|i| {
                serde_json::json!({
                    "ticker": format!("O:TEST240315C0015{i}000"),
                    "underlying_ticker": "TEST",
                    "contract_type": "call",
                    "exercise_style": "american",
                    "expiration_date": "2024-03-15",
                    "shares_per_contract": 100,
                    "strike_price": 150.0 + i as f64,
                })
            })
            .collect();
        serde_json::json!({ "results": results })
    }

    #[tokio::test]
    async fn backwards_walk_visits_each_day_and_records_index() {
        let store = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/exec"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "columns": [], "dataset": []
            })))
            .mount(&store)
            .await;

        let vendor_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v3/reference/options/contracts"))
            .respond_with(ResponseTemplate::new(200).set_body_json(contracts_body(2)))
            .mount(&vendor_server)
            .await;

        let gw = Gateway::new(store.uri());
        gw.connect().await.unwrap();
        let vendor = OptionsRestClient::new(vendor_server.uri(), "key");

        let from = Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap();

        backfill_option_contracts_with_as_of(
            &gw,
            &vendor,
            "TEST",
            from,
            to,
            "option_contracts",
            "option_contracts_index",
        )
        .await;

        let requests = vendor_server.received_requests().await.unwrap();
        // 2024-01-04 and 2024-01-03: one vendor call per day.
        assert_eq!(requests.len(), 2);
        assert!(requests[0].url.query().unwrap().contains("as_of=2024-01-04"));
        assert!(requests[1].url.query().unwrap().contains("as_of=2024-01-03"));
    }

    #[tokio::test]
    async fn catch_up_with_no_prior_as_of_ingests_only_today() {
        let store = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/exec"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "columns": [], "dataset": []
            })))
            .mount(&store)
            .await;
        let vendor_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v3/reference/options/contracts"))
            .respond_with(ResponseTemplate::new(200).set_body_json(contracts_body(1)))
            .mount(&vendor_server)
            .await;

        let gw = Gateway::new(store.uri());
        gw.connect().await.unwrap();
        let vendor = OptionsRestClient::new(vendor_server.uri(), "key");

        catch_up_contracts(&gw, &vendor, "TEST", None, "option_contracts", "option_contracts_index").await;

        assert_eq!(vendor_server.received_requests().await.unwrap().len(), 1);
    }
}
