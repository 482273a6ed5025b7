use super::chunked;
use crate::error::Result;
use crate::models::OptionQuote;
use crate::store::{Gateway, Param};

pub const OPTION_QUOTE_CHUNK_SIZE: usize = 100;

fn row_values(row: &OptionQuote) -> String {
    format!(
        "({}, {}, {}, {}, {}, {}, {}, {}, {}, {})",
        Param::Text(row.ticker.clone()).literal(),
        Param::Text(row.underlying_ticker.clone()).literal(),
        Param::Timestamp(row.timestamp).literal(),
        Param::Decimal(row.bid_price).literal(),
        Param::Decimal(row.bid_size).literal(),
        Param::Decimal(row.ask_price).literal(),
        Param::Decimal(row.ask_size).literal(),
        Param::Int(row.bid_exchange as i64).literal(),
        Param::Int(row.ask_exchange as i64).literal(),
        Param::Int(row.sequence_number).literal(),
    )
}

pub async fn upsert_option_quote(gw: &Gateway, row: &OptionQuote, table: &str) -> Result<()> {
    batch_upsert_option_quotes(gw, std::slice::from_ref(row), table).await?;
    Ok(())
}

/// Chunk size ≤ 100. Empty input is a no-op.
pub async fn batch_upsert_option_quotes(gw: &Gateway, rows: &[OptionQuote], table: &str) -> Result<usize> {
    if rows.is_empty() {
        return Ok(0);
    }
    let mut written = 0;
    for chunk in chunked(rows, OPTION_QUOTE_CHUNK_SIZE) {
        let values = chunk.iter().map(row_values).collect::<Vec<_>>().join(", ");
        let sql = format!(
            "INSERT INTO {table} \
             (ticker, underlying_ticker, timestamp, bid_price, bid_size, ask_price, ask_size, bid_exchange, ask_exchange, sequence_number) \
             VALUES {values}"
        );
        gw.bulk_exec(&sql).await?;
        written += chunk.len();
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn quote(seq: i64) -> OptionQuote {
        OptionQuote {
            ticker: "O:TEST240315C00150000".to_string(),
            underlying_ticker: "TEST".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 4, 15, 30, 0).unwrap(),
            bid_price: dec!(4.9),
            bid_size: dec!(10),
            ask_price: dec!(5.1),
            ask_size: dec!(10),
            bid_exchange: 1,
            ask_exchange: 2,
            sequence_number: seq,
        }
    }

    #[tokio::test]
    async fn chunk_bound_is_ceil_m_over_100() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/exec"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "columns": [], "dataset": []
            })))
            .mount(&server)
            .await;
        let gw = Gateway::new(server.uri());
        gw.connect().await.unwrap();

        let rows: Vec<OptionQuote> = (0..1000).map(quote).collect();
        let n = batch_upsert_option_quotes(&gw, &rows, "option_quotes").await.unwrap();
        assert_eq!(n, 1000);
        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 11); // 1 connect + 10 chunks
    }

    #[tokio::test]
    async fn empty_batch_issues_no_sql() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/exec"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "columns": [], "dataset": []
            })))
            .mount(&server)
            .await;
        let gw = Gateway::new(server.uri());
        gw.connect().await.unwrap();
        let n = batch_upsert_option_quotes(&gw, &[], "option_quotes").await.unwrap();
        assert_eq!(n, 0);
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }
}
