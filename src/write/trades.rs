use super::chunked;
use crate::error::Result;
use crate::models::OptionTrade;
use crate::store::{Gateway, Param};

pub const OPTION_TRADE_CHUNK_SIZE: usize = 100;

fn row_values(row: &OptionTrade) -> String {
    let conditions = serde_json::to_string(&row.conditions).unwrap_or_else(|_| "[]".to_string());
    format!(
        "({}, {}, {}, {}, {}, {}, {}, {}, {})",
        Param::Text(row.ticker.clone()).literal(),
        Param::Text(row.underlying_ticker.clone()).literal(),
        Param::Timestamp(row.timestamp).literal(),
        Param::Decimal(row.price).literal(),
        Param::Decimal(row.size).literal(),
        Param::Text(conditions).literal(),
        Param::Int(row.exchange as i64).literal(),
        Param::Int(row.tape as i64).literal(),
        Param::Int(row.sequence_number).literal(),
    )
}

pub async fn upsert_option_trade(gw: &Gateway, row: &OptionTrade, table: &str) -> Result<()> {
    batch_upsert_option_trades(gw, std::slice::from_ref(row), table).await?;
    Ok(())
}

/// Chunk size ≤ 100. Empty input is a no-op.
pub async fn batch_upsert_option_trades(gw: &Gateway, rows: &[OptionTrade], table: &str) -> Result<usize> {
    if rows.is_empty() {
        return Ok(0);
    }
    let mut written = 0;
    for chunk in chunked(rows, OPTION_TRADE_CHUNK_SIZE) {
        let values = chunk.iter().map(row_values).collect::<Vec<_>>().join(", ");
        let sql = format!(
            "INSERT INTO {table} \
             (ticker, underlying_ticker, timestamp, price, size, conditions, exchange, tape, sequence_number) \
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

    fn trade(seq: i64) -> OptionTrade {
        OptionTrade {
            ticker: "O:TEST240315C00150000".to_string(),
            underlying_ticker: "TEST".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 4, 15, 30, 0).unwrap(),
            price: dec!(5.0),
            size: dec!(20),
            conditions: vec![serde_json::json!(1), serde_json::json!(2)],
            exchange: 1,
            tape: 1,
            sequence_number: seq,
        }
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
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
        let n = batch_upsert_option_trades(&gw, &[], "option_trades").await.unwrap();
        assert_eq!(n, 0);
        // Only the connect() probe should have hit the mock — no write.
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
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

        let rows: Vec<OptionTrade> = (0..250).map(trade).collect();
        let n = batch_upsert_option_trades(&gw, &rows, "option_trades").await.unwrap();
        assert_eq!(n, 250);
        let requests = server.received_requests().await.unwrap();
        // 1 connect probe + ceil(250/100) == 3 bulk writes
        assert_eq!(requests.len(), 4);
    }
}
