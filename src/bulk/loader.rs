//! Bulk File Loader. See `SPEC_FULL.md` §4.9: a secondary ingestion path
//! pulling daily gzip CSV trade dumps from an S3-compatible object store,
//! signed with the vendor's access/secret key pair.

use crate::error::{IngestError, Result};
use crate::models::BulkTradeRecord;
use chrono::{Datelike, NaiveDate};
use flate2::read::GzDecoder;
use hmac::{Hmac, Mac};
use reqwest::Client;
use sha2::Sha256;
use std::io::Read;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

const BULK_TRADES_PREFIX: &str = "us_options_opra/trades_v1";

pub struct BulkFileClient {
    client: Client,
    base_url: String,
    access_key: String,
    secret_key: String,
}

impl BulkFileClient {
    pub fn new(base_url: impl Into<String>, access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .user_agent("equity-options-ingest/0.1")
                .build()
                .expect("failed to build HTTP client"),
            base_url: base_url.into(),
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }

    fn object_key(&self, date: NaiveDate) -> String {
        format!("{}/{}/{:02}/{}.csv.gz", BULK_TRADES_PREFIX, date.format("%Y"), date.month(), date.format("%Y-%m-%d"))
    }

    /// HMAC-SHA256 signature over the object key, hex-encoded, in the shape
    /// of an S3-compatible presigned-style auth header.
    fn sign(&self, object_key: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret_key.as_bytes()).expect("HMAC accepts any key length");
        mac.update(object_key.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Fetches and decompresses the day's gzip CSV into raw rows. A file
    /// containing only the header row (no trades that day) yields an empty
    /// vec rather than an error.
    pub async fn fetch_bulk_trades_file(&self, date: NaiveDate) -> Result<Vec<BulkTradeRecord>> {
        let object_key = self.object_key(date);
        let signature = self.sign(&object_key);
        let url = format!("{}/{}", self.base_url, object_key);

        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("AWS4-HMAC-SHA256 Credential={}, Signature={}", self.access_key, signature))
            .send()
            .await
            .map_err(|e| IngestError::Vendor(format!("bulk file fetch failed: {e}")))?;

        if !response.status().is_success() {
            return Err(IngestError::Vendor(format!(
                "bulk file request for {object_key} returned HTTP {}",
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| IngestError::Vendor(format!("bulk file body read failed: {e}")))?;

        parse_gzip_csv(&bytes)
    }
}

fn parse_gzip_csv(bytes: &[u8]) -> Result<Vec<BulkTradeRecord>> {
    let mut decoder = GzDecoder::new(bytes);
    let mut csv_text = String::new();
    decoder
        .read_to_string(&mut csv_text)
        .map_err(|e| IngestError::Validation(format!("bulk file is not valid gzip: {e}")))?;

    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(csv_text.as_bytes());
    let mut rows = Vec::new();
    for result in reader.deserialize::<BulkTradeRecord>() {
        match result {
            Ok(row) => rows.push(row),
            Err(e) => warn!(error = %e, "skipping unparseable bulk trade row"),
        }
    }
    Ok(rows)
}

/// Parses the day's file, optionally restricts to `underlying_filter`
/// tickers, maps option-ticker rows (`O:`-prefixed) into `OptionTrade`
/// rows, and batch-upserts. Per-row parse errors are already swallowed by
/// `fetch_bulk_trades_file`; this layer isolates the write step.
pub async fn ingest_bulk_trades_file(
    client: &BulkFileClient,
    gw: &crate::store::Gateway,
    date: NaiveDate,
    underlying_filter: Option<&[String]>,
    trades_table: &str,
) -> Result<usize> {
    let records = client.fetch_bulk_trades_file(date).await?;

    let rows: Vec<crate::models::OptionTrade> = records
        .into_iter()
        .filter_map(|r| to_option_trade(&r))
        .filter(|t| match underlying_filter {
            Some(allowed) => allowed.iter().any(|u| u == &t.underlying_ticker),
            None => true,
        })
        .collect();

    crate::write::batch_upsert_option_trades(gw, &rows, trades_table).await
}

fn to_option_trade(record: &BulkTradeRecord) -> Option<crate::models::OptionTrade> {
    let underlying = crate::engine::trades_backfill::extract_underlying_ticker(&record.ticker)?;
    Some(crate::models::OptionTrade {
        ticker: record.ticker.clone(),
        underlying_ticker: underlying,
        timestamp: crate::vendor::options_rest::convert_timestamp(record.sip_timestamp, true),
        price: record.price,
        size: record.size,
        conditions: record
            .conditions
            .split(';')
            .filter(|s| !s.is_empty())
            .map(|s| serde_json::Value::from(s.to_string()))
            .collect(),
        exchange: record.exchange,
        tape: 0,
        sequence_number: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn gzip(data: &str) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data.as_bytes()).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn header_only_file_parses_to_empty_rows() {
        let csv = "ticker,conditions,correction,exchange,price,sip_timestamp,size\n";
        let rows = parse_gzip_csv(&gzip(csv)).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn parses_a_well_formed_row() {
        let csv = "ticker,conditions,correction,exchange,price,sip_timestamp,size\n\
                   O:TEST240315C00150000,12;37,0,4,1.25,1700000000000000000,10\n";
        let rows = parse_gzip_csv(&gzip(csv)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].ticker, "O:TEST240315C00150000");
        assert_eq!(rows[0].exchange, 4);
    }

    #[test]
    fn malformed_row_is_skipped_not_fatal() {
        let csv = "ticker,conditions,correction,exchange,price,sip_timestamp,size\n\
                   O:TEST240315C00150000,12,0,NOT_A_NUMBER,1.25,1700000000000000000,10\n\
                   O:OTHER240315C00150000,12,0,4,1.25,1700000000000000000,10\n";
        let rows = parse_gzip_csv(&gzip(csv)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].ticker, "O:OTHER240315C00150000");
    }

    #[test]
    fn object_key_is_stable_and_signature_changes_with_key() {
        let client_a = BulkFileClient::new("https://example.com", "ak", "secret-a");
        let client_b = BulkFileClient::new("https://example.com", "ak", "secret-b");
        let date = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        let key = client_a.object_key(date);
        assert!(key.ends_with("2024-03-15.csv.gz"));
        assert_ne!(client_a.sign(&key), client_b.sign(&key));
    }
}
