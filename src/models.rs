//! Domain entities written into the store. See `spec.md` §3.
//!
//! Vendor DTOs are transient and live next to the client that produces them
//! (`vendor::equity_rest`, `vendor::options_rest`); only the normalized
//! entities below are owned by the pipeline's writer path.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractType {
    Call,
    Put,
}

impl ContractType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractType::Call => "call",
            ContractType::Put => "put",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "call" => Some(ContractType::Call),
            "put" => Some(ContractType::Put),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExerciseStyle {
    American,
    European,
}

impl ExerciseStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExerciseStyle::American => "american",
            ExerciseStyle::European => "european",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "american" => Some(ExerciseStyle::American),
            "european" => Some(ExerciseStyle::European),
            _ => None,
        }
    }
}

/// One OHLCV minute (or daily) bar. Inserted if absent, never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockAggregate {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub vwap: Decimal,
    pub volume: Decimal,
    pub transaction_count: i64,
}

/// An option contract definition. Upserted keyed by `ticker`; no `as_of`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionContract {
    pub ticker: String,
    pub underlying_ticker: String,
    pub contract_type: ContractType,
    pub exercise_style: ExerciseStyle,
    pub expiration_date: chrono::NaiveDate,
    pub shares_per_contract: i32,
    pub strike_price: Decimal,
}

pub const DEFAULT_SHARES_PER_CONTRACT: i32 = 100;

/// One row per (underlying, as_of) snapshot run. Append-only, idempotent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionContractIndex {
    pub underlying_ticker: String,
    pub as_of: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionTrade {
    pub ticker: String,
    pub underlying_ticker: String,
    pub timestamp: DateTime<Utc>,
    pub price: Decimal,
    pub size: Decimal,
    /// Serialized as a JSON array of ints/strings.
    pub conditions: Vec<serde_json::Value>,
    pub exchange: i32,
    pub tape: i32,
    pub sequence_number: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionQuote {
    pub ticker: String,
    pub underlying_ticker: String,
    pub timestamp: DateTime<Utc>,
    pub bid_price: Decimal,
    pub bid_size: Decimal,
    pub ask_price: Decimal,
    pub ask_size: Decimal,
    pub bid_exchange: i32,
    pub ask_exchange: i32,
    pub sequence_number: i64,
}

/// High-water mark per option ticker, used to resume trade backfill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionTradeIndex {
    pub ticker: String,
    pub last_sync: DateTime<Utc>,
}

/// Tracks equity-bar streaming/catch-up state per ticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    pub ticker: String,
    pub last_aggregate_timestamp: Option<DateTime<Utc>>,
    pub last_sync: DateTime<Utc>,
    pub is_streaming: bool,
}

/// One row parsed from the bulk daily gzip CSV (`spec.md` §6 "Bulk file
/// format"): `ticker,conditions,correction,exchange,price,sip_timestamp,size`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkTradeRecord {
    pub ticker: String,
    pub conditions: String,
    pub correction: i32,
    pub exchange: i32,
    pub price: Decimal,
    pub sip_timestamp: i64,
    pub size: Decimal,
}
