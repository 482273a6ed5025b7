//! Environment configuration, loaded once at process start.
//!
//! Mirrors the teacher's `Config::from_env` idiom: `dotenv().ok()` then a
//! typed field per variable with `std::env::var(...).unwrap_or_else(...)`.

use std::env;

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON" | "yes"))
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct Config {
    pub polygon_api_key: String,
    pub polygon_base_url: String,
    pub polygon_ws_url: String,

    pub polygon_access_key: Option<String>,
    pub polygon_secret_key: Option<String>,

    pub option_trade_value_threshold: rust_decimal::Decimal,
    pub skip_option_contracts: bool,
    pub skip_option_trades: bool,
    pub skip_option_quotes: bool,

    pub option_quotes_chunk_size: usize,
    pub option_concurrency_limit: usize,

    pub skip_stock_aggregates: bool,

    /// 0 = no cap.
    pub backfill_max_days: u32,

    pub tickers: Vec<String>,

    pub questdb_host: String,
    pub questdb_port: u16,

    pub test_mode: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let tickers = env::var("TICKERS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();

        let threshold = env::var("POLYGON_OPTION_TRADE_VALUE_THRESHOLD")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(10_000);

        Ok(Self {
            polygon_api_key: env::var("POLYGON_API_KEY").unwrap_or_default(),
            polygon_base_url: env::var("POLYGON_BASE_URL")
                .unwrap_or_else(|_| "https://api.polygon.io".to_string()),
            polygon_ws_url: env::var("POLYGON_WS_URL")
                .unwrap_or_else(|_| "wss://socket.polygon.io/options".to_string()),

            polygon_access_key: env::var("POLYGON_ACCESS_KEY").ok(),
            polygon_secret_key: env::var("POLYGON_SECRET_KEY").ok(),

            option_trade_value_threshold: rust_decimal::Decimal::from(threshold),
            skip_option_contracts: env_bool("POLYGON_SKIP_OPTION_CONTRACTS", false),
            skip_option_trades: env_bool("POLYGON_SKIP_OPTION_TRADES", false),
            skip_option_quotes: env_bool("POLYGON_SKIP_OPTION_QUOTES", false),

            option_quotes_chunk_size: env_u32("OPTION_QUOTES_CHUNK_SIZE", 1000) as usize,
            option_concurrency_limit: env_u32("OPTION_CONCURRENCY_LIMIT", 5) as usize,

            skip_stock_aggregates: env_bool("ALPACA_SKIP_STOCK_AGGREGATES", false),

            backfill_max_days: env_u32("BACKFILL_MAX_DAYS", 0),

            tickers,

            questdb_host: env::var("QUESTDB_HOST").unwrap_or_else(|_| "localhost".to_string()),
            questdb_port: env::var("QUESTDB_PORT")
                .ok()
                .and_then(|v| v.parse::<u16>().ok())
                .unwrap_or(9000),

            test_mode: env::var("NODE_ENV").map(|v| v == "test").unwrap_or(false),
        })
    }

    pub fn store_base_url(&self) -> String {
        format!("http://{}:{}", self.questdb_host, self.questdb_port)
    }
}
