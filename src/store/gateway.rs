//! Store Gateway — the single entry point to the store's HTTP SQL endpoint.
//! See `spec.md` §4.1.

use super::placeholder::{substitute, Param};
use crate::error::{IngestError, Result};
use parking_lot::RwLock;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

const EXEC_TIMEOUT: Duration = Duration::from_secs(30);
const BULK_EXEC_TIMEOUT: Duration = Duration::from_secs(60);

/// Tables dropped by `reset()`. Test/dev only.
const RESET_TABLES: &[&str] = &[
    "stock_aggregates",
    "option_contracts",
    "option_contracts_index",
    "option_trades",
    "option_quotes",
    "option_trade_index",
    "sync_state",
];

const SCHEMA_SQL: &str = include_str!("../../schema.sql");

#[derive(Debug, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct QueryResult {
    #[serde(default)]
    pub columns: Vec<Column>,
    #[serde(default)]
    pub dataset: Vec<Vec<serde_json::Value>>,
    #[serde(default)]
    pub error: Option<String>,
}

pub struct Gateway {
    client: Client,
    base_url: String,
    connected: RwLock<bool>,
}

impl Gateway {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .user_agent("equity-options-ingest/0.1")
            .build()
            .expect("failed to build HTTP client");

        Self {
            client,
            base_url: base_url.into(),
            connected: RwLock::new(false),
        }
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.read()
    }

    /// Idempotent: a no-op if already connected. Probes with `SELECT 1`.
    pub async fn connect(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        self.raw_query("SELECT 1", EXEC_TIMEOUT).await.map_err(|e| {
            IngestError::Connection(format!("probe against {} failed: {e}", self.base_url))
        })?;
        *self.connected.write() = true;
        debug!(base_url = %self.base_url, "store gateway connected");
        Ok(())
    }

    /// Never fails.
    pub fn disconnect(&self) {
        *self.connected.write() = false;
    }

    /// Substitutes `$1..$N` with escaped literals, then issues the query.
    /// Requires a prior `connect()`.
    pub async fn exec(&self, sql: &str, params: &[Param]) -> Result<QueryResult> {
        if !self.is_connected() {
            return Err(IngestError::NotConnected);
        }
        let rendered = substitute(sql, params);
        self.raw_query(&rendered, EXEC_TIMEOUT).await
    }

    /// Same contract as `exec` but performs no parameter substitution;
    /// intended for large multi-VALUES inserts, with a larger timeout.
    pub async fn bulk_exec(&self, sql: &str) -> Result<QueryResult> {
        if !self.is_connected() {
            return Err(IngestError::NotConnected);
        }
        self.raw_query(sql, BULK_EXEC_TIMEOUT).await
    }

    async fn raw_query(&self, sql: &str, timeout: Duration) -> Result<QueryResult> {
        let url = format!("{}/exec", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("query", sql)])
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| IngestError::Connection(e.to_string()))?;

        if !response.status().is_success() {
            return Err(IngestError::Connection(format!(
                "store returned status {}",
                response.status()
            )));
        }

        let body: QueryResult = response
            .json()
            .await
            .map_err(|e| IngestError::Query(format!("malformed response body: {e}")))?;

        if let Some(err) = &body.error {
            return Err(IngestError::Query(err.clone()));
        }

        Ok(body)
    }

    /// Reads the embedded schema, splits statements on `;`, trims, and runs
    /// each via `exec` (no parameters).
    pub async fn run_schema(&self) -> Result<()> {
        for stmt in SCHEMA_SQL.split(';') {
            let stmt = stmt.trim();
            if stmt.is_empty() {
                continue;
            }
            self.exec(stmt, &[]).await?;
        }
        Ok(())
    }

    /// Drops the fixed list of production tables then re-runs the schema.
    /// Test/dev only — destructive.
    pub async fn reset(&self) -> Result<()> {
        warn!("store gateway reset: dropping all known tables");
        for table in RESET_TABLES {
            // Errors dropping a table that doesn't exist yet are expected
            // and are not fatal to the reset.
            let _ = self.exec(&format!("DROP TABLE IF EXISTS {table}"), &[]).await;
        }
        self.run_schema().await
    }
}
