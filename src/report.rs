//! Structured run summaries returned by the Coordinator. See `SPEC_FULL.md`
//! §3 ("IngestRunReport") and §9's "surface a structured error report"
//! redesign flag.

use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct TickerReport {
    pub ticker: String,
    pub stock_rows_written: usize,
    pub option_contracts_written: usize,
    pub option_trades_written: usize,
    pub option_quotes_written: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct IngestRunReport {
    pub tickers: Vec<TickerReport>,
    pub duration: Duration,
}

impl IngestRunReport {
    pub fn total_rows_written(&self) -> usize {
        self.tickers
            .iter()
            .map(|t| t.stock_rows_written + t.option_contracts_written + t.option_trades_written + t.option_quotes_written)
            .sum()
    }

    pub fn failed_tickers(&self) -> Vec<&TickerReport> {
        self.tickers.iter().filter(|t| t.error.is_some()).collect()
    }

    /// Renders a duration as `Xh Ym Zs` per `spec.md` §6.
    pub fn duration_string(&self) -> String {
        format_duration(self.duration)
    }
}

pub fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    format!("{hours}h {minutes}m {seconds}s")
}
