//! Streaming Trade Engine. See `spec.md` §4.7 ("Streaming Trade Engine
//! processing") and the Design Notes §9 "Buffer sharing between producer
//! and flusher" redesign flag: a bounded channel feeds a single flusher
//! task instead of a shared mutable buffer.

use crate::models::OptionTrade;
use crate::store::Gateway;
use crate::vendor::options_ws::{OptionsWebSocketClient, TradeEvent, WsCommand};
use crate::write;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, Instant};
use tracing::{info, warn};

const FLUSH_SIZE: usize = 100;
const FLUSH_INTERVAL: Duration = Duration::from_secs(5);
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);
const SILENCE_LIMIT: Duration = Duration::from_secs(90);
const TRADE_CHANNEL_CAPACITY: usize = 1024;

fn extract_underlying(ticker: &str) -> Option<String> {
    crate::engine::trades_backfill::extract_underlying_ticker(ticker)
}

/// One accepted trade, filtered and ready to batch-write.
fn to_option_trade(event: &TradeEvent, underlying: &str) -> OptionTrade {
    OptionTrade {
        ticker: event.ticker.clone(),
        underlying_ticker: underlying.to_string(),
        timestamp: crate::vendor::options_rest::convert_timestamp(event.timestamp, true),
        price: Decimal::try_from(event.price).unwrap_or_default(),
        size: Decimal::try_from(event.size).unwrap_or_default(),
        conditions: event.conditions.iter().map(|c| serde_json::json!(c)).collect(),
        exchange: event.exchange.unwrap_or(0),
        tape: 0,
        sequence_number: event.sequence_number.unwrap_or(0),
    }
}

/// Drives the websocket supervisor, a bounded-buffer flusher (100 entries
/// or 5s, whichever comes first), and a 30s health watchdog that forces
/// reconnect after 90s of silence. Runs until `shutdown` resolves.
pub async fn run_streaming_engine(
    gw: &Gateway,
    ws_client: OptionsWebSocketClient,
    tickers: HashSet<String>,
    threshold: Decimal,
    trades_table: &str,
    mut shutdown: mpsc::Receiver<()>,
) {
    let (trade_tx, mut trade_rx) = mpsc::channel::<TradeEvent>(TRADE_CHANNEL_CAPACITY);
    let (last_message_tx, mut last_message_rx) = mpsc::unbounded_channel::<Instant>();
    let (cmd_tx, cmd_rx) = mpsc::channel::<WsCommand>(4);

    let ws_task = tokio::spawn(async move {
        if let Err(e) = ws_client.run(trade_tx, last_message_tx, cmd_rx).await {
            warn!(error = %e, "options websocket supervisor exited with an error");
        }
    });

    let mut buffer: Vec<OptionTrade> = Vec::with_capacity(FLUSH_SIZE);
    let mut flush_timer = interval(FLUSH_INTERVAL);
    let mut health_timer = interval(HEALTH_CHECK_INTERVAL);
    let mut last_message_at = Instant::now();

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                info!("streaming engine shutdown requested, flushing buffer");
                flush(gw, &mut buffer, trades_table).await;
                let _ = cmd_tx.send(WsCommand::Shutdown).await;
                break;
            }
            Some(event) = trade_rx.recv() => {
                if let Some(row) = filter_and_convert(&event, &tickers, threshold) {
                    buffer.push(row);
                    if buffer.len() >= FLUSH_SIZE {
                        flush(gw, &mut buffer, trades_table).await;
                    }
                }
            }
            Some(instant) = last_message_rx.recv() => {
                last_message_at = instant;
            }
            _ = flush_timer.tick() => {
                flush(gw, &mut buffer, trades_table).await;
            }
            _ = health_timer.tick() => {
                if last_message_at.elapsed() > SILENCE_LIMIT {
                    warn!("no websocket message in over 90s, forcing reconnect");
                    let _ = cmd_tx.send(WsCommand::ForceReconnect).await;
                    last_message_at = Instant::now();
                }
            }
        }
    }

    ws_task.abort();
}

fn filter_and_convert(event: &TradeEvent, tickers: &HashSet<String>, threshold: Decimal) -> Option<OptionTrade> {
    let notional = Decimal::try_from(event.price).unwrap_or_default()
        * Decimal::from(100)
        * Decimal::try_from(event.size).unwrap_or_default();
    if notional < threshold {
        return None;
    }

    let underlying = extract_underlying(&event.ticker)?;
    if !tickers.is_empty() && !tickers.contains(&underlying) {
        return None;
    }

    Some(to_option_trade(event, &underlying))
}

async fn flush(gw: &Gateway, buffer: &mut Vec<OptionTrade>, table: &str) {
    if buffer.is_empty() {
        return;
    }
    let rows = std::mem::take(buffer);
    if let Err(e) = write::batch_upsert_option_trades(gw, &rows, table).await {
        warn!(error = %e, count = rows.len(), "streaming trade flush failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(ticker: &str, price: f64, size: f64) -> TradeEvent {
        TradeEvent {
            ticker: ticker.to_string(),
            price,
            size,
            conditions: vec![],
            exchange: Some(1),
            timestamp: 1_700_000_000_000_000_000,
            sequence_number: Some(1),
        }
    }

    #[test]
    fn trade_surviving_threshold_is_kept() {
        let tickers: HashSet<String> = HashSet::new();
        let row = filter_and_convert(&event("O:TEST240315C00150000", 5.00, 20.0), &tickers, Decimal::from(10_000));
        assert!(row.is_some());
    }

    #[test]
    fn trade_below_threshold_is_dropped() {
        let tickers: HashSet<String> = HashSet::new();
        let row = filter_and_convert(&event("O:TEST240315C00150000", 4.99, 20.0), &tickers, Decimal::from(10_000));
        assert!(row.is_none());
    }

    #[test]
    fn trade_outside_configured_tickers_is_dropped() {
        let mut tickers = HashSet::new();
        tickers.insert("AAPL".to_string());
        let row = filter_and_convert(&event("O:TEST240315C00150000", 50.0, 20.0), &tickers, Decimal::from(10_000));
        assert!(row.is_none());
    }
}
