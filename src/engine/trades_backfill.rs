//! Trades/Quotes Backfill Engine. See `spec.md` §4.6.

use crate::dates::normalize_to_midnight;
use crate::error::Result;
use crate::models::{OptionQuote, OptionTrade, OptionTradeIndex, DEFAULT_SHARES_PER_CONTRACT};
use crate::store::{Gateway, Param};
use crate::vendor::options_rest::{convert_timestamp, OptionsRestClient, VendorOptionQuote, VendorOptionTrade};
use crate::write;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, warn};

/// `^O:([A-Z]+)`, falling back to `^([A-Z]+)`. `None` when neither matches.
pub fn extract_underlying_ticker(option_ticker: &str) -> Option<String> {
    let body = option_ticker.strip_prefix("O:").unwrap_or(option_ticker);
    let letters: String = body.chars().take_while(|c| c.is_ascii_uppercase()).collect();
    if letters.is_empty() {
        None
    } else {
        Some(letters)
    }
}

async fn shares_per_contract(gw: &Gateway, ticker: &str, table: &str) -> i32 {
    let result = gw
        .exec(
            &format!("SELECT shares_per_contract FROM {table} WHERE ticker = $1"),
            &[Param::Text(ticker.to_string())],
        )
        .await;
    result
        .ok()
        .and_then(|r| r.dataset.first().and_then(|row| row.first()).and_then(|v| v.as_i64()))
        .map(|v| v as i32)
        .unwrap_or(DEFAULT_SHARES_PER_CONTRACT)
}

fn to_option_trade(ticker: &str, underlying: &str, v: &VendorOptionTrade) -> OptionTrade {
    OptionTrade {
        ticker: ticker.to_string(),
        underlying_ticker: underlying.to_string(),
        timestamp: convert_timestamp(v.sip_timestamp, true),
        price: Decimal::try_from(v.price).unwrap_or_default(),
        size: Decimal::try_from(v.size).unwrap_or_default(),
        conditions: v.conditions.clone(),
        exchange: v.exchange.unwrap_or(0),
        tape: v.tape.unwrap_or(0),
        sequence_number: v.sequence_number.unwrap_or(0),
    }
}

fn to_option_quote(ticker: &str, underlying: &str, v: &VendorOptionQuote) -> OptionQuote {
    OptionQuote {
        ticker: ticker.to_string(),
        underlying_ticker: underlying.to_string(),
        timestamp: convert_timestamp(v.sip_timestamp, true),
        bid_price: Decimal::try_from(v.bid_price).unwrap_or_default(),
        bid_size: Decimal::try_from(v.bid_size).unwrap_or_default(),
        ask_price: Decimal::try_from(v.ask_price).unwrap_or_default(),
        ask_size: Decimal::try_from(v.ask_size).unwrap_or_default(),
        bid_exchange: v.bid_exchange.unwrap_or(0),
        ask_exchange: v.ask_exchange.unwrap_or(0),
        sequence_number: v.sequence_number.unwrap_or(0),
    }
}

struct BackfillContext<'a> {
    gw: &'a Gateway,
    vendor: &'a OptionsRestClient,
    trades_table: &'a str,
    trade_index_table: &'a str,
    contracts_table: &'a str,
    threshold: Decimal,
}

async fn backfill_one_ticker(ctx: &BackfillContext<'_>, ticker: String, from: DateTime<Utc>, to: DateTime<Utc>) -> usize {
    let Some(underlying) = extract_underlying_ticker(&ticker) else {
        warn!(ticker, "could not extract underlying ticker, skipping");
        return 0;
    };

    let last_sync = gw_last_sync(ctx.gw, &ticker, ctx.trade_index_table).await;
    let effective_from = match last_sync {
        Some(ts) => (ts + Duration::nanoseconds(1)).max(from),
        None => from,
    };
    if effective_from >= to {
        return 0;
    }

    let result: Result<usize> = async {
        let shares = shares_per_contract(ctx.gw, &ticker, ctx.contracts_table).await;
        let vendor_trades = ctx.vendor.get_option_trades(&ticker, effective_from, to).await?;

        let rows: Vec<OptionTrade> = vendor_trades
            .iter()
            .filter(|v| {
                let notional = Decimal::try_from(v.price).unwrap_or_default()
                    * Decimal::from(shares)
                    * Decimal::try_from(v.size).unwrap_or_default();
                notional >= ctx.threshold
            })
            .map(|v| to_option_trade(&ticker, &underlying, v))
            .collect();

        let written = write::batch_upsert_option_trades(ctx.gw, &rows, ctx.trades_table).await?;
        write::upsert_option_trade_index(
            ctx.gw,
            &OptionTradeIndex { ticker: ticker.clone(), last_sync: to },
            ctx.trade_index_table,
        )
        .await?;
        Ok(written)
    }
    .await;

    match result {
        Ok(n) => n,
        Err(e) => {
            error!(ticker, error = %e, "option trade backfill failed for ticker");
            0
        }
    }
}

async fn gw_last_sync(gw: &Gateway, ticker: &str, table: &str) -> Option<DateTime<Utc>> {
    let result = gw
        .exec(
            &format!("SELECT last_sync FROM {table} WHERE ticker = $1"),
            &[Param::Text(ticker.to_string())],
        )
        .await
        .ok()?;
    result
        .dataset
        .first()
        .and_then(|row| row.first())
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Resolves active option tickers for `underlying`, then fans out across a
/// bounded worker pool (size `concurrency_limit`). Per-ticker failures are
/// isolated. Returns the total number of trade rows written.
#[allow(clippy::too_many_arguments)]
pub async fn backfill_option_trades(
    gw: &Gateway,
    vendor: &OptionsRestClient,
    underlying: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    concurrency_limit: usize,
    threshold: Decimal,
    contracts_table: &str,
    trades_table: &str,
    trade_index_table: &str,
) -> usize {
    let result = gw
        .exec(
            &format!(
                "SELECT DISTINCT ticker FROM {contracts_table} WHERE underlying_ticker = $1 AND expiration_date >= $2 ORDER BY ticker"
            ),
            &[Param::Text(underlying.to_string()), Param::Timestamp(from)],
        )
        .await;

    let tickers: Vec<String> = match result {
        Ok(r) => r
            .dataset
            .iter()
            .filter_map(|row| row.first().and_then(|v| v.as_str()).map(str::to_string))
            .collect(),
        Err(e) => {
            error!(underlying, error = %e, "failed to resolve active option tickers");
            return 0;
        }
    };

    let ctx = Arc::new(BackfillContext {
        gw,
        vendor,
        trades_table,
        trade_index_table,
        contracts_table,
        threshold,
    });
    let semaphore = Arc::new(Semaphore::new(concurrency_limit.max(1)));

    let mut handles = Vec::with_capacity(tickers.len());
    for ticker in tickers {
        let ctx = ctx.clone();
        let semaphore = semaphore.clone();
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore not closed");
            backfill_one_ticker(&ctx, ticker, from, to).await
        }));
    }

    let mut total = 0;
    for handle in handles {
        total += handle.await.unwrap_or(0);
    }
    total
}

struct QuotesContext<'a> {
    gw: &'a Gateway,
    vendor: &'a OptionsRestClient,
    underlying: &'a str,
    quotes_chunk_size: usize,
    quotes_table: &'a str,
}

async fn backfill_one_ticker_quotes(ctx: &QuotesContext<'_>, ticker: String, from: DateTime<Utc>, to: DateTime<Utc>) -> usize {
    ingest_option_quotes(ctx.gw, ctx.vendor, &ticker, ctx.underlying, from, to, ctx.quotes_chunk_size, ctx.quotes_table).await
}

/// Resolves active option tickers for `underlying`, then fans out across a
/// bounded worker pool (size `concurrency_limit`), ingesting quotes for each
/// via [`ingest_option_quotes`]. Per-ticker failures are isolated. Returns
/// the total number of quote rows written.
#[allow(clippy::too_many_arguments)]
pub async fn backfill_option_quotes(
    gw: &Gateway,
    vendor: &OptionsRestClient,
    underlying: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    concurrency_limit: usize,
    quotes_chunk_size: usize,
    contracts_table: &str,
    quotes_table: &str,
) -> usize {
    let result = gw
        .exec(
            &format!(
                "SELECT DISTINCT ticker FROM {contracts_table} WHERE underlying_ticker = $1 AND expiration_date >= $2 ORDER BY ticker"
            ),
            &[Param::Text(underlying.to_string()), Param::Timestamp(from)],
        )
        .await;

    let tickers: Vec<String> = match result {
        Ok(r) => r
            .dataset
            .iter()
            .filter_map(|row| row.first().and_then(|v| v.as_str()).map(str::to_string))
            .collect(),
        Err(e) => {
            error!(underlying, error = %e, "failed to resolve active option tickers for quotes");
            return 0;
        }
    };

    let ctx = Arc::new(QuotesContext { gw, vendor, underlying, quotes_chunk_size, quotes_table });
    let semaphore = Arc::new(Semaphore::new(concurrency_limit.max(1)));

    let mut handles = Vec::with_capacity(tickers.len());
    for ticker in tickers {
        let ctx = ctx.clone();
        let semaphore = semaphore.clone();
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore not closed");
            backfill_one_ticker_quotes(&ctx, ticker, from, to).await
        }));
    }

    let mut total = 0;
    for handle in handles {
        total += handle.await.unwrap_or(0);
    }
    total
}

/// Splits `[from, to)` into 1-day sub-intervals and chunk-writes quotes per
/// day; a chunk failure is logged and does not abort the remaining chunks
/// or days.
pub async fn ingest_option_quotes(
    gw: &Gateway,
    vendor: &OptionsRestClient,
    ticker: &str,
    underlying: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    quotes_chunk_size: usize,
    quotes_table: &str,
) -> usize {
    let mut total = 0;
    let mut day_start = normalize_to_midnight(from);
    let floor = normalize_to_midnight(to);

    while day_start <= floor {
        let day_end = (day_start + Duration::days(1)).min(to);

        let vendor_quotes = match vendor.get_option_quotes(ticker, day_start, day_end).await {
            Ok(q) => q,
            Err(e) => {
                error!(ticker, day = %day_start, error = %e, "option quote day fetch failed");
                day_start += Duration::days(1);
                continue;
            }
        };

        if !vendor_quotes.is_empty() {
            let rows: Vec<OptionQuote> = vendor_quotes.iter().map(|v| to_option_quote(ticker, underlying, v)).collect();
            for chunk in rows.chunks(quotes_chunk_size.max(1)) {
                match write::batch_upsert_option_quotes(gw, chunk, quotes_table).await {
                    Ok(n) => total += n,
                    Err(e) => error!(ticker, day = %day_start, error = %e, "option quote chunk write failed"),
                }
            }
        }

        day_start += Duration::days(1);
    }
    total
}
