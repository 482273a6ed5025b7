use crate::error::Result;
use crate::models::{OptionTradeIndex, SyncState};
use crate::store::{Gateway, Param};

/// Same protocol as the contract index, but keyed by ticker only: UPDATE
/// `last_sync` on collision.
pub async fn upsert_option_trade_index(gw: &Gateway, row: &OptionTradeIndex, table: &str) -> Result<()> {
    let existing = gw
        .exec(
            &format!("SELECT ticker FROM {table} WHERE ticker = $1"),
            &[Param::Text(row.ticker.clone())],
        )
        .await?;

    if existing.dataset.is_empty() {
        gw.exec(
            &format!("INSERT INTO {table} (ticker, last_sync) VALUES ($1, $2)"),
            &[Param::Text(row.ticker.clone()), Param::Timestamp(row.last_sync)],
        )
        .await?;
    } else {
        gw.exec(
            &format!("UPDATE {table} SET last_sync = $2 WHERE ticker = $1"),
            &[Param::Text(row.ticker.clone()), Param::Timestamp(row.last_sync)],
        )
        .await?;
    }
    Ok(())
}

/// Keyed by ticker; nullable `last_aggregate_timestamp` serialized as
/// `NULL` when unset.
pub async fn upsert_sync_state(gw: &Gateway, row: &SyncState, table: &str) -> Result<()> {
    let existing = gw
        .exec(
            &format!("SELECT ticker FROM {table} WHERE ticker = $1"),
            &[Param::Text(row.ticker.clone())],
        )
        .await?;

    let last_agg: Param = row.last_aggregate_timestamp.into();

    if existing.dataset.is_empty() {
        gw.exec(
            &format!(
                "INSERT INTO {table} (ticker, last_aggregate_timestamp, last_sync, is_streaming) \
                 VALUES ($1, $2, $3, $4)"
            ),
            &[
                Param::Text(row.ticker.clone()),
                last_agg,
                Param::Timestamp(row.last_sync),
                Param::Bool(row.is_streaming),
            ],
        )
        .await?;
    } else {
        gw.exec(
            &format!(
                "UPDATE {table} SET last_aggregate_timestamp=$2, last_sync=$3, is_streaming=$4 \
                 WHERE ticker=$1"
            ),
            &[
                Param::Text(row.ticker.clone()),
                last_agg,
                Param::Timestamp(row.last_sync),
                Param::Bool(row.is_streaming),
            ],
        )
        .await?;
    }
    Ok(())
}
