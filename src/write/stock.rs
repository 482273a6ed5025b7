use super::chunked;
use crate::error::Result;
use crate::models::StockAggregate;
use crate::store::{Gateway, Param};

/// Chunk size for `batchUpsertStockAggregates` / `batchInsertIfAbsent...`.
pub const STOCK_AGGREGATE_CHUNK_SIZE: usize = 50;

fn row_values(row: &StockAggregate) -> String {
    format!(
        "({}, {}, {}, {}, {}, {}, {}, {}, {})",
        Param::Text(row.symbol.clone()).literal(),
        Param::Timestamp(row.timestamp).literal(),
        Param::Decimal(row.open).literal(),
        Param::Decimal(row.high).literal(),
        Param::Decimal(row.low).literal(),
        Param::Decimal(row.close).literal(),
        Param::Decimal(row.vwap).literal(),
        Param::Decimal(row.volume).literal(),
        Param::Int(row.transaction_count).literal(),
    )
}

/// The store's dedup-on-(symbol, timestamp) handles duplication; this
/// issues a plain parameterized INSERT.
pub async fn upsert_stock_aggregate(gw: &Gateway, row: &StockAggregate, table: &str) -> Result<()> {
    let sql = format!(
        "INSERT INTO {table} (symbol, timestamp, open, high, low, close, vwap, volume, transaction_count) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
    );
    gw.exec(
        &sql,
        &[
            Param::Text(row.symbol.clone()),
            Param::Timestamp(row.timestamp),
            Param::Decimal(row.open),
            Param::Decimal(row.high),
            Param::Decimal(row.low),
            Param::Decimal(row.close),
            Param::Decimal(row.vwap),
            Param::Decimal(row.volume),
            Param::Int(row.transaction_count),
        ],
    )
    .await?;
    Ok(())
}

/// Chunk size ≤ 50. Empty input is a no-op (no SQL issued).
pub async fn batch_upsert_stock_aggregates(
    gw: &Gateway,
    rows: &[StockAggregate],
    table: &str,
) -> Result<usize> {
    if rows.is_empty() {
        return Ok(0);
    }
    let mut written = 0;
    for chunk in chunked(rows, STOCK_AGGREGATE_CHUNK_SIZE) {
        let values = chunk.iter().map(row_values).collect::<Vec<_>>().join(", ");
        let sql = format!(
            "INSERT INTO {table} (symbol, timestamp, open, high, low, close, vwap, volume, transaction_count) \
             VALUES {values}"
        );
        gw.bulk_exec(&sql).await?;
        written += chunk.len();
    }
    Ok(written)
}

/// INSERT when `SELECT 1 FROM T WHERE symbol=$1 AND timestamp=$2` returns
/// empty; otherwise no-op.
pub async fn insert_if_absent_stock_aggregate(
    gw: &Gateway,
    row: &StockAggregate,
    table: &str,
) -> Result<bool> {
    let exists = gw
        .exec(
            &format!("SELECT 1 FROM {table} WHERE symbol = $1 AND timestamp = $2"),
            &[Param::Text(row.symbol.clone()), Param::Timestamp(row.timestamp)],
        )
        .await?;
    if !exists.dataset.is_empty() {
        return Ok(false);
    }
    upsert_stock_aggregate(gw, row, table).await?;
    Ok(true)
}

/// Chunk size ≤ 50. Rather than a presence check per row (O(n) round
/// trips), this leans on the same dedup-on-key-tuple guarantee as
/// `batch_upsert_stock_aggregates`: a plain bulk INSERT is equivalent to
/// insert-if-absent because the store silently drops the duplicate half of
/// the key tuple. Returns the number of rows submitted (not necessarily
/// the number that were new).
pub async fn batch_insert_if_absent_stock_aggregates(
    gw: &Gateway,
    rows: &[StockAggregate],
    table: &str,
) -> Result<usize> {
    batch_upsert_stock_aggregates(gw, rows, table).await
}
