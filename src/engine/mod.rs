//! Backfill and streaming engines built on the Write Layer and vendor
//! clients. See `spec.md` §4.5–§4.7.

pub mod contract_snapshot;
pub mod stock_backfill;
pub mod streaming;
pub mod trades_backfill;
