//! Bulk daily trade file ingestion path. See `SPEC_FULL.md` §4.9.

mod loader;

pub use loader::{ingest_bulk_trades_file, BulkFileClient};
