//! Typed error surface for the ingestion library.
//!
//! The CLI binary wraps these in `anyhow::Result` at the process boundary;
//! everything below that boundary returns `IngestError` so call sites can
//! match on failure kind (e.g. to decide whether a loop should swallow the
//! error and continue, per the per-day/per-ticker isolation policy).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("store gateway accessed before connect()")]
    NotConnected,

    #[error("store connection failed: {0}")]
    Connection(String),

    #[error("store query failed: {0}")]
    Query(String),

    #[error("vendor request failed: {0}")]
    Vendor(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, IngestError>;
