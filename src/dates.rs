//! Date-Range Reconciliation Library. See `spec.md` §4.4 and the Open
//! Question in §9: normalization is UTC midnight uniformly.

use crate::error::{IngestError, Result};
use crate::store::Gateway;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};

/// Zeroes H/M/S/ms in UTC. Calendar date is preserved.
pub fn normalize_to_midnight(d: DateTime<Utc>) -> DateTime<Utc> {
    midnight_of(d.naive_utc().date())
}

pub fn midnight_of(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).expect("midnight is always a valid time"))
}

/// In "test" mode (`NODE_ENV=test`) returns `test_<base>`, idempotent when
/// already prefixed; otherwise returns `base` unchanged.
pub fn table_name(base: &str, test_mode: bool) -> String {
    if !test_mode {
        return base.to_string();
    }
    if base.starts_with("test_") {
        base.to_string()
    } else {
        format!("test_{base}")
    }
}

pub struct DateColumnSpec<'a> {
    pub ticker: &'a str,
    pub ticker_field: &'a str,
    pub date_field: &'a str,
    pub table: &'a str,
}

/// Returns the parsed instant, or **today's instant** if no row / NULL.
/// Callers that need true absence must use [`has_data`].
pub async fn get_min_date(gw: &Gateway, spec: DateColumnSpec<'_>) -> Result<DateTime<Utc>> {
    min_or_max_date(gw, spec, "MIN")
        .await
        .map(|opt| opt.unwrap_or_else(Utc::now))
}

/// `None` signals "no data stored".
pub async fn get_max_date(gw: &Gateway, spec: DateColumnSpec<'_>) -> Result<Option<DateTime<Utc>>> {
    min_or_max_date(gw, spec, "MAX").await
}

async fn min_or_max_date(
    gw: &Gateway,
    spec: DateColumnSpec<'_>,
    agg: &str,
) -> Result<Option<DateTime<Utc>>> {
    let sql = format!(
        "SELECT {agg}({date_field}) FROM {table} WHERE {ticker_field} = $1",
        agg = agg,
        date_field = spec.date_field,
        table = spec.table,
        ticker_field = spec.ticker_field,
    );
    let result = gw
        .exec(&sql, &[crate::store::Param::Text(spec.ticker.to_uppercase())])
        .await?;
    Ok(result
        .dataset
        .first()
        .and_then(|row| row.first())
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc)))
}

pub async fn has_data(gw: &Gateway, ticker: &str, ticker_field: &str, table: &str) -> Result<bool> {
    let sql = format!(
        "SELECT 1 FROM {table} WHERE {ticker_field} = $1 LIMIT 1",
        table = table,
        ticker_field = ticker_field,
    );
    let result = gw
        .exec(&sql, &[crate::store::Param::Text(ticker.to_uppercase())])
        .await?;
    Ok(!result.dataset.is_empty())
}

/// Inclusive day iterator, yielding UTC midnight of each calendar day from
/// `start` to `end`. Empty if `start > end`.
pub fn day_range(start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<DateTime<Utc>> {
    let start = normalize_to_midnight(start);
    let end = normalize_to_midnight(end);
    let mut days = Vec::new();
    let mut cursor = start;
    while cursor <= end {
        days.push(cursor);
        cursor += Duration::days(1);
    }
    days
}

pub fn validate_range(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<()> {
    if start > end {
        return Err(IngestError::Validation(format!(
            "startDate {start} is after endDate {end}"
        )));
    }
    Ok(())
}
