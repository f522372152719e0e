use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, UtcDateTime};

/// Wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    (UtcDateTime::now().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Parses an RFC 3339 / ISO-8601 timestamp and truncates to epoch milliseconds.
pub fn rfc3339_to_ms(ts: &str) -> Result<i64, time::error::Parse> {
    let dt = OffsetDateTime::parse(ts, &Rfc3339)?;
    Ok((dt.unix_timestamp_nanos() / 1_000_000) as i64)
}
