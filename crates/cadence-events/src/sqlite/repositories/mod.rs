//! Repository implementations for `SQLite` database operations.
//!
//! Each repository is a stateless struct whose methods take a `&Connection`,
//! so the same methods run on a plain connection or inside a transaction.
//! Column conversion helpers shared by all repositories live here.

pub mod compaction;
pub mod event;
pub mod invocation;
pub mod session;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use serde::de::DeserializeOwned;

/// Timestamps are stored as fixed-width UTC RFC 3339 so that text
/// comparison orders them chronologically.
pub fn ts_to_sql(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp column.
pub fn ts_from_sql(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Parse a stored JSON column.
pub fn json_from_sql<T: DeserializeOwned>(idx: usize, raw: &str) -> rusqlite::Result<T> {
    serde_json::from_str(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Parse a stored enum column through its `parse` function.
pub fn enum_from_sql<T>(idx: usize, raw: &str, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    parse(raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unknown value {raw:?}").into(),
        )
    })
}

/// Sequences are `u64` in the model and `INTEGER` (i64) in `SQLite`.
pub fn seq_to_sql(sequence: u64) -> i64 {
    i64::try_from(sequence).unwrap_or(i64::MAX)
}

/// Inverse of [`seq_to_sql`]; negative values never occur.
pub fn seq_from_sql(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_sort_as_text() {
        let early = DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z")
            .unwrap()
            .with_timezone(&Utc);
        let late = early + chrono::Duration::milliseconds(1500);
        assert!(ts_to_sql(&early) < ts_to_sql(&late));
        assert_eq!(ts_from_sql(0, &ts_to_sql(&late)).unwrap(), late);
    }

    #[test]
    fn bad_timestamp_is_conversion_failure() {
        assert!(matches!(
            ts_from_sql(3, "yesterday"),
            Err(rusqlite::Error::FromSqlConversionFailure(3, Type::Text, _))
        ));
    }

    #[test]
    fn sequence_conversion() {
        assert_eq!(seq_to_sql(42), 42);
        assert_eq!(seq_from_sql(42), 42);
        assert_eq!(seq_from_sql(-1), 0);
    }
}
