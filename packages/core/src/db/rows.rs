//! Column encoding helpers shared by the stores.
//!
//! Timestamps are RFC 3339 text with microsecond precision, booleans are
//! integers, sibling lists are JSON arrays.

use crate::db::error::DatabaseError;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Row, Value};

pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::corrupt_record(format!("bad timestamp '{}': {}", raw, e)))
}

pub(crate) fn text(value: impl Into<String>) -> Value {
    Value::Text(value.into())
}

pub(crate) fn opt_text(value: Option<impl Into<String>>) -> Value {
    value.map_or(Value::Null, |v| Value::Text(v.into()))
}

pub(crate) fn int(value: i64) -> Value {
    Value::Integer(value)
}

pub(crate) fn opt_int(value: Option<i64>) -> Value {
    value.map_or(Value::Null, Value::Integer)
}

pub(crate) fn flag(value: bool) -> Value {
    Value::Integer(i64::from(value))
}

pub(crate) fn opt_flag(value: Option<bool>) -> Value {
    value.map_or(Value::Null, flag)
}

pub(crate) fn timestamp(ts: &DateTime<Utc>) -> Value {
    Value::Text(format_timestamp(ts))
}

pub(crate) fn opt_timestamp(ts: Option<&DateTime<Utc>>) -> Value {
    ts.map_or(Value::Null, timestamp)
}

pub(crate) fn get_text(row: &Row, idx: i32, column: &str) -> Result<String, DatabaseError> {
    row.get::<String>(idx)
        .map_err(|e| DatabaseError::corrupt_record(format!("column {}: {}", column, e)))
}

pub(crate) fn get_opt_text(
    row: &Row,
    idx: i32,
    column: &str,
) -> Result<Option<String>, DatabaseError> {
    row.get::<Option<String>>(idx)
        .map_err(|e| DatabaseError::corrupt_record(format!("column {}: {}", column, e)))
}

pub(crate) fn get_int(row: &Row, idx: i32, column: &str) -> Result<i64, DatabaseError> {
    row.get::<i64>(idx)
        .map_err(|e| DatabaseError::corrupt_record(format!("column {}: {}", column, e)))
}

pub(crate) fn get_opt_int(row: &Row, idx: i32, column: &str) -> Result<Option<i64>, DatabaseError> {
    row.get::<Option<i64>>(idx)
        .map_err(|e| DatabaseError::corrupt_record(format!("column {}: {}", column, e)))
}

pub(crate) fn get_flag(row: &Row, idx: i32, column: &str) -> Result<bool, DatabaseError> {
    Ok(get_int(row, idx, column)? != 0)
}

pub(crate) fn get_opt_flag(row: &Row, idx: i32, column: &str) -> Result<Option<bool>, DatabaseError> {
    Ok(get_opt_int(row, idx, column)?.map(|v| v != 0))
}

pub(crate) fn get_timestamp(row: &Row, idx: i32, column: &str) -> Result<DateTime<Utc>, DatabaseError> {
    parse_timestamp(&get_text(row, idx, column)?)
}

pub(crate) fn get_opt_timestamp(
    row: &Row,
    idx: i32,
    column: &str,
) -> Result<Option<DateTime<Utc>>, DatabaseError> {
    get_opt_text(row, idx, column)?
        .map(|raw| parse_timestamp(&raw))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::db_now;

    #[test]
    fn test_timestamp_preserves_microseconds() {
        let now = db_now();
        let parsed = parse_timestamp(&format_timestamp(&now)).unwrap();
        assert_eq!(parsed, now);
    }

    #[test]
    fn test_parse_timestamp_rejects_garbage() {
        assert!(matches!(
            parse_timestamp("yesterday"),
            Err(DatabaseError::CorruptRecord { .. })
        ));
    }
}
