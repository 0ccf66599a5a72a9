//! Type Adapter - scalar conversions between the two stores
//!
//! The embedded store encodes timestamps as integer epoch milliseconds (UTC)
//! and booleans as 0/1. The relational store has native `timestamptz` and
//! `boolean` types. Conversion towards the relational store is driven by the
//! target column's reported type; conversion towards the embedded store is
//! driven by the decoded value's type.

use chrono::{DateTime, TimeZone, Utc};

use crate::catalog::CatalogSet;
use crate::value::Value;
use crate::{Error, Result};

/// How a relational column's values must be converted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Timestamp,
    Boolean,
    Plain,
}

impl ColumnKind {
    /// Classify an `information_schema.columns.data_type` string
    pub fn from_relational_type(data_type: &str) -> Self {
        let data_type = data_type.to_ascii_lowercase();
        if data_type == "boolean" || data_type == "bool" {
            ColumnKind::Boolean
        } else if data_type.starts_with("timestamp") {
            ColumnKind::Timestamp
        } else {
            ColumnKind::Plain
        }
    }

    /// Classify a relational column, falling back to the catalog's fixed
    /// timestamp list when the store reported no type.
    pub fn classify(catalogs: &CatalogSet, column: &str, reported_type: Option<&str>) -> Self {
        match reported_type {
            Some(data_type) => Self::from_relational_type(data_type),
            None if catalogs.is_timestamp_column(column) => ColumnKind::Timestamp,
            None => ColumnKind::Plain,
        }
    }
}

pub fn millis_to_timestamp(millis: i64, column: &str) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| Error::conversion(column, format!("{} is not a valid epoch-millis timestamp", millis)))
}

pub fn timestamp_to_millis(timestamp: &DateTime<Utc>) -> i64 {
    timestamp.timestamp_millis()
}

pub fn int_to_bool(value: i64) -> bool {
    value != 0
}

pub fn bool_to_int(value: bool) -> i64 {
    value as i64
}

/// Convert an embedded value for a relational column of the given kind.
pub fn to_relational(value: Value, kind: ColumnKind, column: &str) -> Result<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }

    match kind {
        ColumnKind::Plain => Ok(value),
        ColumnKind::Timestamp => match value {
            Value::Integer(millis) => millis_to_timestamp(millis, column).map(Value::Timestamp),
            Value::Real(millis) if millis.is_finite() => {
                millis_to_timestamp(millis.trunc() as i64, column).map(Value::Timestamp)
            }
            Value::Text(ref text) => parse_timestamp_text(text, column).map(Value::Timestamp),
            Value::Timestamp(_) => Ok(value),
            other => Err(Error::conversion(
                column,
                format!("cannot convert {} to a timestamp", other.type_name()),
            )),
        },
        ColumnKind::Boolean => match value {
            Value::Integer(i) => Ok(Value::Bool(int_to_bool(i))),
            Value::Bool(_) => Ok(value),
            Value::Text(ref text) => match text.trim() {
                "1" | "true" | "TRUE" => Ok(Value::Bool(true)),
                "0" | "false" | "FALSE" => Ok(Value::Bool(false)),
                other => Err(Error::conversion(column, format!("'{}' is not a boolean", other))),
            },
            other => Err(Error::conversion(
                column,
                format!("cannot convert {} to a boolean", other.type_name()),
            )),
        },
    }
}

/// Convert a relational value into its embedded encoding.
pub fn to_embedded(value: Value) -> Value {
    match value {
        Value::Timestamp(ts) => Value::Integer(timestamp_to_millis(&ts)),
        Value::Bool(b) => Value::Integer(bool_to_int(b)),
        other => other,
    }
}

fn parse_timestamp_text(text: &str, column: &str) -> Result<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(millis) = text.parse::<i64>() {
        return millis_to_timestamp(millis, column);
    }
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::conversion(column, format!("malformed timestamp '{}': {}", text, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_by_reported_type() {
        assert_eq!(ColumnKind::from_relational_type("boolean"), ColumnKind::Boolean);
        assert_eq!(
            ColumnKind::from_relational_type("timestamp with time zone"),
            ColumnKind::Timestamp
        );
        assert_eq!(
            ColumnKind::from_relational_type("timestamp without time zone"),
            ColumnKind::Timestamp
        );
        assert_eq!(ColumnKind::from_relational_type("integer"), ColumnKind::Plain);
    }

    #[test]
    fn test_classify_prefers_type_over_name() {
        let catalogs = CatalogSet::builtin();
        // A column on the timestamp list that the store reports as text stays text
        assert_eq!(ColumnKind::classify(&catalogs, "pub_date", Some("text")), ColumnKind::Plain);
        assert_eq!(ColumnKind::classify(&catalogs, "pub_date", None), ColumnKind::Timestamp);
        assert_eq!(ColumnKind::classify(&catalogs, "title", None), ColumnKind::Plain);
    }

    #[test]
    fn test_millis_to_relational_timestamp() {
        let value = to_relational(Value::Integer(1_700_000_000_123), ColumnKind::Timestamp, "pub_date").unwrap();
        let expected = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        assert_eq!(value, Value::Timestamp(expected));
    }

    #[test]
    fn test_timestamp_roundtrip_truncates_to_millis() {
        let precise = Utc.timestamp_nanos(1_700_000_000_123_456_789);
        let embedded = to_embedded(Value::Timestamp(precise));
        assert_eq!(embedded, Value::Integer(1_700_000_000_123));

        let back = to_relational(embedded, ColumnKind::Timestamp, "pub_date").unwrap();
        assert_eq!(back, Value::Timestamp(Utc.timestamp_millis_opt(1_700_000_000_123).unwrap()));
    }

    #[test]
    fn test_boolean_conversions() {
        assert_eq!(
            to_relational(Value::Integer(1), ColumnKind::Boolean, "explicit").unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            to_relational(Value::Integer(0), ColumnKind::Boolean, "explicit").unwrap(),
            Value::Bool(false)
        );
        assert_eq!(to_embedded(Value::Bool(true)), Value::Integer(1));
        assert_eq!(to_embedded(Value::Bool(false)), Value::Integer(0));
    }

    #[test]
    fn test_null_passes_through() {
        assert_eq!(to_relational(Value::Null, ColumnKind::Timestamp, "ends_at").unwrap(), Value::Null);
        assert_eq!(to_relational(Value::Null, ColumnKind::Boolean, "explicit").unwrap(), Value::Null);
        assert_eq!(to_embedded(Value::Null), Value::Null);
    }

    #[test]
    fn test_malformed_timestamp_is_conversion_error() {
        let err = to_relational(Value::Text("yesterday".into()), ColumnKind::Timestamp, "pub_date").unwrap_err();
        assert!(matches!(err, Error::Conversion { ref column, .. } if column == "pub_date"));
    }

    #[test]
    fn test_rfc3339_text_timestamp() {
        let value = to_relational(
            Value::Text("2024-05-01T10:00:00Z".into()),
            ColumnKind::Timestamp,
            "starts_at",
        )
        .unwrap();
        assert_eq!(value, Value::Timestamp(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()));
    }

    #[test]
    fn test_plain_values_untouched() {
        assert_eq!(
            to_relational(Value::Text("hello".into()), ColumnKind::Plain, "title").unwrap(),
            Value::Text("hello".into())
        );
        assert_eq!(to_embedded(Value::Real(1.5)), Value::Real(1.5));
    }
}
