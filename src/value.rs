// 🧱 Column values and row codecs
//
// Every entity serializes through `RowWriter` and deserializes from
// `RowReader`, both keyed by field name. Column order is owned by the
// schema registry, never by the entity code.

use crate::error::{RecordError, Result};
use crate::schema::FieldKind;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rusqlite::types::{ToSql, ToSqlOutput, Value as SqlValue, ValueRef};
use std::collections::HashMap;
use std::fmt;

/// Primary key of a stored row
pub type Key = i64;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// A single column value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Decode a raw SQLite value according to the declared field kind
    pub fn from_sql(entity: &'static str, kind: FieldKind, raw: SqlValue) -> Result<Value> {
        let value = match (kind, raw) {
            (_, SqlValue::Null) => Value::Null,
            (FieldKind::Text, SqlValue::Text(s)) => Value::Text(s),
            (FieldKind::Text, SqlValue::Integer(i)) => Value::Text(i.to_string()),
            (FieldKind::Text, SqlValue::Real(r)) => Value::Text(r.to_string()),
            (FieldKind::Real, SqlValue::Real(r)) => Value::Real(r),
            (FieldKind::Real, SqlValue::Integer(i)) => Value::Real(i as f64),
            (FieldKind::Ref(_), SqlValue::Integer(i)) => Value::Integer(i),
            (FieldKind::Date, SqlValue::Text(s)) => Value::Date(parse_date(entity, &s)?),
            (FieldKind::Timestamp, SqlValue::Text(s)) => {
                Value::Timestamp(parse_timestamp(entity, &s)?)
            }
            (kind, raw) => {
                return Err(RecordError::invalid(
                    entity,
                    format!("column of kind {:?} holds unexpected value {:?}", kind, raw),
                ))
            }
        };
        Ok(value)
    }
}

fn parse_date(entity: &'static str, raw: &str) -> Result<NaiveDate> {
    // Accept full timestamps too, only the date part matters
    let head = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(head, DATE_FORMAT)
        .map_err(|e| RecordError::invalid(entity, format!("bad date {:?}: {}", raw, e)))
}

fn parse_timestamp(entity: &'static str, raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    // SQLite CURRENT_TIMESTAMP format
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|e| RecordError::invalid(entity, format!("bad timestamp {:?}: {}", raw, e)))
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(SqlValue::Null),
            Value::Integer(i) => ToSqlOutput::Owned(SqlValue::Integer(*i)),
            Value::Real(r) => ToSqlOutput::Owned(SqlValue::Real(*r)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Date(d) => ToSqlOutput::Owned(SqlValue::Text(d.format(DATE_FORMAT).to_string())),
            Value::Timestamp(t) => ToSqlOutput::Owned(SqlValue::Text(t.to_rfc3339())),
        })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Real(r) => write!(f, "{}", r),
            Value::Text(s) => write!(f, "{:?}", s),
            Value::Date(d) => write!(f, "{}", d.format(DATE_FORMAT)),
            Value::Timestamp(t) => write!(f, "{}", t.to_rfc3339()),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Real(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<NaiveDate> for Value {
    fn from(value: NaiveDate) -> Self {
        Value::Date(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::Timestamp(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

// ============================================================================
// ROW CODECS
// ============================================================================

/// Collects content-field values of one entity, by field name
#[derive(Debug)]
pub struct RowWriter {
    entity: &'static str,
    values: HashMap<&'static str, Value>,
}

impl RowWriter {
    pub fn new(entity: &'static str) -> Self {
        RowWriter {
            entity,
            values: HashMap::new(),
        }
    }

    pub fn put(&mut self, field: &'static str, value: impl Into<Value>) {
        self.values.insert(field, value.into());
    }

    /// Remove a written value; `None` means the encoder never wrote the field
    pub fn take(&mut self, field: &str) -> Option<Value> {
        self.values.remove(field)
    }

    pub fn entity(&self) -> &'static str {
        self.entity
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// One fetched row: primary key, owning report and content fields by name
#[derive(Debug, Clone)]
pub struct RowReader {
    entity: &'static str,
    key: Key,
    report: Option<Key>,
    values: HashMap<&'static str, Value>,
}

impl RowReader {
    pub fn new(
        entity: &'static str,
        key: Key,
        report: Option<Key>,
        values: HashMap<&'static str, Value>,
    ) -> Self {
        RowReader {
            entity,
            key,
            report,
            values,
        }
    }

    pub fn key(&self) -> Key {
        self.key
    }

    pub fn report(&self) -> Option<Key> {
        self.report
    }

    pub fn value(&self, field: &str) -> &Value {
        self.values.get(field).unwrap_or(&Value::Null)
    }

    pub fn text(&self, field: &str) -> Result<Option<String>> {
        match self.value(field) {
            Value::Null => Ok(None),
            Value::Text(s) => Ok(Some(s.clone())),
            other => Err(self.mismatch(field, "text", other)),
        }
    }

    pub fn real(&self, field: &str) -> Result<Option<f64>> {
        match self.value(field) {
            Value::Null => Ok(None),
            Value::Real(r) => Ok(Some(*r)),
            Value::Integer(i) => Ok(Some(*i as f64)),
            other => Err(self.mismatch(field, "real", other)),
        }
    }

    pub fn key_ref(&self, field: &str) -> Result<Option<Key>> {
        match self.value(field) {
            Value::Null => Ok(None),
            Value::Integer(i) => Ok(Some(*i)),
            other => Err(self.mismatch(field, "key", other)),
        }
    }

    pub fn date(&self, field: &str) -> Result<Option<NaiveDate>> {
        match self.value(field) {
            Value::Null => Ok(None),
            Value::Date(d) => Ok(Some(*d)),
            other => Err(self.mismatch(field, "date", other)),
        }
    }

    pub fn timestamp(&self, field: &str) -> Result<Option<DateTime<Utc>>> {
        match self.value(field) {
            Value::Null => Ok(None),
            Value::Timestamp(t) => Ok(Some(*t)),
            other => Err(self.mismatch(field, "timestamp", other)),
        }
    }

    fn mismatch(&self, field: &str, expected: &str, found: &Value) -> RecordError {
        RecordError::invalid(
            self.entity,
            format!("field {} expected {}, found {}", field, expected, found),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::EntityKind;

    #[test]
    fn test_decode_date_and_timestamp() {
        let date = Value::from_sql("Transaction", FieldKind::Date, SqlValue::Text("2024-03-01".into()))
            .unwrap();
        assert_eq!(date, Value::Date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()));

        let stamp = Value::from_sql(
            "Report",
            FieldKind::Timestamp,
            SqlValue::Text("2024-03-01 12:30:00".into()),
        )
        .unwrap();
        assert!(matches!(stamp, Value::Timestamp(_)));
    }

    #[test]
    fn test_decode_rejects_kind_mismatch() {
        let result = Value::from_sql(
            "Statement",
            FieldKind::Ref(EntityKind::Account),
            SqlValue::Text("cash".into()),
        );
        assert!(matches!(result, Err(RecordError::InvalidRecord { .. })));
    }

    #[test]
    fn test_reader_accessors() {
        let mut values = HashMap::new();
        values.insert("amount", Value::Integer(42));
        values.insert("description", Value::Null);
        let row = RowReader::new("Transaction", 7, Some(1), values);

        assert_eq!(row.key(), 7);
        assert_eq!(row.report(), Some(1));
        assert_eq!(row.real("amount").unwrap(), Some(42.0));
        assert_eq!(row.text("description").unwrap(), None);
        assert_eq!(row.text("never_written").unwrap(), None);
        assert!(row.text("amount").is_err());
    }

    #[test]
    fn test_option_into_value() {
        let none: Option<f64> = None;
        assert!(Value::from(none).is_null());
        assert_eq!(Value::from(Some("usd")), Value::Text("usd".into()));
    }
}
