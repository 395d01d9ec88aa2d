//! Row and value types moved between stores.
//!
//! Values form a small closed set so every store driver can encode them
//! without knowing anything about the other side.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

/// A single column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL NULL.
    Null,

    /// Boolean value.
    Bool(bool),

    /// Integer number.
    Int(i64),

    /// Floating point number.
    Float(f64),

    /// Text. Also carries values outside the closed set (decimals, UUIDs,
    /// dates, JSON) in their canonical text form.
    Text(String),

    /// Point in time, normalized to UTC.
    Timestamp(DateTime<Utc>),
}

impl Value {
    /// Check if this value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Interpret this value as a row identifier.
    ///
    /// Only integers and text can identify a row.
    #[must_use]
    pub fn as_row_id(&self) -> Option<RowId> {
        match self {
            Value::Int(v) => Some(RowId::Int(*v)),
            Value::Text(v) => Some(RowId::Text(v.clone())),
            _ => None,
        }
    }

    /// Build a timestamp from Unix epoch milliseconds.
    #[must_use]
    pub fn from_epoch_millis(ms: i64) -> Option<Self> {
        Utc.timestamp_millis_opt(ms).single().map(Value::Timestamp)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Primary key value of a row.
///
/// Ordering matches the store's `ORDER BY` for keys of a single kind.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RowId {
    /// Integer key.
    Int(i64),
    /// Text key (varchar, uuid, cuid...).
    Text(String),
}

impl RowId {
    /// Convert to a SQL literal for use in keyset WHERE clauses.
    ///
    /// Single quotes are doubled; the literal is left untyped so the
    /// store coerces it to the key column's type.
    pub fn to_sql_literal(&self) -> String {
        match self {
            RowId::Int(v) => v.to_string(),
            RowId::Text(v) => format!("'{}'", v.replace('\'', "''")),
        }
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowId::Int(v) => write!(f, "{}", v),
            RowId::Text(v) => f.write_str(v),
        }
    }
}

impl From<i64> for RowId {
    fn from(v: i64) -> Self {
        RowId::Int(v)
    }
}

impl From<&str> for RowId {
    fn from(v: &str) -> Self {
        RowId::Text(v.to_string())
    }
}

/// An ordered mapping from column name to value.
///
/// Column names are shared between the rows of one page, so a page of
/// `n` rows stores its header once.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    /// Create a row from a shared header and matching values.
    ///
    /// Missing trailing values are padded with NULL; extra values are dropped.
    pub fn new(columns: Arc<[String]>, mut values: Vec<Value>) -> Self {
        values.resize(columns.len(), Value::Null);
        Self { columns, values }
    }

    /// Build a row from `(column, value)` pairs.
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        let (columns, values): (Vec<String>, Vec<Value>) = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .unzip();
        Self {
            columns: columns.into(),
            values,
        }
    }

    /// Column names in order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Shared column header.
    pub fn header(&self) -> &Arc<[String]> {
        &self.columns
    }

    /// Values in column order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Look up a value by column name.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|idx| &self.values[idx])
    }

    /// The row's identifier under the given key column.
    pub fn id(&self, key_column: &str) -> Option<RowId> {
        self.get(key_column).and_then(Value::as_row_id)
    }

    /// Iterate `(column, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    /// Number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
