//! PostgreSQL reads: table shape discovery, keyset queries, row conversion.

use std::sync::Arc;

use tokio_postgres::types::Type;
use tokio_postgres::Client;

use crate::core::{Row, RowId, Value};
use crate::error::Result;

use super::quote_ident;

/// How a column is carried between PostgreSQL and [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum PgKind {
    Bool,
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Text,
    Timestamp,
    Timestamptz,
    /// Anything else (numeric, uuid, date, json, bytea, enums...), selected
    /// as `::text` and written back through the type's text input.
    Other,
}

impl PgKind {
    pub(super) fn from_type(ty: &Type) -> Self {
        match *ty {
            Type::BOOL => PgKind::Bool,
            Type::INT2 => PgKind::Int2,
            Type::INT4 => PgKind::Int4,
            Type::INT8 => PgKind::Int8,
            Type::FLOAT4 => PgKind::Float4,
            Type::FLOAT8 => PgKind::Float8,
            Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => PgKind::Text,
            Type::TIMESTAMP => PgKind::Timestamp,
            Type::TIMESTAMPTZ => PgKind::Timestamptz,
            _ => PgKind::Other,
        }
    }

    pub(super) fn is_integer(self) -> bool {
        matches!(self, PgKind::Int2 | PgKind::Int4 | PgKind::Int8)
    }

    pub(super) fn is_timestamp(self) -> bool {
        matches!(self, PgKind::Timestamp | PgKind::Timestamptz)
    }
}

/// One column of a table as PostgreSQL reports it.
#[derive(Debug, Clone)]
pub(super) struct PgColumn {
    pub name: String,
    pub kind: PgKind,
}

/// Describe a table's columns without reading any rows.
pub(super) async fn load_shape(client: &Client, qualified: &str) -> Result<Vec<PgColumn>> {
    let stmt = client
        .prepare(&format!("SELECT * FROM {} LIMIT 0", qualified))
        .await?;
    Ok(stmt
        .columns()
        .iter()
        .map(|c| PgColumn {
            name: c.name().to_string(),
            kind: PgKind::from_type(c.type_()),
        })
        .collect())
}

/// Build a keyset SELECT: rows after `cursor` in key order, at most `limit`.
pub(super) fn page_query(
    qualified: &str,
    shape: &[PgColumn],
    key_column: &str,
    cursor: Option<&RowId>,
    limit: Option<usize>,
) -> String {
    let select_list: Vec<String> = shape
        .iter()
        .map(|c| {
            let ident = quote_ident(&c.name);
            if c.kind == PgKind::Other {
                format!("{}::text AS {}", ident, ident)
            } else {
                ident
            }
        })
        .collect();

    let key = quote_ident(key_column);
    let mut sql = format!("SELECT {} FROM {}", select_list.join(", "), qualified);
    if let Some(cursor) = cursor {
        sql.push_str(&format!(" WHERE {} > {}", key, cursor.to_sql_literal()));
    }
    sql.push_str(&format!(" ORDER BY {}", key));
    if let Some(limit) = limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }
    sql
}

/// Run a query built by [`page_query`] and convert the result.
pub(super) async fn fetch(client: &Client, sql: &str, shape: &[PgColumn]) -> Result<Vec<Row>> {
    let header: Arc<[String]> = shape.iter().map(|c| c.name.clone()).collect();
    let rows = client.query(sql, &[]).await?;

    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
        let mut values = Vec::with_capacity(shape.len());
        for (idx, col) in shape.iter().enumerate() {
            values.push(convert_value(row, idx, col.kind)?);
        }
        out.push(Row::new(header.clone(), values));
    }
    Ok(out)
}

/// Convert one PostgreSQL column value to a [`Value`].
fn convert_value(row: &tokio_postgres::Row, idx: usize, kind: PgKind) -> Result<Value> {
    let value = match kind {
        PgKind::Bool => Value::from(row.try_get::<_, Option<bool>>(idx)?),
        PgKind::Int2 => Value::from(row.try_get::<_, Option<i16>>(idx)?.map(i64::from)),
        PgKind::Int4 => Value::from(row.try_get::<_, Option<i32>>(idx)?.map(i64::from)),
        PgKind::Int8 => Value::from(row.try_get::<_, Option<i64>>(idx)?),
        PgKind::Float4 => Value::from(row.try_get::<_, Option<f32>>(idx)?.map(f64::from)),
        PgKind::Float8 => Value::from(row.try_get::<_, Option<f64>>(idx)?),
        PgKind::Timestamp => Value::from(
            row.try_get::<_, Option<chrono::NaiveDateTime>>(idx)?
                .map(|t| t.and_utc()),
        ),
        PgKind::Timestamptz => {
            Value::from(row.try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx)?)
        }
        PgKind::Text | PgKind::Other => Value::from(row.try_get::<_, Option<String>>(idx)?),
    };
    Ok(value)
}
