//! PostgreSQL writes: stage a chunk with text COPY, then merge it into the
//! target in the same transaction.

use deadpool_postgres::Object;
use futures::SinkExt;
use tracing::debug;

use crate::core::{Row, Value};
use crate::error::{MigrateError, Result};

use super::quote_ident;
use super::reader::{PgColumn, PgKind};

/// Name of the transaction-scoped staging table.
const STAGING_TABLE: &str = "_relmigrate_staging";

/// Insert one chunk atomically. Returns the number of rows inserted.
///
/// With `skip_existing`, conflicting primary keys are left alone and are not
/// counted.
pub(super) async fn insert_chunk(
    client: &mut Object,
    qualified: &str,
    key_column: &str,
    shape: &[PgColumn],
    rows: &[Row],
    skip_existing: bool,
) -> Result<u64> {
    let Some(first) = rows.first() else {
        return Ok(0);
    };

    // Write the source's columns; the destination fills in anything else
    // from its defaults.
    let mut columns: Vec<&PgColumn> = Vec::with_capacity(first.len());
    for name in first.columns() {
        let column = shape.iter().find(|c| &c.name == name).ok_or_else(|| {
            MigrateError::transfer(
                qualified,
                format!("destination has no column {}", quote_ident(name)),
            )
        })?;
        columns.push(column);
    }
    let col_list: Vec<String> = columns.iter().map(|c| quote_ident(&c.name)).collect();
    let col_list = col_list.join(", ");

    let tx = client.transaction().await?;

    tx.batch_execute(&format!(
        "CREATE TEMP TABLE {} (LIKE {} INCLUDING DEFAULTS) ON COMMIT DROP",
        quote_ident(STAGING_TABLE),
        qualified
    ))
    .await?;

    let copy_sql = format!(
        "COPY {} ({}) FROM STDIN WITH (FORMAT TEXT)",
        quote_ident(STAGING_TABLE),
        col_list
    );
    let sink = tx
        .copy_in(&copy_sql)
        .await
        .map_err(|e| MigrateError::transfer(qualified, format!("initiating COPY: {}", e)))?;

    let payload = copy_payload(&columns, rows);
    tokio::pin!(sink);
    sink.send(bytes::Bytes::from(payload))
        .await
        .map_err(|e| MigrateError::transfer(qualified, format!("sending COPY data: {}", e)))?;
    sink.finish()
        .await
        .map_err(|e| MigrateError::transfer(qualified, format!("finishing COPY: {}", e)))?;

    let mut insert_sql = format!(
        "INSERT INTO {} ({}) SELECT {} FROM {}",
        qualified,
        col_list,
        col_list,
        quote_ident(STAGING_TABLE)
    );
    if skip_existing {
        insert_sql.push_str(&format!(" ON CONFLICT ({}) DO NOTHING", quote_ident(key_column)));
    }

    let inserted = tx.execute(&insert_sql, &[]).await?;
    tx.commit().await?;

    debug!("{}: inserted {} of {} rows", qualified, inserted, rows.len());
    Ok(inserted)
}

/// Render rows as COPY text, one line per row.
fn copy_payload(columns: &[&PgColumn], rows: &[Row]) -> String {
    let mut text_buf = String::with_capacity(rows.len() * 256);
    for row in rows {
        for (i, column) in columns.iter().enumerate() {
            if i > 0 {
                text_buf.push('\t');
            }
            let value = row.get(&column.name).unwrap_or(&Value::Null);
            text_buf.push_str(&value_to_text(value, column.kind));
        }
        text_buf.push('\n');
    }
    text_buf
}

/// Convert a value to COPY text for a destination column of `kind`.
fn value_to_text(value: &Value, kind: PgKind) -> String {
    match value {
        Value::Null => "\\N".to_string(),
        Value::Bool(b) if kind.is_integer() => if *b { "1" } else { "0" }.to_string(),
        Value::Bool(b) => if *b { "t" } else { "f" }.to_string(),
        // Engines without a timestamp type store epoch milliseconds.
        Value::Int(ms) if kind.is_timestamp() => match Value::from_epoch_millis(*ms) {
            Some(ts) => value_to_text(&ts, kind),
            None => ms.to_string(),
        },
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Text(s) => escape_copy_text(s),
        Value::Timestamp(ts) => match kind {
            PgKind::Timestamp => ts.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
            k if k.is_integer() => ts.timestamp_millis().to_string(),
            _ => ts.format("%Y-%m-%d %H:%M:%S%.f+00").to_string(),
        },
    }
}

/// Escape text for PostgreSQL COPY.
fn escape_copy_text(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '\t' => result.push_str("\\t"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            _ => result.push(c),
        }
    }
    result
}
