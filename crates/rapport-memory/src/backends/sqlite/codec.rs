//! Lenient value decoding and dynamic statement helpers.
//!
//! Externally owned tables do not agree on column types: timestamps may be
//! RFC 3339 text, SQLite `CURRENT_TIMESTAMP` text or epoch integers; tag lists
//! may be JSON or comma-separated. Readers here accept all of those. Writers
//! always emit one canonical form.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use rusqlite::types::{Value, ValueRef};
use rusqlite::{Connection, Row, params_from_iter};

use super::schema::{ResolvedTable, quote_ident};
use crate::error::{Result, StorageError};

/// Canonical timestamp form: fixed-width UTC, sortable as text.
pub(crate) fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn invalid(msg: impl Into<String>) -> StorageError {
    StorageError::InvalidData(msg.into())
}

fn text_of<'a>(bytes: &'a [u8], idx: usize) -> Result<&'a str> {
    std::str::from_utf8(bytes)
        .map_err(|e| invalid(format!("column {idx} is not UTF-8: {e}")).into())
}

pub(crate) fn read_string(row: &Row, idx: usize) -> Result<Option<String>> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Null => None,
        ValueRef::Text(bytes) => Some(text_of(bytes, idx)?.to_string()),
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Blob(_) => return Err(invalid(format!("column {idx} is a blob")).into()),
    })
}

pub(crate) fn read_f64(row: &Row, idx: usize) -> Result<Option<f64>> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i as f64),
        ValueRef::Real(f) => Some(f),
        ValueRef::Text(bytes) => {
            let text = text_of(bytes, idx)?;
            Some(
                text.trim()
                    .parse()
                    .map_err(|_| invalid(format!("column {idx}: '{text}' is not a number")))?,
            )
        }
        ValueRef::Blob(_) => return Err(invalid(format!("column {idx} is a blob")).into()),
    })
}

pub(crate) fn read_i64(row: &Row, idx: usize) -> Result<Option<i64>> {
    Ok(read_f64(row, idx)?.map(|f| f.round() as i64))
}

pub(crate) fn read_ts(row: &Row, idx: usize) -> Result<Option<DateTime<Utc>>> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Null => None,
        ValueRef::Integer(secs) => Utc.timestamp_opt(secs, 0).single(),
        ValueRef::Real(secs) => Utc
            .timestamp_opt(secs.trunc() as i64, (secs.fract() * 1e9) as u32)
            .single(),
        ValueRef::Text(bytes) => Some(parse_ts(text_of(bytes, idx)?)?),
        ValueRef::Blob(_) => return Err(invalid(format!("column {idx} is a blob")).into()),
    })
}

fn parse_ts(text: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(naive.and_utc());
        }
    }
    Err(invalid(format!("unrecognized timestamp '{text}'")).into())
}

/// Read a string set stored as a JSON array or comma-separated text.
pub(crate) fn read_set(row: &Row, idx: usize) -> Result<BTreeSet<String>> {
    let Some(text) = read_string(row, idx)? else {
        return Ok(BTreeSet::new());
    };
    let trimmed = text.trim();
    if trimmed.starts_with('[') {
        let items: Vec<String> = serde_json::from_str(trimmed)?;
        return Ok(items.into_iter().filter(|s| !s.is_empty()).collect());
    }
    Ok(trimmed
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect())
}

pub(crate) fn set_to_json(set: &BTreeSet<String>) -> Result<String> {
    Ok(serde_json::to_string(set)?)
}

pub(crate) fn text(value: impl Into<String>) -> Value {
    Value::Text(value.into())
}

/// Logical field → value pairs for a write.
pub(crate) type Assignments = Vec<(&'static str, Value)>;

/// Insert a row, writing only the columns the table has.
pub(crate) fn insert_row(conn: &Connection, table: &ResolvedTable, values: Assignments) -> Result<usize> {
    let (columns, params): (Vec<String>, Vec<Value>) = values
        .into_iter()
        .filter_map(|(field, value)| table.column(field).map(|c| (quote_ident(c), value)))
        .unzip();
    let placeholders = (1..=columns.len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table.ident(),
        columns.join(", "),
        placeholders
    );
    Ok(conn.execute(&sql, params_from_iter(params))?)
}

/// Update rows matching `keys`, writing only the columns the table has.
/// Returns the number of rows touched.
pub(crate) fn update_rows(
    conn: &Connection,
    table: &ResolvedTable,
    values: Assignments,
    keys: Assignments,
) -> Result<usize> {
    let mut params = Vec::new();
    let mut sets = Vec::new();
    for (field, value) in values {
        if let Some(col) = table.column(field) {
            params.push(value);
            sets.push(format!("{} = ?{}", quote_ident(col), params.len()));
        }
    }
    if sets.is_empty() {
        // Nothing writable; report the match count so callers do not insert.
        return count_rows(conn, table, keys);
    }
    let filter = where_clause(table, keys, &mut params)?;
    let sql = format!("UPDATE {} SET {} WHERE {}", table.ident(), sets.join(", "), filter);
    Ok(conn.execute(&sql, params_from_iter(params))?)
}

/// Delete rows matching `keys`.
pub(crate) fn delete_rows(conn: &Connection, table: &ResolvedTable, keys: Assignments) -> Result<usize> {
    let mut params = Vec::new();
    let filter = where_clause(table, keys, &mut params)?;
    let sql = format!("DELETE FROM {} WHERE {}", table.ident(), filter);
    Ok(conn.execute(&sql, params_from_iter(params))?)
}

pub(crate) fn count_rows(conn: &Connection, table: &ResolvedTable, keys: Assignments) -> Result<usize> {
    let mut params = Vec::new();
    let filter = where_clause(table, keys, &mut params)?;
    let sql = format!("SELECT COUNT(*) FROM {} WHERE {}", table.ident(), filter);
    let count: i64 = conn.query_row(&sql, params_from_iter(params), |row| row.get(0))?;
    Ok(count as usize)
}

/// Build `a = ?n AND b = ?m` over required key columns, appending params.
pub(crate) fn where_clause(
    table: &ResolvedTable,
    keys: Assignments,
    params: &mut Vec<Value>,
) -> Result<String> {
    let mut clauses = Vec::new();
    for (field, value) in keys {
        let col = table.required(field)?;
        params.push(value);
        clauses.push(format!("{} = ?{}", col, params.len()));
    }
    Ok(if clauses.is_empty() {
        "1 = 1".to_string()
    } else {
        clauses.join(" AND ")
    })
}
