//! Fact CRUD and search over the resolved facts table.

use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{Connection, Row, params_from_iter};
use tracing::debug;

use super::codec::{
    Assignments, delete_rows, fmt_ts, insert_row, read_f64, read_set, read_string, read_ts,
    set_to_json, text, update_rows, where_clause,
};
use super::schema::{ResolvedTable, quote_ident};
use crate::backend::fact_matches;
use crate::error::{Result, StorageError};
use rapport_types::Fact;
use rapport_types::fact::DEFAULT_CONFIDENCE;

fn identity(user_id: &str, category: &str, key: &str) -> Assignments {
    vec![
        ("user_id", text(user_id)),
        ("category", text(category)),
        ("key", text(key)),
    ]
}

fn order_clause(table: &ResolvedTable) -> String {
    match table.column("updated_at") {
        Some(col) => format!(" ORDER BY {} DESC", quote_ident(col)),
        None => String::new(),
    }
}

/// Insert or replace the fact with the same identity.
pub(super) fn save_fact(conn: &mut Connection, table: &ResolvedTable, fact: &Fact) -> Result<()> {
    let tx = conn.transaction()?;

    let payload: Assignments = vec![
        ("value", text(fact.value.as_str())),
        ("confidence", Value::Real(fact.confidence)),
        ("tags", text(set_to_json(&fact.tags)?)),
        ("sources", text(fact.joined_sources())),
        ("created_at", text(fmt_ts(&fact.created_at))),
        ("updated_at", text(fmt_ts(&fact.updated_at))),
    ];

    let updated = update_rows(
        &tx,
        table,
        payload.clone(),
        identity(&fact.user_id, &fact.category, &fact.key),
    )?;
    if updated == 0 {
        let mut row = identity(&fact.user_id, &fact.category, &fact.key);
        row.extend(payload);
        insert_row(&tx, table, row)?;
    } else if updated > 1 {
        // Pre-existing duplicates in a foreign table; they now agree.
        debug!(
            user_id = %fact.user_id,
            category = %fact.category,
            key = %fact.key,
            rows = updated,
            "Fact identity matched several rows"
        );
    }

    tx.commit()?;
    debug!(user_id = %fact.user_id, category = %fact.category, key = %fact.key, "Saved fact");
    Ok(())
}

pub(super) fn get_fact(
    conn: &Connection,
    table: &ResolvedTable,
    user_id: &str,
    category: &str,
    key: &str,
) -> Result<Option<Fact>> {
    let mut params = Vec::new();
    let filter = where_clause(table, identity(user_id, category, key), &mut params)?;
    let sql = format!(
        "SELECT {} FROM {} WHERE {}{} LIMIT 1",
        table.select_list(),
        table.ident(),
        filter,
        order_clause(table)
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params_from_iter(params))?;
    match rows.next()? {
        Some(row) => Ok(Some(row_to_fact(table, row)?)),
        None => Ok(None),
    }
}

pub(super) fn get_facts(
    conn: &Connection,
    table: &ResolvedTable,
    user_id: &str,
    category: Option<&str>,
) -> Result<Vec<Fact>> {
    let mut keys = vec![("user_id", text(user_id))];
    if let Some(category) = category {
        keys.push(("category", text(category)));
    }
    let mut params = Vec::new();
    let filter = where_clause(table, keys, &mut params)?;
    let sql = format!(
        "SELECT {} FROM {} WHERE {}{}",
        table.select_list(),
        table.ident(),
        filter,
        order_clause(table)
    );
    query_facts(conn, table, &sql, params)
}

/// Case-insensitive search, filtered with the same predicate every backend uses.
pub(super) fn search_facts(
    conn: &Connection,
    table: &ResolvedTable,
    user_id: &str,
    query: &str,
    limit: Option<usize>,
) -> Result<Vec<Fact>> {
    let mut facts: Vec<Fact> = get_facts(conn, table, user_id, None)?
        .into_iter()
        .filter(|f| fact_matches(f, query))
        .collect();
    if let Some(limit) = limit {
        facts.truncate(limit);
    }
    Ok(facts)
}

pub(super) fn delete_fact(
    conn: &Connection,
    table: &ResolvedTable,
    user_id: &str,
    category: &str,
    key: &str,
) -> Result<bool> {
    let removed = delete_rows(conn, table, identity(user_id, category, key))?;
    if removed > 0 {
        debug!(%user_id, %category, %key, "Deleted fact");
    }
    Ok(removed > 0)
}

fn query_facts(
    conn: &Connection,
    table: &ResolvedTable,
    sql: &str,
    params: Vec<Value>,
) -> Result<Vec<Fact>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params_from_iter(params))?;
    let mut facts = Vec::new();
    while let Some(row) = rows.next()? {
        facts.push(row_to_fact(table, row)?);
    }
    Ok(facts)
}

/// Convert a row produced by `select_list()` into a fact.
fn row_to_fact(table: &ResolvedTable, row: &Row) -> Result<Fact> {
    let at = |field: &str| table.index_of(field);
    let required = |field: &str| -> Result<String> {
        read_string(row, at(field))?.ok_or_else(|| {
            StorageError::InvalidData(format!("fact row has NULL {field}")).into()
        })
    };

    let updated_at = read_ts(row, at("updated_at"))?;
    let created_at = read_ts(row, at("created_at"))?;
    let fallback = updated_at.or(created_at).unwrap_or_else(Utc::now);

    Ok(Fact {
        user_id: required("user_id")?,
        category: required("category")?,
        key: required("key")?,
        value: read_string(row, at("value"))?.unwrap_or_default(),
        confidence: read_f64(row, at("confidence"))?.unwrap_or(DEFAULT_CONFIDENCE),
        tags: read_set(row, at("tags"))?,
        sources: read_set(row, at("sources"))?,
        created_at: created_at.unwrap_or(fallback),
        updated_at: updated_at.unwrap_or(fallback),
    })
}
