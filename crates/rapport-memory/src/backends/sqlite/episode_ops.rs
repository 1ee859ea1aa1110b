//! Append-only episode storage over the resolved episodes table.

use rusqlite::types::Value;
use rusqlite::{Connection, Row, params_from_iter};
use tracing::debug;
use uuid::Uuid;

use super::codec::{
    count_rows, fmt_ts, insert_row, read_f64, read_set, read_string, read_ts, set_to_json, text,
    where_clause,
};
use super::schema::ResolvedTable;
use crate::error::{Result, StorageError};
use rapport_types::{Episode, EpisodeType};

pub(super) fn save_episode(conn: &Connection, table: &ResolvedTable, episode: &Episode) -> Result<()> {
    let id = episode.id.to_string();
    if count_rows(conn, table, vec![("id", text(id.as_str()))])? > 0 {
        debug!(episode_id = %id, "Episode already stored, keeping original");
        return Ok(());
    }

    insert_row(
        conn,
        table,
        vec![
            ("id", text(id.as_str())),
            ("user_id", text(episode.user_id.as_str())),
            ("episode_type", text(episode.episode_type.as_str())),
            ("title", text(episode.title.as_str())),
            ("summary", text(episode.summary.as_str())),
            ("importance", Value::Real(episode.base_importance)),
            ("sentiment", Value::Real(episode.sentiment)),
            ("tags", text(set_to_json(&episode.tags)?)),
            ("created_at", text(fmt_ts(&episode.created_at))),
        ],
    )?;

    debug!(episode_id = %id, user_id = %episode.user_id, "Saved episode");
    Ok(())
}

pub(super) fn get_episodes(
    conn: &Connection,
    table: &ResolvedTable,
    user_id: &str,
    min_importance: Option<f64>,
    limit: Option<usize>,
) -> Result<Vec<Episode>> {
    let mut params = Vec::new();
    let mut filter = where_clause(table, vec![("user_id", text(user_id))], &mut params)?;
    if let Some(min) = min_importance {
        params.push(Value::Real(min));
        filter.push_str(&format!(
            " AND {} >= ?{}",
            table.required("importance")?,
            params.len()
        ));
    }
    let mut sql = format!(
        "SELECT {} FROM {} WHERE {} ORDER BY {} DESC",
        table.select_list(),
        table.ident(),
        filter,
        table.required("created_at")?
    );
    if let Some(limit) = limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }
    query_episodes(conn, table, &sql, params)
}

/// Case-insensitive search over title, summary and each decoded tag.
pub(super) fn search_episodes(
    conn: &Connection,
    table: &ResolvedTable,
    user_id: &str,
    query: &str,
    limit: Option<usize>,
) -> Result<Vec<Episode>> {
    let mut episodes: Vec<Episode> = get_episodes(conn, table, user_id, None, None)?
        .into_iter()
        .filter(|e| e.matches(query))
        .collect();
    if let Some(limit) = limit {
        episodes.truncate(limit);
    }
    Ok(episodes)
}

fn query_episodes(
    conn: &Connection,
    table: &ResolvedTable,
    sql: &str,
    params: Vec<Value>,
) -> Result<Vec<Episode>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params_from_iter(params))?;
    let mut episodes = Vec::new();
    while let Some(row) = rows.next()? {
        episodes.push(row_to_episode(table, row)?);
    }
    Ok(episodes)
}

fn row_to_episode(table: &ResolvedTable, row: &Row) -> Result<Episode> {
    let at = |field: &str| table.index_of(field);
    let missing = |field: &str| StorageError::InvalidData(format!("episode row has NULL {field}"));

    let id_str = read_string(row, at("id"))?.ok_or_else(|| missing("id"))?;
    // Foreign tables may use integer or free-form ids; map those onto a
    // stable UUID so repeated reads agree.
    let id = Uuid::parse_str(&id_str)
        .unwrap_or_else(|_| Uuid::new_v5(&Uuid::NAMESPACE_OID, id_str.as_bytes()));

    Ok(Episode {
        id,
        user_id: read_string(row, at("user_id"))?.ok_or_else(|| missing("user_id"))?,
        episode_type: read_string(row, at("episode_type"))?
            .map(|s| EpisodeType::parse(&s))
            .unwrap_or(EpisodeType::Other),
        title: read_string(row, at("title"))?.ok_or_else(|| missing("title"))?,
        summary: read_string(row, at("summary"))?.unwrap_or_default(),
        base_importance: read_f64(row, at("importance"))?
            .ok_or_else(|| missing("importance"))?
            .max(0.0),
        sentiment: read_f64(row, at("sentiment"))?.unwrap_or(0.0),
        tags: read_set(row, at("tags"))?,
        created_at: read_ts(row, at("created_at"))?.ok_or_else(|| missing("created_at"))?,
    })
}
