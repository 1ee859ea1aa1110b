//! Affinity state, active moods and the interaction log.

use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{Connection, Row, params_from_iter};
use tracing::debug;

use super::codec::{
    Assignments, delete_rows, fmt_ts, insert_row, read_i64, read_string, read_ts, text,
    update_rows, where_clause,
};
use super::schema::{ResolvedSchema, ResolvedTable};
use crate::error::{Result, StorageError};
use rapport_types::{
    ActiveMood, AffinityState, InteractionRecord, InteractionType, LevelTable, MAX_POINTS,
    MIN_POINTS,
};

fn pair(user_id: &str, personality_name: &str) -> Assignments {
    vec![
        ("user_id", text(user_id)),
        ("personality", text(personality_name)),
    ]
}

// ─────────────────────────────────────────────────────────────────────────────
// Affinity
// ─────────────────────────────────────────────────────────────────────────────

/// Read-modify-write the pair's affinity inside one transaction and append
/// the interaction to the log.
pub(super) fn update_affinity(
    conn: &mut Connection,
    schema: &ResolvedSchema,
    user_id: &str,
    personality_name: &str,
    delta: i32,
    interaction_type: InteractionType,
    levels: &LevelTable,
) -> Result<AffinityState> {
    let tx = conn.transaction()?;

    let existing = select_affinity(&tx, &schema.affinity, user_id, personality_name)?;
    let is_new = existing.is_none();
    let mut state = existing
        .unwrap_or_else(|| AffinityState::initial(user_id, personality_name, levels));
    state.apply(delta, levels, Utc::now());

    let payload: Assignments = vec![
        ("points", Value::Integer(i64::from(state.points))),
        ("level", text(state.level.as_str())),
        ("total_interactions", Value::Integer(state.total_interactions as i64)),
        ("positive_count", Value::Integer(state.positive_count as i64)),
        ("negative_count", Value::Integer(state.negative_count as i64)),
        (
            "last_interaction_at",
            state
                .last_interaction_at
                .as_ref()
                .map(|ts| text(fmt_ts(ts)))
                .unwrap_or(Value::Null),
        ),
    ];

    if is_new {
        let mut row = pair(user_id, personality_name);
        row.extend(payload);
        insert_row(&tx, &schema.affinity, row)?;
    } else {
        update_rows(&tx, &schema.affinity, payload, pair(user_id, personality_name))?;
    }

    let record = InteractionRecord::from_state(&state, interaction_type, delta);
    insert_interaction(&tx, &schema.memories, &record)?;

    tx.commit()?;
    debug!(
        %user_id,
        personality = %personality_name,
        delta,
        points = state.points,
        level = %state.level,
        "Updated affinity"
    );
    Ok(state)
}

pub(super) fn select_affinity(
    conn: &Connection,
    table: &ResolvedTable,
    user_id: &str,
    personality_name: &str,
) -> Result<Option<AffinityState>> {
    let mut params = Vec::new();
    let filter = where_clause(table, pair(user_id, personality_name), &mut params)?;
    let sql = format!(
        "SELECT {} FROM {} WHERE {} LIMIT 1",
        table.select_list(),
        table.ident(),
        filter
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params_from_iter(params))?;
    match rows.next()? {
        Some(row) => Ok(Some(row_to_affinity(table, row)?)),
        None => Ok(None),
    }
}

pub(super) fn all_affinities(
    conn: &Connection,
    table: &ResolvedTable,
    user_id: &str,
) -> Result<Vec<AffinityState>> {
    let mut params = Vec::new();
    let filter = where_clause(table, vec![("user_id", text(user_id))], &mut params)?;
    let sql = format!(
        "SELECT {} FROM {} WHERE {} ORDER BY {}",
        table.select_list(),
        table.ident(),
        filter,
        table.required("personality")?
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params_from_iter(params))?;
    let mut states = Vec::new();
    while let Some(row) = rows.next()? {
        states.push(row_to_affinity(table, row)?);
    }
    Ok(states)
}

pub(super) fn reset_affinity(
    conn: &mut Connection,
    schema: &ResolvedSchema,
    user_id: &str,
    personality_name: &str,
) -> Result<bool> {
    let tx = conn.transaction()?;
    let removed = delete_rows(&tx, &schema.affinity, pair(user_id, personality_name))?;
    delete_rows(&tx, &schema.memories, pair(user_id, personality_name))?;
    tx.commit()?;
    Ok(removed > 0)
}

fn row_to_affinity(table: &ResolvedTable, row: &Row) -> Result<AffinityState> {
    let at = |field: &str| table.index_of(field);
    let missing = |field: &str| StorageError::InvalidData(format!("affinity row has NULL {field}"));
    let count = |field: &str| -> Result<u64> {
        Ok(read_i64(row, at(field))?.unwrap_or(0).max(0) as u64)
    };

    let points = read_i64(row, at("points"))?
        .unwrap_or(0)
        .clamp(i64::from(MIN_POINTS), i64::from(MAX_POINTS)) as i32;

    Ok(AffinityState {
        user_id: read_string(row, at("user_id"))?.ok_or_else(|| missing("user_id"))?,
        personality_name: read_string(row, at("personality"))?
            .ok_or_else(|| missing("personality"))?,
        points,
        level: read_string(row, at("level"))?.unwrap_or_default(),
        total_interactions: count("total_interactions")?,
        positive_count: count("positive_count")?,
        negative_count: count("negative_count")?,
        last_interaction_at: read_ts(row, at("last_interaction_at"))?,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Interaction log
// ─────────────────────────────────────────────────────────────────────────────

fn insert_interaction(conn: &Connection, table: &ResolvedTable, record: &InteractionRecord) -> Result<()> {
    let mut row = pair(&record.user_id, &record.personality_name);
    row.extend([
        ("interaction_type", text(record.interaction_type.as_str())),
        ("delta", Value::Integer(i64::from(record.delta))),
        ("points_after", Value::Integer(i64::from(record.points_after))),
        ("level_after", text(record.level_after.as_str())),
        ("recorded_at", text(fmt_ts(&record.recorded_at))),
    ]);
    insert_row(conn, table, row)?;
    Ok(())
}

pub(super) fn recent_interactions(
    conn: &Connection,
    table: &ResolvedTable,
    user_id: &str,
    personality_name: &str,
    limit: usize,
) -> Result<Vec<InteractionRecord>> {
    let mut params = Vec::new();
    let filter = where_clause(table, pair(user_id, personality_name), &mut params)?;
    let sql = format!(
        "SELECT {} FROM {} WHERE {} ORDER BY {} DESC, rowid DESC LIMIT {}",
        table.select_list(),
        table.ident(),
        filter,
        table.required("recorded_at")?,
        limit
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params_from_iter(params))?;
    let mut records = Vec::new();
    while let Some(row) = rows.next()? {
        let at = |field: &str| table.index_of(field);
        let kind = read_string(row, at("interaction_type"))?.unwrap_or_default();
        records.push(InteractionRecord {
            user_id: user_id.to_string(),
            personality_name: personality_name.to_string(),
            interaction_type: kind.parse().unwrap_or(InteractionType::Neutral),
            delta: read_i64(row, at("delta"))?.unwrap_or(0) as i32,
            points_after: read_i64(row, at("points_after"))?.unwrap_or(0) as i32,
            level_after: read_string(row, at("level_after"))?.unwrap_or_default(),
            recorded_at: read_ts(row, at("recorded_at"))?.unwrap_or_else(Utc::now),
        });
    }
    Ok(records)
}

pub(super) fn count_interactions(conn: &Connection, table: &ResolvedTable, user_id: &str) -> Result<usize> {
    super::codec::count_rows(conn, table, vec![("user_id", text(user_id))])
}

// ─────────────────────────────────────────────────────────────────────────────
// Moods
// ─────────────────────────────────────────────────────────────────────────────

pub(super) fn set_mood(conn: &mut Connection, table: &ResolvedTable, mood: &ActiveMood) -> Result<()> {
    let tx = conn.transaction()?;
    let payload: Assignments = vec![
        ("mood", text(mood.mood.as_str())),
        ("set_at", text(fmt_ts(&mood.set_at))),
    ];
    let updated = update_rows(
        &tx,
        table,
        payload.clone(),
        pair(&mood.user_id, &mood.personality_name),
    )?;
    if updated == 0 {
        let mut row = pair(&mood.user_id, &mood.personality_name);
        row.extend(payload);
        insert_row(&tx, table, row)?;
    }
    tx.commit()?;
    debug!(user_id = %mood.user_id, personality = %mood.personality_name, mood = %mood.mood, "Set mood");
    Ok(())
}

pub(super) fn get_mood(
    conn: &Connection,
    table: &ResolvedTable,
    user_id: &str,
    personality_name: &str,
) -> Result<Option<ActiveMood>> {
    let mut params = Vec::new();
    let filter = where_clause(table, pair(user_id, personality_name), &mut params)?;
    let sql = format!(
        "SELECT {} FROM {} WHERE {} LIMIT 1",
        table.select_list(),
        table.ident(),
        filter
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params_from_iter(params))?;
    let Some(row) = rows.next()? else {
        return Ok(None);
    };
    let at = |field: &str| table.index_of(field);
    let Some(mood) = read_string(row, at("mood"))? else {
        return Ok(None);
    };
    Ok(Some(ActiveMood {
        user_id: user_id.to_string(),
        personality_name: personality_name.to_string(),
        mood,
        set_at: read_ts(row, at("set_at"))?.unwrap_or_else(Utc::now),
    }))
}

pub(super) fn clear_mood(
    conn: &Connection,
    table: &ResolvedTable,
    user_id: &str,
    personality_name: &str,
) -> Result<bool> {
    Ok(delete_rows(conn, table, pair(user_id, personality_name))? > 0)
}
