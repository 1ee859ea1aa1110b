//! One-time schema resolution for externally owned SQLite databases.
//!
//! Each logical collection has an ordered list of candidate table names and,
//! for every logical field, an ordered list of candidate column names. At
//! open time the adapter probes the database once, picks the first match for
//! each, optionally creates missing tables, and freezes the result into a
//! [`ResolvedSchema`]. Every query afterwards is built from that descriptor.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::{Result, StorageError};

/// Logical collections the engine persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Facts,
    Episodes,
    Affinity,
    Moods,
    Memories,
}

impl Collection {
    pub const ALL: [Collection; 5] = [
        Collection::Facts,
        Collection::Affinity,
        Collection::Episodes,
        Collection::Moods,
        Collection::Memories,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Facts => "facts",
            Self::Episodes => "episodes",
            Self::Affinity => "affinity",
            Self::Moods => "moods",
            Self::Memories => "memories",
        }
    }

    /// Candidate table names, most preferred first. The first entry is used
    /// when creating a missing table.
    pub fn table_candidates(&self) -> &'static [&'static str] {
        match self {
            Self::Facts => &["user_facts", "facts", "memory_facts", "knowledge"],
            Self::Affinity => &["affinity", "user_affinity", "relationships", "affinity_states"],
            Self::Episodes => &["episodes", "episodic_memories", "user_episodes", "events"],
            Self::Moods => &["moods", "mood_states", "user_moods"],
            Self::Memories => &["memories", "interactions", "interaction_log"],
        }
    }

    /// Logical fields stored by this collection.
    pub fn fields(&self) -> &'static [FieldSpec] {
        match self {
            Self::Facts => FACT_FIELDS,
            Self::Episodes => EPISODE_FIELDS,
            Self::Affinity => AFFINITY_FIELDS,
            Self::Moods => MOOD_FIELDS,
            Self::Memories => MEMORY_FIELDS,
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A logical field and the physical column names it may appear under.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    /// Logical name used by the query builders.
    pub name: &'static str,
    /// Candidate column names; the first is used when creating tables.
    pub aliases: &'static [&'static str],
    /// SQL type for auto-created tables.
    pub sql_type: &'static str,
    /// Whether the adapter cannot work without this column.
    pub required: bool,
}

const fn field(
    name: &'static str,
    aliases: &'static [&'static str],
    sql_type: &'static str,
    required: bool,
) -> FieldSpec {
    FieldSpec {
        name,
        aliases,
        sql_type,
        required,
    }
}

const USER_ID: &[&str] = &["user_id", "userId", "uid", "user"];
const PERSONALITY: &[&str] = &["personality_name", "personality", "persona", "bot_name"];
const TAGS: &[&str] = &["tags", "labels"];

pub(crate) const FACT_FIELDS: &[FieldSpec] = &[
    field("user_id", USER_ID, "TEXT NOT NULL", true),
    field("category", &["category", "cat", "fact_type", "type"], "TEXT NOT NULL", true),
    field("key", &["key", "fact_key", "attribute", "name"], "TEXT NOT NULL", true),
    field("value", &["value", "fact_value", "val", "content"], "TEXT NOT NULL", true),
    field("confidence", &["confidence", "conf", "score"], "REAL NOT NULL DEFAULT 0.5", false),
    field("tags", TAGS, "TEXT NOT NULL DEFAULT '[]'", false),
    field("sources", &["sources", "source"], "TEXT NOT NULL DEFAULT ''", false),
    field("created_at", &["created_at", "createdAt", "created"], "TEXT", false),
    field(
        "updated_at",
        &["updated_at", "updatedAt", "modified_at", "timestamp"],
        "TEXT",
        false,
    ),
];

pub(crate) const EPISODE_FIELDS: &[FieldSpec] = &[
    field("id", &["id", "episode_id", "uuid"], "TEXT PRIMARY KEY", true),
    field("user_id", USER_ID, "TEXT NOT NULL", true),
    field("episode_type", &["episode_type", "type", "kind"], "TEXT NOT NULL DEFAULT 'other'", false),
    field("title", &["title", "name", "headline"], "TEXT NOT NULL", true),
    field("summary", &["summary", "description", "content"], "TEXT NOT NULL DEFAULT ''", false),
    field(
        "importance",
        &["base_importance", "importance", "weight"],
        "REAL NOT NULL",
        true,
    ),
    field("sentiment", &["sentiment", "valence"], "REAL NOT NULL DEFAULT 0", false),
    field("tags", TAGS, "TEXT NOT NULL DEFAULT '[]'", false),
    field(
        "created_at",
        &["created_at", "createdAt", "occurred_at", "timestamp"],
        "TEXT NOT NULL",
        true,
    ),
];

pub(crate) const AFFINITY_FIELDS: &[FieldSpec] = &[
    field("user_id", USER_ID, "TEXT NOT NULL", true),
    field("personality", PERSONALITY, "TEXT NOT NULL", true),
    field(
        "points",
        &["points", "affinity_points", "affinity", "score"],
        "INTEGER NOT NULL DEFAULT 0",
        true,
    ),
    field("level", &["level", "relationship_level", "stage"], "TEXT", false),
    field(
        "total_interactions",
        &["total_interactions", "interaction_count", "interactions"],
        "INTEGER NOT NULL DEFAULT 0",
        false,
    ),
    field(
        "positive_count",
        &["positive_count", "positive_interactions"],
        "INTEGER NOT NULL DEFAULT 0",
        false,
    ),
    field(
        "negative_count",
        &["negative_count", "negative_interactions"],
        "INTEGER NOT NULL DEFAULT 0",
        false,
    ),
    field(
        "last_interaction_at",
        &["last_interaction_at", "last_interaction", "updated_at"],
        "TEXT",
        false,
    ),
];

pub(crate) const MOOD_FIELDS: &[FieldSpec] = &[
    field("user_id", USER_ID, "TEXT NOT NULL", true),
    field("personality", PERSONALITY, "TEXT NOT NULL", true),
    field("mood", &["mood", "mood_name", "current_mood", "state"], "TEXT NOT NULL", true),
    field("set_at", &["set_at", "updated_at", "created_at"], "TEXT", false),
];

pub(crate) const MEMORY_FIELDS: &[FieldSpec] = &[
    field("user_id", USER_ID, "TEXT NOT NULL", true),
    field("personality", PERSONALITY, "TEXT NOT NULL", true),
    field(
        "interaction_type",
        &["interaction_type", "kind", "type"],
        "TEXT NOT NULL",
        true,
    ),
    field("delta", &["delta", "points_delta", "change"], "INTEGER NOT NULL DEFAULT 0", false),
    field("points_after", &["points_after", "points"], "INTEGER", false),
    field("level_after", &["level_after", "level"], "TEXT", false),
    field(
        "recorded_at",
        &["recorded_at", "created_at", "timestamp"],
        "TEXT NOT NULL",
        true,
    ),
];

/// Physical layout of one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTable {
    pub collection: Collection,
    /// Physical table name.
    pub name: String,
    /// Logical field name → physical column name, for columns that exist.
    pub columns: BTreeMap<&'static str, String>,
    /// Whether the table was created during resolution.
    pub created: bool,
}

impl ResolvedTable {
    /// Quoted table name for use in SQL.
    pub fn ident(&self) -> String {
        quote_ident(&self.name)
    }

    /// Physical column for a logical field, if the table has one.
    pub fn column(&self, field: &str) -> Option<&str> {
        self.columns.get(field).map(String::as_str)
    }

    /// Quoted physical column for a field that resolution guaranteed.
    pub fn required(&self, field: &str) -> Result<String> {
        self.column(field).map(quote_ident).ok_or_else(|| {
            StorageError::Schema(format!(
                "{} table '{}' has no column for '{}'",
                self.collection, self.name, field
            ))
            .into()
        })
    }

    pub fn has(&self, field: &str) -> bool {
        self.columns.contains_key(field)
    }

    /// `SELECT` list covering every logical field in declaration order, with
    /// `NULL` standing in for absent columns so row indices stay stable.
    pub fn select_list(&self) -> String {
        self.collection
            .fields()
            .iter()
            .map(|f| {
                self.column(f.name)
                    .map(quote_ident)
                    .unwrap_or_else(|| "NULL".to_string())
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Row index of a logical field in [`select_list`](Self::select_list).
    pub fn index_of(&self, field: &str) -> usize {
        self.collection
            .fields()
            .iter()
            .position(|f| f.name == field)
            .unwrap_or(usize::MAX)
    }
}

/// Resolved layout of every collection. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSchema {
    pub facts: ResolvedTable,
    pub episodes: ResolvedTable,
    pub affinity: ResolvedTable,
    pub moods: ResolvedTable,
    pub memories: ResolvedTable,
}

impl ResolvedSchema {
    /// Probe the database and resolve every collection.
    ///
    /// Missing tables are created when `auto_create` is set; otherwise they
    /// are a [`StorageError::Schema`]. Tables that exist but lack a required
    /// column are always a schema error.
    pub fn resolve(conn: &Connection, auto_create: bool) -> Result<Self> {
        let existing = existing_tables(conn)?;
        let resolve = |collection| resolve_table(conn, &existing, collection, auto_create);

        let schema = Self {
            facts: resolve(Collection::Facts)?,
            affinity: resolve(Collection::Affinity)?,
            episodes: resolve(Collection::Episodes)?,
            moods: resolve(Collection::Moods)?,
            memories: resolve(Collection::Memories)?,
        };

        info!(
            facts = %schema.facts.name,
            affinity = %schema.affinity.name,
            episodes = %schema.episodes.name,
            moods = %schema.moods.name,
            memories = %schema.memories.name,
            "Resolved storage schema"
        );
        Ok(schema)
    }

    pub fn table(&self, collection: Collection) -> &ResolvedTable {
        match collection {
            Collection::Facts => &self.facts,
            Collection::Episodes => &self.episodes,
            Collection::Affinity => &self.affinity,
            Collection::Moods => &self.moods,
            Collection::Memories => &self.memories,
        }
    }
}

/// Quote an identifier for SQLite.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn existing_tables(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT name FROM sqlite_master WHERE type IN ('table', 'view') ORDER BY name")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(names)
}

fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(names)
}

fn resolve_table(
    conn: &Connection,
    existing: &[String],
    collection: Collection,
    auto_create: bool,
) -> Result<ResolvedTable> {
    let found = collection.table_candidates().iter().find_map(|candidate| {
        existing
            .iter()
            .find(|name| name.eq_ignore_ascii_case(candidate))
            .cloned()
    });

    match found {
        Some(name) => {
            let physical = table_columns(conn, &name)?;
            let columns = map_columns(collection, &name, &physical)?;
            debug!(%collection, table = %name, ?columns, "Found existing table");
            Ok(ResolvedTable {
                collection,
                name,
                columns,
                created: false,
            })
        }
        None if auto_create => create_table(conn, collection),
        None => Err(StorageError::Schema(format!(
            "no {} table found (tried {}) and auto-create is disabled",
            collection,
            collection.table_candidates().join(", ")
        ))
        .into()),
    }
}

/// Map logical fields onto the columns a table actually has.
///
/// Each physical column is claimed by at most one field, in field order, so a
/// column listed as an alias for two fields (e.g. `type`) goes to the first.
fn map_columns(
    collection: Collection,
    table: &str,
    physical: &[String],
) -> Result<BTreeMap<&'static str, String>> {
    let mut claimed: HashSet<&str> = HashSet::new();
    let mut columns = BTreeMap::new();

    for spec in collection.fields() {
        let hit = spec.aliases.iter().find_map(|alias| {
            physical
                .iter()
                .find(|col| col.eq_ignore_ascii_case(alias) && !claimed.contains(col.as_str()))
        });
        match hit {
            Some(col) => {
                claimed.insert(col.as_str());
                columns.insert(spec.name, col.clone());
            }
            None if spec.required => {
                return Err(StorageError::Schema(format!(
                    "{} table '{}' has no column for '{}' (tried {})",
                    collection,
                    table,
                    spec.name,
                    spec.aliases.join(", ")
                ))
                .into());
            }
            None => {}
        }
    }
    Ok(columns)
}

fn create_table(conn: &Connection, collection: Collection) -> Result<ResolvedTable> {
    let name = collection.table_candidates()[0];
    let column_defs = collection
        .fields()
        .iter()
        .map(|f| format!("{} {}", quote_ident(f.aliases[0]), f.sql_type))
        .collect::<Vec<_>>()
        .join(",\n    ");

    let index = match collection {
        Collection::Facts => Some("user_id, category, key"),
        Collection::Episodes => Some("user_id, created_at"),
        Collection::Affinity => Some("user_id, personality_name"),
        Collection::Moods => Some("user_id, personality_name"),
        Collection::Memories => Some("user_id, personality_name, recorded_at"),
    };

    let mut ddl = format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n);",
        quote_ident(name),
        column_defs
    );
    if let Some(cols) = index {
        ddl.push_str(&format!(
            "\nCREATE INDEX IF NOT EXISTS {} ON {}({});",
            quote_ident(&format!("idx_{name}_lookup")),
            quote_ident(name),
            cols
        ));
    }
    conn.execute_batch(&ddl)?;
    info!(%collection, table = name, "Created missing table");

    let columns = collection
        .fields()
        .iter()
        .map(|f| (f.name, f.aliases[0].to_string()))
        .collect();

    Ok(ResolvedTable {
        collection,
        name: name.to_string(),
        columns,
        created: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_create_uses_first_candidates() {
        let conn = Connection::open_in_memory().unwrap();
        let schema = ResolvedSchema::resolve(&conn, true).unwrap();

        assert_eq!(schema.facts.name, "user_facts");
        assert_eq!(schema.affinity.name, "affinity");
        assert!(schema.facts.created);
        assert_eq!(schema.facts.column("user_id"), Some("user_id"));
        assert_eq!(schema.episodes.column("importance"), Some("base_importance"));

        // Second resolution finds what the first created.
        let again = ResolvedSchema::resolve(&conn, true).unwrap();
        assert!(!again.facts.created);
        assert_eq!(again.facts.columns, schema.facts.columns);
    }

    #[test]
    fn test_missing_table_without_auto_create() {
        let conn = Connection::open_in_memory().unwrap();
        let err = ResolvedSchema::resolve(&conn, false).unwrap_err();
        assert!(err.to_string().contains("auto-create is disabled"));
    }

    #[test]
    fn test_existing_table_with_alternate_names() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE knowledge (uid TEXT, cat TEXT, attribute TEXT, content TEXT, score REAL);
            CREATE TABLE relationships (userId TEXT, persona TEXT, affinity INTEGER, stage TEXT);
            "#,
        )
        .unwrap();

        let schema = ResolvedSchema::resolve(&conn, true).unwrap();
        assert_eq!(schema.facts.name, "knowledge");
        assert_eq!(schema.facts.column("user_id"), Some("uid"));
        assert_eq!(schema.facts.column("key"), Some("attribute"));
        assert_eq!(schema.facts.column("value"), Some("content"));
        assert_eq!(schema.facts.column("confidence"), Some("score"));
        assert!(!schema.facts.has("tags"));

        assert_eq!(schema.affinity.name, "relationships");
        assert_eq!(schema.affinity.column("points"), Some("affinity"));
        assert_eq!(schema.affinity.column("level"), Some("stage"));

        let select = schema.facts.select_list();
        assert!(select.starts_with("\"uid\", \"cat\", \"attribute\", \"content\", \"score\", NULL"));
    }

    #[test]
    fn test_preferred_candidate_wins() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE facts (user_id TEXT, category TEXT, key TEXT, value TEXT);
            CREATE TABLE user_facts (user_id TEXT, category TEXT, key TEXT, value TEXT);
            "#,
        )
        .unwrap();
        let schema = ResolvedSchema::resolve(&conn, true).unwrap();
        assert_eq!(schema.facts.name, "user_facts");
    }

    #[test]
    fn test_missing_required_column_is_schema_error() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE user_facts (user_id TEXT, category TEXT, value TEXT);")
            .unwrap();
        let err = ResolvedSchema::resolve(&conn, true).unwrap_err();
        assert!(err.to_string().contains("'key'"));
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("facts"), "\"facts\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
