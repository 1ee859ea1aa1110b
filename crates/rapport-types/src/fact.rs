//! User facts produced by external extraction.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, ValidationError};

/// Alternate spellings accepted for each canonical fact field, canonical first.
const USER_ID_ALIASES: &[&str] = &["user_id", "user", "userId", "uid"];
const CATEGORY_ALIASES: &[&str] = &["category", "cat", "type"];
const KEY_ALIASES: &[&str] = &["key", "k", "name", "attribute"];
const VALUE_ALIASES: &[&str] = &["value", "v", "val"];
const CONFIDENCE_ALIASES: &[&str] = &["confidence", "conf", "score"];
const TAGS_ALIASES: &[&str] = &["tags", "tag"];
const SOURCES_ALIASES: &[&str] = &["sources", "source"];
const CREATED_AT_ALIASES: &[&str] = &["created_at", "createdAt"];
const UPDATED_AT_ALIASES: &[&str] = &["updated_at", "updatedAt", "timestamp"];

/// Default confidence for facts that do not state one.
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

/// A single structured fact about a user.
///
/// The identity of a fact is the `(user_id, category, key)` triple; every other
/// field is payload that gets merged when two facts share an identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub user_id: String,
    pub category: String,
    pub key: String,
    #[serde(default)]
    pub value: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub sources: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_confidence() -> f64 {
    DEFAULT_CONFIDENCE
}

impl Fact {
    /// Create a fact stamped with the current time.
    pub fn new(
        user_id: impl Into<String>,
        category: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.into(),
            category: category.into(),
            key: key.into(),
            value: value.into(),
            confidence: DEFAULT_CONFIDENCE,
            tags: BTreeSet::new(),
            sources: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the confidence score.
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    /// Add a tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Add a source reference.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.sources.insert(source.into());
        self
    }

    /// Override both timestamps.
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.created_at = timestamp;
        self.updated_at = timestamp;
        self
    }

    /// Whether this is the empty record produced by merging nothing.
    pub fn is_empty(&self) -> bool {
        self.user_id.is_empty() && self.category.is_empty() && self.key.is_empty()
    }

    /// Check the fact's shape before it is persisted.
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("user_id", &self.user_id),
            ("category", &self.category),
            ("key", &self.key),
        ] {
            if value.trim().is_empty() {
                return Err(ValidationError::EmptyField(field.to_string()));
            }
        }
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(ValidationError::InvalidConfidence(self.confidence));
        }
        Ok(())
    }

    /// Build a fact from a loosely-shaped JSON object.
    ///
    /// Abbreviated field names (`user`, `uid`, `cat`, `k`, `conf`, ...) are
    /// normalized to their canonical form. `tags` and `sources` accept either a
    /// list or a comma-separated string. Missing timestamps default to now.
    pub fn from_value(raw: &Value) -> Result<Self> {
        let obj = raw
            .as_object()
            .ok_or_else(|| ValidationError::NotAnObject(json_kind(raw).to_string()))?;

        let lookup = |aliases: &[&str]| aliases.iter().find_map(|name| obj.get(*name));

        let user_id = required_string(lookup(USER_ID_ALIASES), USER_ID_ALIASES[0])?;
        let category = required_string(lookup(CATEGORY_ALIASES), CATEGORY_ALIASES[0])?;
        let key = required_string(lookup(KEY_ALIASES), KEY_ALIASES[0])?;

        let value = match lookup(VALUE_ALIASES) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        };

        let confidence = match lookup(CONFIDENCE_ALIASES) {
            None | Some(Value::Null) => DEFAULT_CONFIDENCE,
            Some(v) => v.as_f64().ok_or_else(|| ValidationError::InvalidField {
                field: "confidence".to_string(),
                reason: format!("expected a number, got {}", json_kind(v)),
            })?,
        };

        let now = Utc::now();
        let created_at = timestamp(lookup(CREATED_AT_ALIASES), "created_at")?;
        let updated_at = timestamp(lookup(UPDATED_AT_ALIASES), "updated_at")?;
        let updated_at = updated_at.or(created_at).unwrap_or(now);

        Ok(Self {
            user_id,
            category,
            key,
            value,
            confidence,
            tags: string_set(lookup(TAGS_ALIASES)),
            sources: string_set(lookup(SOURCES_ALIASES)),
            created_at: created_at.unwrap_or(updated_at),
            updated_at,
        })
    }

    /// Sources joined into the single-column storage form.
    pub fn joined_sources(&self) -> String {
        self.sources.iter().cloned().collect::<Vec<_>>().join(",")
    }

    /// Parse the single-column storage form of sources.
    pub fn split_sources(joined: &str) -> BTreeSet<String> {
        joined
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Extract the canonical identity triple from a raw JSON fact without
/// validating the rest of it.
pub fn identity_of(raw: &Value) -> Option<(String, String, String)> {
    let obj = raw.as_object()?;
    let pick = |aliases: &[&str]| {
        aliases
            .iter()
            .find_map(|name| obj.get(*name).and_then(Value::as_str))
            .map(str::to_string)
    };
    Some((
        pick(USER_ID_ALIASES)?,
        pick(CATEGORY_ALIASES)?,
        pick(KEY_ALIASES)?,
    ))
}

fn required_string(value: Option<&Value>, field: &str) -> Result<String> {
    match value {
        None | Some(Value::Null) => Err(ValidationError::MissingField(field.to_string())),
        Some(Value::String(s)) if s.trim().is_empty() => {
            Err(ValidationError::EmptyField(field.to_string()))
        }
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(ValidationError::InvalidField {
            field: field.to_string(),
            reason: format!("expected a string, got {}", json_kind(other)),
        }),
    }
}

fn timestamp(value: Option<&Value>, field: &str) -> Result<Option<DateTime<Utc>>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(s)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|e| ValidationError::InvalidField {
                field: field.to_string(),
                reason: e.to_string(),
            }),
        Some(other) => Err(ValidationError::InvalidField {
            field: field.to_string(),
            reason: format!("expected an RFC 3339 string, got {}", json_kind(other)),
        }),
    }
}

fn string_set(value: Option<&Value>) -> BTreeSet<String> {
    match value {
        Some(Value::String(s)) => Fact::split_sources(s),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => BTreeSet::new(),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
