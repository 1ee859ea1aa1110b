//! Personality definitions and their relationship/mood extensions.
//!
//! A [`Personality`] is loaded once from an external definition and never
//! mutated afterwards. Its optional `relationship_levels` and `moods` tables
//! are gathered into [`PersonalityExtensions`], which the composer layers on
//! top of the base traits.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{Result, ValidationError};

/// Lowest affinity score.
pub const MIN_POINTS: i32 = 0;

/// Highest affinity score.
pub const MAX_POINTS: i32 = 100;

// ─────────────────────────────────────────────────────────────────────────────
// Personality
// ─────────────────────────────────────────────────────────────────────────────

/// Tone and phrasing preferences of a personality.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinguisticProfile {
    /// Tone descriptors ("warm", "dry", ...).
    pub tone: Vec<String>,
    /// Signature phrases the personality likes to use.
    pub expressions: Vec<String>,
    /// Optional vocabulary register ("casual", "formal", ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vocabulary: Option<String>,
}

/// A base personality description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Personality {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub traits: Vec<String>,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub linguistic_profile: LinguisticProfile,
    /// Numeric tuning knobs, each in [0.0, 1.0].
    #[serde(default)]
    pub advanced_parameters: BTreeMap<String, f64>,
    #[serde(flatten)]
    pub extensions: PersonalityExtensions,
}

impl Personality {
    /// Create a bare personality with a name and system prompt.
    pub fn new(name: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            system_prompt: system_prompt.into(),
            ..Default::default()
        }
    }

    /// Set an advanced parameter.
    pub fn with_parameter(mut self, name: impl Into<String>, value: f64) -> Self {
        self.advanced_parameters.insert(name.into(), value);
        self
    }

    /// Attach a relationship level table.
    pub fn with_levels(mut self, levels: LevelTable) -> Self {
        self.extensions.hierarchical = Some(levels);
        self
    }

    /// Add a mood.
    pub fn with_mood(mut self, name: impl Into<String>, mood: MoodConfig) -> Self {
        self.extensions
            .moods
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), mood);
        self
    }

    /// The level table this personality uses, or the default table.
    pub fn level_table(&self) -> LevelTable {
        self.extensions.hierarchical.clone().unwrap_or_default()
    }

    /// Look up a mood by name.
    pub fn mood(&self, name: &str) -> Result<&MoodConfig> {
        self.extensions
            .moods
            .as_ref()
            .and_then(|moods| moods.get(name))
            .ok_or_else(|| ValidationError::UnknownMood(name.to_string()))
    }
}

/// Optional extensions a personality definition may carry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersonalityExtensions {
    /// Relationship levels keyed by affinity points.
    #[serde(
        default,
        rename = "relationship_levels",
        skip_serializing_if = "Option::is_none"
    )]
    pub hierarchical: Option<LevelTable>,
    /// Named transient moods.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moods: Option<BTreeMap<String, MoodConfig>>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Modifiers
// ─────────────────────────────────────────────────────────────────────────────

/// Words and phrases appended to a base linguistic profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinguisticAdditions {
    pub tone: Vec<String>,
    pub expressions: Vec<String>,
}

/// Inclusive range of affinity points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointsRange {
    pub min: i32,
    pub max: i32,
}

impl PointsRange {
    pub fn new(min: i32, max: i32) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, points: i32) -> bool {
        (self.min..=self.max).contains(&points)
    }
}

/// A named band of affinity points and the modifiers it applies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipLevelConfig {
    pub name: String,
    pub points_range: PointsRange,
    #[serde(default)]
    pub parameter_deltas: BTreeMap<String, f64>,
    #[serde(default)]
    pub linguistic_additions: LinguisticAdditions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_suffix: Option<String>,
}

impl RelationshipLevelConfig {
    /// A level with no modifiers.
    pub fn new(name: impl Into<String>, min: i32, max: i32) -> Self {
        Self {
            name: name.into(),
            points_range: PointsRange::new(min, max),
            parameter_deltas: BTreeMap::new(),
            linguistic_additions: LinguisticAdditions::default(),
            prompt_prefix: None,
            prompt_suffix: None,
        }
    }

    pub fn with_delta(mut self, param: impl Into<String>, delta: f64) -> Self {
        self.parameter_deltas.insert(param.into(), delta);
        self
    }

    pub fn with_tone(mut self, tone: impl Into<String>) -> Self {
        self.linguistic_additions.tone.push(tone.into());
        self
    }

    pub fn with_expression(mut self, expression: impl Into<String>) -> Self {
        self.linguistic_additions.expressions.push(expression.into());
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prompt_prefix = Some(prefix.into());
        self
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.prompt_suffix = Some(suffix.into());
        self
    }
}

/// A transient mood layered on top of the relationship level.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MoodConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub parameter_deltas: BTreeMap<String, f64>,
    pub linguistic_additions: LinguisticAdditions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_suffix: Option<String>,
}

impl MoodConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delta(mut self, param: impl Into<String>, delta: f64) -> Self {
        self.parameter_deltas.insert(param.into(), delta);
        self
    }

    pub fn with_tone(mut self, tone: impl Into<String>) -> Self {
        self.linguistic_additions.tone.push(tone.into());
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prompt_prefix = Some(prefix.into());
        self
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.prompt_suffix = Some(suffix.into());
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Level Table
// ─────────────────────────────────────────────────────────────────────────────

/// A validated set of relationship levels.
///
/// Levels are kept sorted by their lower bound. Construction guarantees the
/// ranges are non-overlapping and jointly cover 0-100, so [`level_for`] is
/// total.
///
/// [`level_for`]: LevelTable::level_for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    try_from = "Vec<RelationshipLevelConfig>",
    into = "Vec<RelationshipLevelConfig>"
)]
pub struct LevelTable {
    levels: Vec<RelationshipLevelConfig>,
}

impl LevelTable {
    /// Validate and build a level table.
    pub fn new(mut levels: Vec<RelationshipLevelConfig>) -> Result<Self> {
        if levels.is_empty() {
            return Err(ValidationError::EmptyLevelTable);
        }

        let mut names = HashSet::new();
        for level in &levels {
            if !names.insert(level.name.as_str()) {
                return Err(ValidationError::DuplicateLevel(level.name.clone()));
            }
            let PointsRange { min, max } = level.points_range;
            if min > max {
                return Err(ValidationError::InvertedRange {
                    name: level.name.clone(),
                    min,
                    max,
                });
            }
            if min < MIN_POINTS || max > MAX_POINTS {
                return Err(ValidationError::RangeOutOfBounds {
                    name: level.name.clone(),
                    min,
                    max,
                });
            }
        }

        levels.sort_by_key(|l| l.points_range.min);

        let first = levels[0].points_range.min;
        if first > MIN_POINTS {
            return Err(ValidationError::UncoveredPoints {
                from: MIN_POINTS,
                to: first - 1,
            });
        }
        for pair in levels.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            if next.points_range.min <= prev.points_range.max {
                return Err(ValidationError::OverlappingLevels {
                    first: prev.name.clone(),
                    second: next.name.clone(),
                });
            }
            if next.points_range.min > prev.points_range.max + 1 {
                return Err(ValidationError::UncoveredPoints {
                    from: prev.points_range.max + 1,
                    to: next.points_range.min - 1,
                });
            }
        }
        let last = levels[levels.len() - 1].points_range.max;
        if last < MAX_POINTS {
            return Err(ValidationError::UncoveredPoints {
                from: last + 1,
                to: MAX_POINTS,
            });
        }

        Ok(Self { levels })
    }

    /// The level whose range contains `points` (clamped to 0-100 first).
    pub fn level_for(&self, points: i32) -> &RelationshipLevelConfig {
        let points = points.clamp(MIN_POINTS, MAX_POINTS);
        // Validated coverage means the partition point is always in range.
        let idx = self
            .levels
            .partition_point(|l| l.points_range.max < points)
            .min(self.levels.len() - 1);
        &self.levels[idx]
    }

    /// The level starting at 0 points.
    pub fn lowest(&self) -> &RelationshipLevelConfig {
        &self.levels[0]
    }

    /// Look up a level by name.
    pub fn get(&self, name: &str) -> Option<&RelationshipLevelConfig> {
        self.levels.iter().find(|l| l.name == name)
    }

    /// Levels in ascending order of points.
    pub fn iter(&self) -> impl Iterator<Item = &RelationshipLevelConfig> {
        self.levels.iter()
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

impl Default for LevelTable {
    fn default() -> Self {
        Self {
            levels: vec![
                RelationshipLevelConfig::new("stranger", 0, 20),
                RelationshipLevelConfig::new("acquaintance", 21, 40),
                RelationshipLevelConfig::new("friend", 41, 60),
                RelationshipLevelConfig::new("close_friend", 61, 80),
                RelationshipLevelConfig::new("confidant", 81, 100),
            ],
        }
    }
}

impl TryFrom<Vec<RelationshipLevelConfig>> for LevelTable {
    type Error = ValidationError;

    fn try_from(levels: Vec<RelationshipLevelConfig>) -> Result<Self> {
        Self::new(levels)
    }
}

impl From<LevelTable> for Vec<RelationshipLevelConfig> {
    fn from(table: LevelTable) -> Self {
        table.levels
    }
}
