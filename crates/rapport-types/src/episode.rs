//! Episodic memory records.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, ValidationError};

/// Unique identifier for an episode.
pub type EpisodeId = Uuid;

/// Upper bound of an episode's base importance.
pub const MAX_IMPORTANCE: f64 = 10.0;

/// Kind of notable interaction an episode records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeType {
    Conversation,
    Milestone,
    Emotional,
    Conflict,
    Achievement,
    Other,
}

impl EpisodeType {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conversation => "conversation",
            Self::Milestone => "milestone",
            Self::Emotional => "emotional",
            Self::Conflict => "conflict",
            Self::Achievement => "achievement",
            Self::Other => "other",
        }
    }

    /// Parse the storage representation. Unknown values map to `Other`.
    pub fn parse(s: &str) -> Self {
        match s {
            "conversation" => Self::Conversation,
            "milestone" => Self::Milestone,
            "emotional" => Self::Emotional,
            "conflict" => Self::Conflict,
            "achievement" => Self::Achievement,
            _ => Self::Other,
        }
    }
}

/// A notable interaction worth remembering.
///
/// Episodes are append-only: once saved their fields never change. How much
/// an episode matters right now is derived from `base_importance` and its age.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub id: EpisodeId,
    pub user_id: String,
    pub episode_type: EpisodeType,
    pub title: String,
    #[serde(default)]
    pub summary: String,
    pub base_importance: f64,
    #[serde(default)]
    pub sentiment: f64,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
}

impl Episode {
    /// Create a new episode stamped with the current time.
    pub fn new(
        user_id: impl Into<String>,
        episode_type: EpisodeType,
        title: impl Into<String>,
        base_importance: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            episode_type,
            title: title.into(),
            summary: String::new(),
            base_importance,
            sentiment: 0.0,
            tags: BTreeSet::new(),
            created_at: Utc::now(),
        }
    }

    /// Set the summary.
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    /// Set the sentiment (-1.0 to 1.0).
    pub fn with_sentiment(mut self, sentiment: f64) -> Self {
        self.sentiment = sentiment;
        self
    }

    /// Add a tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Override the creation time.
    pub fn at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Check the episode's shape before it is persisted.
    pub fn validate(&self) -> Result<()> {
        if self.user_id.trim().is_empty() {
            return Err(ValidationError::EmptyField("user_id".to_string()));
        }
        if self.title.trim().is_empty() {
            return Err(ValidationError::EmptyField("title".to_string()));
        }
        if !self.base_importance.is_finite()
            || !(0.0..=MAX_IMPORTANCE).contains(&self.base_importance)
        {
            return Err(ValidationError::InvalidImportance(self.base_importance));
        }
        if !self.sentiment.is_finite() || !(-1.0..=1.0).contains(&self.sentiment) {
            return Err(ValidationError::InvalidSentiment(self.sentiment));
        }
        Ok(())
    }

    /// Whether the title, summary or any tag contains `query` (case-insensitive).
    pub fn matches(&self, query: &str) -> bool {
        let needle = query.to_lowercase();
        self.title.to_lowercase().contains(&needle)
            || self.summary.to_lowercase().contains(&needle)
            || self.tags.iter().any(|t| t.to_lowercase().contains(&needle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_episode_type_round_trip() {
        for ty in [
            EpisodeType::Conversation,
            EpisodeType::Milestone,
            EpisodeType::Emotional,
            EpisodeType::Conflict,
            EpisodeType::Achievement,
            EpisodeType::Other,
        ] {
            assert_eq!(EpisodeType::parse(ty.as_str()), ty);
        }
        assert_eq!(EpisodeType::parse("mystery"), EpisodeType::Other);
    }

    #[test]
    fn test_validate_bounds() {
        let ok = Episode::new("u1", EpisodeType::Milestone, "First chat", 7.0);
        assert!(ok.validate().is_ok());

        let too_important = Episode::new("u1", EpisodeType::Milestone, "x", 11.0);
        assert_eq!(
            too_important.validate(),
            Err(ValidationError::InvalidImportance(11.0))
        );

        let blank = Episode::new("u1", EpisodeType::Other, "  ", 1.0);
        assert!(blank.validate().is_err());

        let sour = Episode::new("u1", EpisodeType::Conflict, "Argument", 3.0).with_sentiment(-2.0);
        assert!(matches!(
            sour.validate(),
            Err(ValidationError::InvalidSentiment(_))
        ));
    }

    #[test]
    fn test_matches_is_case_insensitive() {
        let ep = Episode::new("u1", EpisodeType::Achievement, "Won the Tennis final", 8.0)
            .with_summary("User was thrilled")
            .with_tag("sport");
        assert!(ep.matches("tennis"));
        assert!(ep.matches("THRILLED"));
        assert!(ep.matches("spo"));
        assert!(!ep.matches("golf"));
    }
}
