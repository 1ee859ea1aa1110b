//! Relationship state between a user and a personality.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::personality::{LevelTable, MAX_POINTS, MIN_POINTS};

/// How an interaction felt, as classified by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionType {
    VeryPositive,
    Positive,
    Neutral,
    Negative,
    VeryNegative,
}

impl InteractionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VeryPositive => "very_positive",
            Self::Positive => "positive",
            Self::Neutral => "neutral",
            Self::Negative => "negative",
            Self::VeryNegative => "very_negative",
        }
    }

    pub fn is_positive(&self) -> bool {
        matches!(self, Self::VeryPositive | Self::Positive)
    }
}

impl fmt::Display for InteractionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InteractionType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "very_positive" => Ok(Self::VeryPositive),
            "positive" => Ok(Self::Positive),
            "neutral" => Ok(Self::Neutral),
            "negative" => Ok(Self::Negative),
            "very_negative" => Ok(Self::VeryNegative),
            other => Err(ValidationError::UnknownInteraction(other.to_string())),
        }
    }
}

/// Affinity between one user and one personality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffinityState {
    pub user_id: String,
    pub personality_name: String,
    /// Always within 0-100.
    pub points: i32,
    /// Name of the level whose range contains `points`.
    pub level: String,
    pub total_interactions: u64,
    pub positive_count: u64,
    pub negative_count: u64,
    pub last_interaction_at: Option<DateTime<Utc>>,
}

impl AffinityState {
    /// The zero state for a pair that has never interacted.
    pub fn initial(
        user_id: impl Into<String>,
        personality_name: impl Into<String>,
        levels: &LevelTable,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            personality_name: personality_name.into(),
            points: MIN_POINTS,
            level: levels.lowest().name.clone(),
            total_interactions: 0,
            positive_count: 0,
            negative_count: 0,
            last_interaction_at: None,
        }
    }

    /// Apply a points delta, keeping points within bounds and the level in
    /// sync with the table.
    ///
    /// Counters follow the sign of the requested delta, so a positive
    /// interaction at the ceiling still counts as positive.
    pub fn apply(&mut self, delta: i32, levels: &LevelTable, at: DateTime<Utc>) {
        self.points = self
            .points
            .saturating_add(delta)
            .clamp(MIN_POINTS, MAX_POINTS);
        self.level = levels.level_for(self.points).name.clone();
        self.total_interactions += 1;
        if delta > 0 {
            self.positive_count += 1;
        } else if delta < 0 {
            self.negative_count += 1;
        }
        self.last_interaction_at = Some(at);
    }
}

/// The mood currently active for a user/personality pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveMood {
    pub user_id: String,
    pub personality_name: String,
    pub mood: String,
    pub set_at: DateTime<Utc>,
}

impl ActiveMood {
    pub fn new(
        user_id: impl Into<String>,
        personality_name: impl Into<String>,
        mood: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            personality_name: personality_name.into(),
            mood: mood.into(),
            set_at: Utc::now(),
        }
    }
}

/// One entry of the interaction log kept alongside affinity state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub user_id: String,
    pub personality_name: String,
    pub interaction_type: InteractionType,
    pub delta: i32,
    pub points_after: i32,
    pub level_after: String,
    pub recorded_at: DateTime<Utc>,
}

impl InteractionRecord {
    /// Record the interaction that produced `state`.
    pub fn from_state(state: &AffinityState, interaction_type: InteractionType, delta: i32) -> Self {
        Self {
            user_id: state.user_id.clone(),
            personality_name: state.personality_name.clone(),
            interaction_type,
            delta,
            points_after: state.points,
            level_after: state.level.clone(),
            recorded_at: state.last_interaction_at.unwrap_or_else(Utc::now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let state = AffinityState::initial("u1", "aria", &LevelTable::default());
        assert_eq!(state.points, 0);
        assert_eq!(state.level, "stranger");
        assert_eq!(state.total_interactions, 0);
        assert!(state.last_interaction_at.is_none());
    }

    #[test]
    fn test_apply_clamps_and_counts() {
        let levels = LevelTable::default();
        let mut state = AffinityState::initial("u1", "aria", &levels);

        state.apply(-10, &levels, Utc::now());
        assert_eq!(state.points, 0);
        assert_eq!(state.negative_count, 1);

        for _ in 0..15 {
            state.apply(10, &levels, Utc::now());
        }
        assert_eq!(state.points, 100);
        assert_eq!(state.level, "confidant");
        assert_eq!(state.positive_count, 15);
        assert_eq!(state.total_interactions, 16);

        state.apply(0, &levels, Utc::now());
        assert_eq!(state.total_interactions, 17);
        assert_eq!(state.positive_count + state.negative_count, 16);
    }

    #[test]
    fn test_interaction_type_parse() {
        assert_eq!(
            "very_negative".parse::<InteractionType>().unwrap(),
            InteractionType::VeryNegative
        );
        assert!("meh".parse::<InteractionType>().is_err());
        assert_eq!(InteractionType::Positive.to_string(), "positive");
    }
}
