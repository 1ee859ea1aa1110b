//! Shared domain types for the Rapport personality state engine.
//!
//! Everything that crosses a crate boundary lives here: stored records
//! ([`Fact`], [`Episode`], [`AffinityState`]), the personality definition
//! consumed by the composer, and the relationship level table that drives
//! the affinity state machine.

pub mod affinity;
pub mod episode;
pub mod error;
pub mod fact;
pub mod personality;

pub use affinity::{ActiveMood, AffinityState, InteractionRecord, InteractionType};
pub use episode::{Episode, EpisodeId, EpisodeType};
pub use error::{Result, ValidationError};
pub use fact::{Fact, identity_of};
pub use personality::{
    LevelTable, LinguisticAdditions, LinguisticProfile, MoodConfig, Personality,
    PersonalityExtensions, PointsRange, RelationshipLevelConfig, MAX_POINTS, MIN_POINTS,
};
