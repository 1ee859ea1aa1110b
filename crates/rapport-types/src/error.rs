//! Validation errors raised before any record is persisted.

use thiserror::Error;

/// Result type alias for validation checks.
pub type Result<T> = std::result::Result<T, ValidationError>;

/// A record or definition was rejected because of its shape.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// A relationship level table has no entries.
    #[error("relationship level table is empty")]
    EmptyLevelTable,

    /// Two levels share a name.
    #[error("duplicate relationship level '{0}'")]
    DuplicateLevel(String),

    /// A level's minimum is above its maximum.
    #[error("level '{name}' has inverted range {min}-{max}")]
    InvertedRange { name: String, min: i32, max: i32 },

    /// A level extends below 0 or above 100.
    #[error("level '{name}' range {min}-{max} falls outside 0-100")]
    RangeOutOfBounds { name: String, min: i32, max: i32 },

    /// Two level ranges share at least one point value.
    #[error("levels '{first}' and '{second}' overlap")]
    OverlappingLevels { first: String, second: String },

    /// Some point values are not covered by any level.
    #[error("points {from}-{to} are not covered by any relationship level")]
    UncoveredPoints { from: i32, to: i32 },

    /// A required field is absent.
    #[error("missing required field '{0}'")]
    MissingField(String),

    /// A required field is present but blank.
    #[error("field '{0}' must not be empty")]
    EmptyField(String),

    /// Confidence outside [0.0, 1.0] or not finite.
    #[error("confidence {0} is out of range [0.0, 1.0]")]
    InvalidConfidence(f64),

    /// Importance outside [0.0, 10.0] or not finite.
    #[error("importance {0} is out of range [0.0, 10.0]")]
    InvalidImportance(f64),

    /// Sentiment outside [-1.0, 1.0] or not finite.
    #[error("sentiment {0} is out of range [-1.0, 1.0]")]
    InvalidSentiment(f64),

    /// A raw fact was not a JSON object.
    #[error("expected a JSON object, got {0}")]
    NotAnObject(String),

    /// A field had the wrong JSON type.
    #[error("field '{field}' has invalid value: {reason}")]
    InvalidField { field: String, reason: String },

    /// A mood name was not defined by the personality.
    #[error("unknown mood '{0}'")]
    UnknownMood(String),

    /// An interaction type string was not recognized.
    #[error("unknown interaction type '{0}'")]
    UnknownInteraction(String),
}
