//! Loading personality definitions from disk.

use std::path::Path;

use rapport_types::Personality;

use crate::error::{RapportError, Result};

/// Read a personality from a `.json` or `.toml` file.
///
/// Any other extension is parsed as JSON. Embedded relationship level tables
/// are validated while parsing.
pub fn load_personality(path: &Path) -> Result<Personality> {
    let fail = |reason: String| RapportError::PersonalityFile {
        path: path.to_path_buf(),
        reason,
    };

    let contents = std::fs::read_to_string(path).map_err(|e| fail(e.to_string()))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

    let personality: Personality = if is_toml {
        toml::from_str(&contents).map_err(|e| fail(e.to_string()))?
    } else {
        serde_json::from_str(&contents).map_err(|e| fail(e.to_string()))?
    };
    Ok(personality)
}
