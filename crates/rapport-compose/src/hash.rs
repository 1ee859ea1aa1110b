//! Content hashes used to key the prompt cache.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::Result;
use rapport_types::{LinguisticProfile, Personality};

use std::collections::BTreeMap;

/// SHA-256 over length-prefixed fields, so `("ab", "c")` and `("a", "bc")` differ.
fn digest_fields<'a>(fields: impl IntoIterator<Item = &'a [u8]>) -> String {
    let mut hasher = Sha256::new();
    for field in fields {
        hasher.update((field.len() as u64).to_le_bytes());
        hasher.update(field);
    }
    hex::encode(hasher.finalize())
}

/// Hash of a full personality definition.
pub fn personality_content_hash(personality: &Personality) -> Result<String> {
    let bytes = serde_json::to_vec(personality)?;
    Ok(digest_fields([bytes.as_slice()]))
}

/// The parts of a composed personality that modifiers can change.
#[derive(Serialize)]
struct ModifierView<'a> {
    advanced_parameters: &'a BTreeMap<String, f64>,
    linguistic_profile: &'a LinguisticProfile,
    system_prompt: &'a str,
}

/// Hash of the modifier-affected parts of a composed personality.
pub fn modifiers_hash(composed: &Personality) -> Result<String> {
    let view = ModifierView {
        advanced_parameters: &composed.advanced_parameters,
        linguistic_profile: &composed.linguistic_profile,
        system_prompt: &composed.system_prompt,
    };
    let bytes = serde_json::to_vec(&view)?;
    Ok(digest_fields([bytes.as_slice()]))
}

/// Identity of one compiled prompt.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub personality_hash: String,
    pub provider: String,
    pub max_tokens: u32,
    pub modifiers_hash: String,
}

impl CacheKey {
    /// Key for compiling `composed` (derived from `base`) for a provider.
    pub fn for_composition(
        base: &Personality,
        composed: &Personality,
        provider: impl Into<String>,
        max_tokens: u32,
    ) -> Result<Self> {
        Ok(Self {
            personality_hash: personality_content_hash(base)?,
            provider: provider.into(),
            max_tokens,
            modifiers_hash: modifiers_hash(composed)?,
        })
    }

    /// 64-character hex fingerprint used as the cache key.
    pub fn fingerprint(&self) -> String {
        let max_tokens = self.max_tokens.to_le_bytes();
        digest_fields([
            self.personality_hash.as_bytes(),
            self.provider.as_bytes(),
            max_tokens.as_slice(),
            self.modifiers_hash.as_bytes(),
        ])
    }
}
