//! Layering relationship-level and mood modifiers onto a base personality.
//!
//! Composition is a pure function of its inputs. Every map involved is
//! ordered, so identical inputs produce byte-identical output, which is what
//! lets the composed result key the prompt cache.

use std::collections::HashSet;

use rapport_types::{
    AffinityState, LinguisticAdditions, MoodConfig, Personality, RelationshipLevelConfig,
};

use crate::error::Result;

/// Append `additions` in order, then drop repeats keeping the first occurrence.
fn append_unique<'a>(base: &'a [String], additions: impl IntoIterator<Item = &'a Vec<String>>) -> Vec<String> {
    let mut seen = HashSet::new();
    base.iter()
        .chain(additions.into_iter().flatten())
        .filter(|item| seen.insert(item.as_str()))
        .cloned()
        .collect()
}

fn affix(text: Option<&Option<String>>) -> &str {
    text.and_then(Option::as_deref).unwrap_or("")
}

/// Compose the effective personality for one moment of a relationship.
///
/// - advanced parameters: `clamp(base + level delta + mood delta, 0, 1)`; a
///   delta for a parameter the base lacks applies to 0.0; non-finite deltas
///   are ignored and a NaN result becomes 0.0
/// - tone and expressions: base, then level, then mood additions, de-duplicated
/// - system prompt: `level prefix + mood prefix + base + mood suffix + level suffix`
pub fn compose(
    base: &Personality,
    level: Option<&RelationshipLevelConfig>,
    mood: Option<&MoodConfig>,
) -> Personality {
    let mut composed = base.clone();

    let deltas = level
        .map(|l| &l.parameter_deltas)
        .into_iter()
        .chain(mood.map(|m| &m.parameter_deltas));
    for map in deltas {
        for (param, delta) in map.iter().filter(|(_, d)| d.is_finite()) {
            *composed.advanced_parameters.entry(param.clone()).or_insert(0.0) += delta;
        }
    }
    for value in composed.advanced_parameters.values_mut() {
        *value = if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) };
    }

    let additions: Vec<&LinguisticAdditions> = level
        .map(|l| &l.linguistic_additions)
        .into_iter()
        .chain(mood.map(|m| &m.linguistic_additions))
        .collect();
    composed.linguistic_profile.tone = append_unique(
        &base.linguistic_profile.tone,
        additions.iter().map(|a| &a.tone),
    );
    composed.linguistic_profile.expressions = append_unique(
        &base.linguistic_profile.expressions,
        additions.iter().map(|a| &a.expressions),
    );

    composed.system_prompt = [
        affix(level.map(|l| &l.prompt_prefix)),
        affix(mood.map(|m| &m.prompt_prefix)),
        base.system_prompt.as_str(),
        affix(mood.map(|m| &m.prompt_suffix)),
        affix(level.map(|l| &l.prompt_suffix)),
    ]
    .concat();

    composed
}

/// Compose for a stored affinity state and an optional active mood name.
///
/// The level comes from the personality's own table (or the default table)
/// at the state's points. An unknown mood name is a validation error.
pub fn compose_for_state(
    base: &Personality,
    state: &AffinityState,
    mood: Option<&str>,
) -> Result<Personality> {
    let levels = base.level_table();
    let level = levels.level_for(state.points);
    let mood = mood.map(|name| base.mood(name)).transpose()?;
    Ok(compose(base, Some(level), mood))
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn params() -> impl Strategy<Value = Vec<(String, f64)>> {
        prop::collection::vec(("[a-c]", -2.0f64..2.0), 0..4)
    }

    proptest! {
        /// Property: identical inputs give byte-identical output and every
        /// composed parameter lies in [0, 1].
        #[test]
        fn compose_is_deterministic_and_bounded(
            base_params in prop::collection::vec(("[a-c]", 0.0f64..=1.0), 0..4),
            level_deltas in params(),
            mood_deltas in params(),
            prefix in "[a-z ]{0,8}",
        ) {
            let base = base_params
                .into_iter()
                .fold(Personality::new("p", "base"), |p, (k, v)| p.with_parameter(k, v));
            let level = level_deltas
                .into_iter()
                .fold(RelationshipLevelConfig::new("l", 0, 100).with_prefix(prefix), |l, (k, d)| l.with_delta(k, d));
            let mood = mood_deltas
                .into_iter()
                .fold(MoodConfig::new(), |m, (k, d)| m.with_delta(k, d));

            let a = serde_json::to_vec(&compose(&base, Some(&level), Some(&mood))).unwrap();
            let b = serde_json::to_vec(&compose(&base, Some(&level), Some(&mood))).unwrap();
            prop_assert_eq!(&a, &b);

            let composed = compose(&base, Some(&level), Some(&mood));
            for value in composed.advanced_parameters.values() {
                prop_assert!((0.0..=1.0).contains(value));
            }
        }
    }
}
