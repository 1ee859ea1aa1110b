//! Compose, fingerprint and compile through the cache.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use rapport_types::{AffinityState, MoodConfig, Personality, RelationshipLevelConfig};

use crate::cache::{CacheStats, PromptCache};
use crate::composer::{compose, compose_for_state};
use crate::error::Result;
use crate::hash::CacheKey;

/// Renders a composed personality into provider-specific prompt text.
#[async_trait]
pub trait PromptCompiler: Send + Sync {
    /// Stable identifier that partitions the cache between providers.
    fn provider_id(&self) -> &str;

    async fn compile(&self, composed: &Personality, max_tokens: u32) -> Result<String>;
}

/// Provider-neutral compiler producing the system prompt followed by the
/// tone and expression hints.
///
/// Output is cut to roughly four characters per token.
#[derive(Debug, Clone, Default)]
pub struct PlainTextCompiler;

const CHARS_PER_TOKEN: usize = 4;

#[async_trait]
impl PromptCompiler for PlainTextCompiler {
    fn provider_id(&self) -> &str {
        "plain"
    }

    async fn compile(&self, composed: &Personality, max_tokens: u32) -> Result<String> {
        let mut out = composed.system_prompt.clone();
        let profile = &composed.linguistic_profile;
        if !profile.tone.is_empty() {
            let _ = write!(out, "\n\nTone: {}", profile.tone.join(", "));
        }
        if !profile.expressions.is_empty() {
            let _ = write!(out, "\nExpressions: {}", profile.expressions.join(" | "));
        }

        let budget = (max_tokens as usize).saturating_mul(CHARS_PER_TOKEN);
        if let Some((cut, _)) = out.char_indices().nth(budget) {
            out.truncate(cut);
        }
        Ok(out)
    }
}

/// A compiled prompt and the fingerprint it is cached under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledPrompt {
    pub fingerprint: String,
    pub text: String,
}

/// Composition plus a content-addressed cache in front of a compiler.
pub struct PromptPipeline {
    cache: PromptCache<String>,
    compiler: Arc<dyn PromptCompiler>,
}

impl PromptPipeline {
    pub fn new(cache: PromptCache<String>, compiler: Arc<dyn PromptCompiler>) -> Self {
        Self { cache, compiler }
    }

    pub fn provider_id(&self) -> &str {
        self.compiler.provider_id()
    }

    pub fn cache(&self) -> &PromptCache<String> {
        &self.cache
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Compose `base` with the given modifiers and compile it, reusing a
    /// cached result when an identical composition was compiled before.
    pub async fn compile(
        &self,
        base: &Personality,
        level: Option<&RelationshipLevelConfig>,
        mood: Option<&MoodConfig>,
        max_tokens: u32,
    ) -> Result<CompiledPrompt> {
        let composed = compose(base, level, mood);
        self.compile_composed(base, composed, max_tokens).await
    }

    /// [`compile`](Self::compile) with the level taken from `state` and the
    /// mood looked up by name.
    pub async fn compile_for_state(
        &self,
        base: &Personality,
        state: &AffinityState,
        mood: Option<&str>,
        max_tokens: u32,
    ) -> Result<CompiledPrompt> {
        let composed = compose_for_state(base, state, mood)?;
        self.compile_composed(base, composed, max_tokens).await
    }

    async fn compile_composed(
        &self,
        base: &Personality,
        composed: Personality,
        max_tokens: u32,
    ) -> Result<CompiledPrompt> {
        let key = CacheKey::for_composition(base, &composed, self.compiler.provider_id(), max_tokens)?;
        let fingerprint = key.fingerprint();
        let compiler = Arc::clone(&self.compiler);
        let text = self
            .cache
            .get_or_compute(&fingerprint, || async move {
                debug!(provider = compiler.provider_id(), max_tokens, "Compiling prompt");
                compiler.compile(&composed, max_tokens).await
            })
            .await?;
        Ok(CompiledPrompt { fingerprint, text })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::error::ComposeError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingCompiler {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PromptCompiler for CountingCompiler {
        fn provider_id(&self) -> &str {
            "counting"
        }

        async fn compile(&self, composed: &Personality, max_tokens: u32) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("{}#{}", composed.system_prompt, max_tokens))
        }
    }

    struct FailingCompiler;

    #[async_trait]
    impl PromptCompiler for FailingCompiler {
        fn provider_id(&self) -> &str {
            "failing"
        }

        async fn compile(&self, _composed: &Personality, _max_tokens: u32) -> Result<String> {
            Err(ComposeError::Compile("provider rejected prompt".into()))
        }
    }

    fn pipeline(compiler: Arc<dyn PromptCompiler>) -> PromptPipeline {
        PromptPipeline::new(PromptCache::new(CacheConfig::new().with_capacity(8)), compiler)
    }

    #[tokio::test]
    async fn test_identical_compositions_compile_once() {
        let compiler = Arc::new(CountingCompiler::default());
        let pipeline = pipeline(compiler.clone());
        let base = Personality::new("aria", "You are Aria.");
        let level = RelationshipLevelConfig::new("friend", 0, 100).with_prefix("Friendly. ");

        let first = pipeline.compile(&base, Some(&level), None, 512).await.unwrap();
        let second = pipeline.compile(&base, Some(&level), None, 512).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.text, "Friendly. You are Aria.#512");
        assert_eq!(compiler.calls.load(Ordering::SeqCst), 1);

        let other = pipeline.compile(&base, Some(&level), None, 1024).await.unwrap();
        assert_ne!(other.fingerprint, first.fingerprint);
        assert_eq!(compiler.calls.load(Ordering::SeqCst), 2);
        assert_eq!(pipeline.stats().hits, 1);
    }

    #[tokio::test]
    async fn test_different_modifiers_miss() {
        let compiler = Arc::new(CountingCompiler::default());
        let pipeline = pipeline(compiler.clone());
        let base = Personality::new("aria", "You are Aria.");
        let calm = MoodConfig::new().with_prefix("Calm. ");
        let excited = MoodConfig::new().with_prefix("Excited! ");

        pipeline.compile(&base, None, Some(&calm), 256).await.unwrap();
        pipeline.compile(&base, None, Some(&excited), 256).await.unwrap();
        assert_eq!(compiler.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_compile_failure_is_not_cached() {
        let pipeline = pipeline(Arc::new(FailingCompiler));
        let base = Personality::new("aria", "You are Aria.");
        let err = pipeline.compile(&base, None, None, 256).await.unwrap_err();
        assert!(matches!(err, ComposeError::Compile(_)));
        assert!(pipeline.cache().is_empty());
    }

    #[tokio::test]
    async fn test_plain_text_compiler_truncates() {
        let mut base = Personality::new("aria", "abcdefghijklmnop");
        base.linguistic_profile.tone = vec!["warm".into()];
        let full = PlainTextCompiler.compile(&base, 100).await.unwrap();
        assert_eq!(full, "abcdefghijklmnop\n\nTone: warm");

        let short = PlainTextCompiler.compile(&base, 2).await.unwrap();
        assert_eq!(short, "abcdefgh");
    }
}
