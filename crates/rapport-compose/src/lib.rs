//! Modifier composition and compiled-prompt caching.
//!
//! A base [`Personality`](rapport_types::Personality) is layered with the
//! current relationship level and an optional mood by [`compose`]. The
//! result is fingerprinted together with the provider and token budget, and
//! [`PromptPipeline`] only calls the [`PromptCompiler`] on a cache miss.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rapport_compose::{CacheConfig, PlainTextCompiler, PromptCache, PromptPipeline};
//! use rapport_types::{MoodConfig, Personality};
//!
//! # async fn example() -> rapport_compose::Result<()> {
//! let pipeline = PromptPipeline::new(
//!     PromptCache::new(CacheConfig::default()),
//!     Arc::new(PlainTextCompiler),
//! );
//! let base = Personality::new("aria", "You are Aria.");
//! let mood = MoodConfig::new().with_prefix("Cheerful. ");
//! let prompt = pipeline.compile(&base, None, Some(&mood), 1024).await?;
//! println!("{}", prompt.text);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod composer;
pub mod config;
pub mod error;
pub mod hash;
pub mod pipeline;

pub use cache::{CacheEntry, CacheStats, PromptCache};
pub use composer::{compose, compose_for_state};
pub use config::{CacheConfig, DEFAULT_CAPACITY};
pub use error::{ComposeError, Result};
pub use hash::{CacheKey, modifiers_hash, personality_content_hash};
pub use pipeline::{CompiledPrompt, PlainTextCompiler, PromptCompiler, PromptPipeline};
