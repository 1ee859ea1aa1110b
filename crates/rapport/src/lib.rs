//! Rapport: persistent relationship state and memory for AI personalities.
//!
//! A [`Rapport`] engine remembers facts and episodes about each user, tracks
//! an affinity score per (user, personality) pair, and uses that relationship
//! state to modify a base personality before it is compiled into a prompt.
//!
//! ```rust,no_run
//! use rapport::{InteractionSignals, Rapport, RapportConfig};
//! use rapport_types::{InteractionType, Personality};
//!
//! # async fn run() -> rapport::Result<()> {
//! let config = rapport::load_config(None)?.config;
//! let _guard = rapport::init_tracing(&config.logging())?;
//!
//! let engine = Rapport::from_config(&config).await?;
//! engine.register_personality(Personality::new("aria", "You are Aria."))?;
//!
//! engine
//!     .record_interaction("u1", "aria", InteractionType::Positive, &InteractionSignals::new())
//!     .await?;
//! let prompt = engine.compose_and_compile("u1", "aria", 1024).await?;
//! println!("{}", prompt.text);
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod error;
pub mod logging;
pub mod personality;

pub use engine::{Rapport, open_adapter};
pub use error::{RapportError, Result};
pub use logging::init_tracing;
pub use personality::load_personality;

pub use rapport_compose::{CompiledPrompt, PlainTextCompiler, PromptCompiler};
pub use rapport_config::{LoadedConfig, RapportConfig, load_config, load_config_with_options};
pub use rapport_memory::{AffinityUpdate, InteractionSignals, LevelChange};
