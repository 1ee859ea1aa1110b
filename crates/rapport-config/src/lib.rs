//! Configuration for Rapport.
//!
//! Provides TOML-based configuration with:
//! - Storage backend selection and retry policy (`[storage]`)
//! - Episode decay, affinity deltas and cache sizing
//! - Config file layering (user config dir + project-local `rapport.toml`)
//!
//! Values are plain data. The `rapport` crate turns them into component
//! configs when it builds the engine.

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    ConfigSource, LoadedConfig, load_config, load_config_file, load_config_with_options,
    save_config, user_config_dir, user_config_path,
};
pub use error::{ConfigError, Result};
pub use types::*;
