//! Configuration system for Inkwell.
//!
//! Provides TOML-based configuration with:
//! - One optional section per model backend (`[providers.deepseek]`,
//!   `[providers.zhipu]`, `[providers.ollama]`, `[providers.mcp]`)
//! - Memory limits, workflow defaults and logging settings
//! - Per-role agent settings (`[agents.writer]`, ...)
//! - Config file layering (user config + project-local overrides)
//! - API key fallback to `DEEPSEEK_API_KEY` / `ZHIPU_API_KEY`

pub mod discovery;
pub mod error;
pub mod secrets;
pub mod types;

pub use discovery::{
    ConfigSource, LoadedConfig, config_dir, load_config, load_config_file,
    load_config_with_options, load_explicit, log_dir, save_config, user_config_path,
};
pub use error::{ConfigError, Result};
pub use secrets::{KeyedBackend, ResolvedSecret, SecretSource, resolve_api_key};
pub use types::{InkwellConfig, LoggingConfig, ProvidersConfig, WorkflowConfig};
