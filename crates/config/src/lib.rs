//! Configuration loading, validation and env substitution.
//!
//! Config files: `wabridge.toml`, `wabridge.yaml`, or `wabridge.json`
//! Searched in `./` then the user config directory.
//!
//! Supports `${ENV_VAR}` and `${ENV_VAR:-default}` substitution in the raw
//! file text.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{
        apply_env_overrides, config_dir, default_data_dir, discover_and_load, find_config_file,
        load_config,
    },
    schema::{
        DatabaseConfig, MetricsConfig, ReconnectConfig, ServerConfig, SessionsConfig,
        SidecarConfig, SidecarSpawnConfig, WabridgeConfig, WebhookConfig,
    },
    validate::{Diagnostic, Severity, ValidationResult, validate, validate_config},
};
