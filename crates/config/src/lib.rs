//! Configuration loading, validation and env substitution for herald.
//!
//! Config files: `herald.toml`, `herald.yaml`, `herald.yml` or `herald.json`,
//! searched in `./` then the user config directory (`~/.config/herald/` on
//! Linux).
//!
//! Supports `${ENV_VAR}` and `${ENV_VAR:-default}` substitution in the raw
//! file, and `HERALD_*` environment overrides after parsing.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    error::{Error, Result},
    loader::{
        apply_env_overrides, config_dir, discover_and_load, find_config_file, load_config,
        save_config,
    },
    schema::{BrainConfig, HeraldConfig, LoggingConfig, RobotConfig},
    validate::{Diagnostic, Severity, ValidationResult, validate, validate_str},
};
