//! Configuration loading, environment overrides and validation.
//!
//! Config files: `plinth.toml`, `plinth.yaml`, `plinth.yml` or `plinth.json`,
//! searched in `./` then `~/.config/plinth/`.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    error::{Error, Result},
    loader::{
        apply_env_overrides, clear_config_dir, clear_data_dir, config_dir, data_dir,
        discover_and_load, find_or_default_config_path, load_config, save_config,
        set_config_dir, set_data_dir,
    },
    schema::{
        BundlesConfig, DatabaseConfig, MigrationsConfig, PlinthConfig, PluginsConfig,
        ResolvedPaths,
    },
    validate::{Diagnostic, Severity, ValidationResult, validate},
};
