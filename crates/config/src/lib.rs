//! Bridge configuration: schema, discovery, `${ENV}` substitution and
//! environment overrides.
//!
//! Config files: `wabridge.toml`, `wabridge.yaml`, `wabridge.yml` or
//! `wabridge.json`, searched in `./` then the user config directory.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;

pub use {
    error::{Error, Result},
    loader::{
        apply_env_overrides, config_dir, data_dir, discover_and_load, load_config, load_or_default,
    },
    schema::{
        BridgeConfig, IdentityConfig, LifecycleConfig, MediaConfig, OutputConfig, ScrapersConfig,
        SessionConfig, SidecarConfig, TasksConfig,
    },
};
