//! Configuration module for Prism.
//!
//! TOML settings with environment variable expansion.

mod settings;

pub use settings::{
    expand_env_vars, EvaluationSettings, ManifestSettings, QuerySettings, Settings,
    SettingsError, ValidationSettings,
};
