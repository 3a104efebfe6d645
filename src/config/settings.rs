//! TOML-based configuration for Prism.
//!
//! Supports a config file (prism.toml) with environment variable expansion.
//!
//! Example configuration:
//! ```toml
//! [query]
//! dialect = "postgres"
//!
//! [validation]
//! fuzzy_threshold = 2
//!
//! [evaluation]
//! null_ratio_warning = 0.25
//!
//! [manifest]
//! path = "${PRISM_HOME}/transforms.json"
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::fuzzy::DEFAULT_THRESHOLD;
use crate::sql::Dialect;

/// Error type for settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub query: QuerySettings,
    pub validation: ValidationSettings,
    pub evaluation: EvaluationSettings,
    pub manifest: ManifestSettings,
}

/// Query compilation settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct QuerySettings {
    /// Target SQL dialect.
    pub dialect: Dialect,
}

/// Schema validation settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ValidationSettings {
    /// Maximum edit distance for "did you mean" suggestions.
    pub fuzzy_threshold: usize,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            fuzzy_threshold: DEFAULT_THRESHOLD,
        }
    }
}

/// Expression evaluation settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EvaluationSettings {
    /// Null fraction above which an evaluation warns.
    pub null_ratio_warning: f64,
}

impl Default for EvaluationSettings {
    fn default() -> Self {
        Self {
            null_ratio_warning: 0.2,
        }
    }
}

/// Transform manifest location.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ManifestSettings {
    /// Manifest file path (supports ${ENV_VAR} expansion).
    pub path: Option<String>,
}

impl ManifestSettings {
    /// The manifest path with environment variables expanded.
    pub fn resolved_path(&self) -> Result<Option<PathBuf>, SettingsError> {
        self.path
            .as_deref()
            .map(|p| expand_env_vars(p).map(PathBuf::from))
            .transpose()
    }
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and check settings from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        let settings: Settings = toml::from_str(content)?;
        settings.check()?;
        Ok(settings)
    }

    /// Load settings from the default config file locations.
    ///
    /// Searches in order:
    /// 1. `$PRISM_CONFIG`
    /// 2. `./prism.toml`
    /// 3. `~/.config/prism/config.toml`
    pub fn load() -> Result<Self, SettingsError> {
        if let Ok(path) = env::var("PRISM_CONFIG") {
            return Self::from_file(&path);
        }

        let local_config = PathBuf::from("prism.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("prism").join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        Ok(Settings::default())
    }

    fn check(&self) -> Result<(), SettingsError> {
        let ratio = self.evaluation.null_ratio_warning;
        if !(0.0..=1.0).contains(&ratio) {
            return Err(SettingsError::InvalidConfig(format!(
                "evaluation.null_ratio_warning must be between 0 and 1, got {}",
                ratio
            )));
        }
        Ok(())
    }
}

/// Expand environment variables in a string.
///
/// Supports `${VAR}` and `$VAR`. A lone `$` is kept as is.
pub fn expand_env_vars(s: &str) -> Result<String, SettingsError> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }

        let mut var_name = String::new();
        if chars.peek() == Some(&'{') {
            chars.next();
            let mut closed = false;
            for ch in chars.by_ref() {
                if ch == '}' {
                    closed = true;
                    break;
                }
                var_name.push(ch);
            }
            if !closed {
                return Err(SettingsError::InvalidConfig(format!(
                    "Unterminated variable reference '${{{}'",
                    var_name
                )));
            }
        } else {
            while let Some(&ch) = chars.peek() {
                if ch.is_alphanumeric() || ch == '_' {
                    var_name.push(ch);
                    chars.next();
                } else {
                    break;
                }
            }
            if var_name.is_empty() {
                result.push('$');
                continue;
            }
        }

        let value = env::var(&var_name).map_err(|_| SettingsError::MissingEnvVar(var_name))?;
        result.push_str(&value);
    }

    Ok(result)
}
