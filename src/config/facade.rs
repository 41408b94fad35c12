//! Layered loading: defaults, global file, explicit file, environment.

use super::merge::merge_policy;
use super::sources::{environment, explicit_file, global_file};
use super::TranslatorConfig;
use crate::error::TranslateError;
use config::ConfigError;
use std::path::{Path, PathBuf};

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with precedence (lowest to highest): defaults,
    /// `$XDG_CONFIG_HOME/honyaku/config.toml`, `explicit`, `HONYAKU__*` environment.
    pub fn load(explicit: Option<&Path>) -> Result<TranslatorConfig, ConfigError> {
        let builder = merge_policy::builder_with_defaults()?;
        let builder = global_file::add_to_builder(builder)?;
        let builder = match explicit {
            Some(path) => explicit_file::add_to_builder(builder, path)?,
            None => builder,
        };
        let builder = environment::add_to_builder(builder);
        builder.build()?.try_deserialize()
    }

    /// Load a single file on top of defaults, without global file or environment.
    pub fn load_from_file(path: &Path) -> Result<TranslatorConfig, ConfigError> {
        let builder = merge_policy::builder_with_defaults()?;
        let builder = explicit_file::add_to_builder(builder, path)?;
        builder.build()?.try_deserialize()
    }

    /// `load` followed by validation; all validation errors are reported together.
    pub fn load_validated(explicit: Option<&Path>) -> Result<TranslatorConfig, TranslateError> {
        let config = Self::load(explicit)?;
        config.validate().map_err(|errors| {
            let error_msgs: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            TranslateError::Config(format!(
                "Configuration validation failed:\n{}",
                error_msgs.join("\n")
            ))
        })?;
        Ok(config)
    }

    pub fn global_config_path() -> Option<PathBuf> {
        global_file::global_config_path()
    }

    pub fn default() -> TranslatorConfig {
        TranslatorConfig::default()
    }
}
