use super::{Config, ConfigPaths};

use crate::{AvdevError, Result};

use std::{fs, path::Path};

impl Config {
    /// Loads the main configuration file, falling back to defaults when it
    /// does not exist.
    ///
    /// # Errors
    /// Returns error if the config directory cannot be determined or the file
    /// cannot be read, parsed or validated
    pub fn load() -> Result<Config> {
        let path = ConfigPaths::main_config()?;

        if !path.exists() {
            return Ok(Config::default());
        }

        Self::load_from(&path)
    }

    /// Loads configuration from `path`.
    ///
    /// # Errors
    /// Returns error if the file cannot be read, parsed or validated
    pub fn load_from(path: &Path) -> Result<Config> {
        let file_content = fs::read_to_string(path).map_err(|e| AvdevError::IoError {
            path: path.to_path_buf(),
            details: e.to_string(),
        })?;

        let config: Config =
            toml::from_str(&file_content).map_err(|e| AvdevError::toml_parse(e, Some(path)))?;
        config.validate()?;

        Ok(config)
    }

    /// Parses configuration from a TOML string.
    ///
    /// # Errors
    /// Returns error if the content cannot be parsed or validated
    pub fn from_toml_str(content: &str) -> Result<Config> {
        let config: Config =
            toml::from_str(content).map_err(|e| AvdevError::toml_parse(e, None))?;
        config.validate()?;

        Ok(config)
    }

    /// Checks values serde cannot reject on its own.
    ///
    /// # Errors
    /// Returns error naming the first invalid field
    pub fn validate(&self) -> Result<()> {
        if self.audio.pulse_application_name.trim().is_empty() {
            return Err(AvdevError::InvalidConfigField {
                field: String::from("pulse_application_name"),
                component: String::from("audio"),
                reason: String::from("must not be empty"),
            });
        }

        if self.video.device_dir.as_os_str().is_empty() {
            return Err(AvdevError::InvalidConfigField {
                field: String::from("device_dir"),
                component: String::from("video"),
                reason: String::from("must not be empty"),
            });
        }

        Ok(())
    }
}
