//! Configuration schema definitions and validation.
//!
//! Defines the configuration structure for avdev: general settings plus the
//! audio and video backend options. All configurations are serializable
//! to/from TOML format.

mod general;
mod loading;
mod media;
mod paths;

pub use general::{GeneralConfig, LogLevel};
pub use media::{AudioBackendKind, AudioConfig, VideoConfig};
pub use paths::ConfigPaths;

use serde::{Deserialize, Serialize};

/// Main configuration structure for avdev.
///
/// Represents the complete configuration schema that can be loaded
/// from TOML files. All fields have sensible defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    /// General application settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Audio backend settings.
    #[serde(default)]
    pub audio: AudioConfig,

    /// Video backend settings.
    #[serde(default)]
    pub video: VideoConfig,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = Config::from_toml_str("").unwrap();

        assert_eq!(config, Config::default());
        assert_eq!(config.audio.backend, AudioBackendKind::Auto);
        assert_eq!(config.video.device_dir, std::path::PathBuf::from("/dev"));
    }

    #[test]
    fn parses_partial_sections() {
        let config = Config::from_toml_str(
            r#"
[general]
log_level = "debug"

[audio]
backend = "alsa"
alsa_poll_interval_ms = 250
"#,
        )
        .unwrap();

        assert_eq!(config.general.log_level, LogLevel::Debug);
        assert_eq!(config.audio.backend, AudioBackendKind::Alsa);
        assert_eq!(config.audio.alsa_poll_interval(), Duration::from_millis(250));
        assert_eq!(config.audio.pulse_application_name, "avdev");
    }

    #[test]
    fn clamps_tiny_poll_intervals() {
        let config = Config::from_toml_str("[audio]\nalsa_poll_interval_ms = 0\n").unwrap();

        assert_eq!(config.audio.alsa_poll_interval(), Duration::from_millis(50));
    }

    #[test]
    fn rejects_unknown_backend() {
        assert!(Config::from_toml_str("[audio]\nbackend = \"jack\"\n").is_err());
    }

    #[test]
    fn rejects_empty_application_name() {
        let result = Config::from_toml_str("[audio]\npulse_application_name = \"  \"\n");

        assert!(matches!(
            result,
            Err(crate::AvdevError::InvalidConfigField { .. })
        ));
    }
}
