use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::services::DeviceError;

/// Top-level error of the avdev library and binary.
///
/// Configuration problems are reported with the offending field or file;
/// device directory failures are carried through unchanged.
#[derive(Error, Debug)]
pub enum AvdevError {
    /// A value parsed but is not acceptable
    #[error("invalid config field '{field}' in [{component}]: {reason}")]
    InvalidConfigField {
        /// Name of the rejected field
        field: String,
        /// Section holding the field
        component: String,
        /// What is wrong with the value
        reason: String,
    },

    /// A config file could not be read
    #[error("cannot read '{}': {details}", path.display())]
    IoError {
        /// File that failed
        path: PathBuf,
        /// Underlying failure
        details: String,
    },

    /// Locating the config directory failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed TOML
    #[error("failed to parse TOML at '{location}': {details}")]
    TomlParseError {
        /// File path, or `string` for in-memory documents
        location: String,
        /// Parser message including line and column
        details: String,
    },

    /// Device directory error
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Result alias defaulting to [`AvdevError`].
pub type Result<T> = std::result::Result<T, AvdevError>;

impl AvdevError {
    /// Wraps a TOML parser error, naming `path` when the document came from
    /// a file.
    pub fn toml_parse(error: impl std::fmt::Display, path: Option<&Path>) -> Self {
        let location = path.map_or_else(
            || String::from("string"),
            |p| {
                p.canonicalize()
                    .unwrap_or_else(|_| p.to_path_buf())
                    .display()
                    .to_string()
            },
        );

        AvdevError::TomlParseError {
            location,
            details: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_documents_have_string_location() {
        let error = AvdevError::toml_parse("expected `]`", None);

        assert!(matches!(
            error,
            AvdevError::TomlParseError { ref location, .. } if location == "string"
        ));
    }

    #[test]
    fn device_errors_pass_through() {
        let error = AvdevError::from(DeviceError::Stopped);

        assert_eq!(error.to_string(), DeviceError::Stopped.to_string());
    }
}
