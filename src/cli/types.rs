use thiserror::Error;

use crate::services::{DeviceError, MediaDevices};

/// Errors that can occur during CLI command execution.
///
/// Each variant carries enough context for the user to understand what went
/// wrong without enabling debug logs.
#[derive(Error, Debug)]
pub enum CliError {
    /// No device matches the descriptor given on the command line.
    ///
    /// Descriptors are compared verbatim; `avdev list` shows the exact
    /// spelling.
    #[error("no video device with descriptor '{0}'")]
    DeviceNotFound(String),

    /// A device manager query failed.
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// JSON output could not be produced.
    #[error("cannot serialize output: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An I/O operation failed.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Type alias for command execution results.
///
/// Commands return the text to print on success.
pub type CommandResult = Result<String, CliError>;

/// One-shot query command run against the device directory.
pub trait Command {
    /// Runs the command and returns its output.
    ///
    /// # Errors
    /// Returns `CliError` if a query fails or output cannot be rendered
    fn execute(&self, devices: &MediaDevices) -> CommandResult;
}
