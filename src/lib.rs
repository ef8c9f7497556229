//! avdev - audio and video device directory with hotplug notifications.
//!
//! avdev keeps a live, thread-safe catalog of the capture and playback
//! devices attached to the machine and tells observers when devices come and
//! go. One backend per platform feeds the catalog:
//!
//! - PulseAudio or ALSA, and V4L2 on Linux
//! - CoreAudio and AVFoundation on macOS
//! - MMDevice and Media Foundation on Windows
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use avdev::{config::Config, services::MediaDevices};
//!
//! let devices = MediaDevices::new(&Config::default())?;
//!
//! for mic in devices.audio_capture_devices()? {
//!     println!("{mic}");
//! }
//! # Ok::<(), avdev::AvdevError>(())
//! ```

/// Configuration schema definitions and validation.
pub mod config;

/// Core error types and result aliases.
pub mod core;

/// Command-line interface.
pub mod cli;

/// Device managers and platform backends.
pub mod services;

/// Logging setup.
pub mod tracing_config;

/// Re-exported core types for convenience.
pub use core::{AvdevError, Result};
