//! Platform video backends, one per OS

/// AVFoundation cameras polled for changes
#[cfg(target_os = "macos")]
pub mod avfoundation;
/// Message-only window receiving device interface broadcasts
#[cfg(target_os = "windows")]
pub mod device_notifier;
/// Media Foundation cameras
#[cfg(target_os = "windows")]
pub mod media_foundation;
/// V4L2 nodes watched on the filesystem
#[cfg(target_os = "linux")]
pub mod v4l2;
