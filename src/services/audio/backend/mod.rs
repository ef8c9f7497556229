//! Platform audio backends, one per OS (two on Linux)

/// ALSA cards polled for changes
#[cfg(target_os = "linux")]
pub mod alsa;
/// macOS HAL with a property listener
#[cfg(target_os = "macos")]
pub mod coreaudio;
/// Windows endpoints with an `IMMNotificationClient`
#[cfg(target_os = "windows")]
pub mod mmdevice;
/// PulseAudio server on a dedicated mainloop thread
#[cfg(target_os = "linux")]
pub mod pulse;
