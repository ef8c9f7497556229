//! Backend selection for the current platform.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::{
    config::{AudioBackendKind, AudioConfig, VideoConfig},
    services::{DeviceError, audio::AudioDeviceManager, video::VideoDeviceManager},
};

/// Shared audio manager handle
pub type SharedAudioManager = Arc<dyn AudioDeviceManager>;
/// Shared video manager handle
pub type SharedVideoManager = Arc<dyn VideoDeviceManager>;

/// Audio backends that can run on this platform.
pub fn available_audio_backends() -> &'static [AudioBackendKind] {
    if cfg!(target_os = "linux") {
        &[AudioBackendKind::PulseAudio, AudioBackendKind::Alsa]
    } else if cfg!(target_os = "macos") {
        &[AudioBackendKind::CoreAudio]
    } else if cfg!(target_os = "windows") {
        &[AudioBackendKind::MmDevice]
    } else {
        &[]
    }
}

/// Creates the audio manager selected by `config`.
///
/// On Linux `auto` picks PulseAudio and falls back to ALSA when no sound
/// server accepts the connection.
///
/// # Errors
/// Returns [`DeviceError::Unsupported`] if the backend does not exist on this
/// platform, or the backend's initialization error
#[instrument(skip(config), fields(backend = ?config.backend))]
pub fn create_audio_manager(config: &AudioConfig) -> Result<SharedAudioManager, DeviceError> {
    let manager = platform_audio_manager(config)?;
    info!(backend = manager.backend_name(), "Audio device manager created");
    Ok(manager)
}

#[cfg(target_os = "linux")]
fn platform_audio_manager(config: &AudioConfig) -> Result<SharedAudioManager, DeviceError> {
    use crate::services::audio::backend::{alsa::AlsaAudioDeviceManager, pulse::PulseAudioDeviceManager};

    match config.backend {
        AudioBackendKind::PulseAudio => Ok(Arc::new(PulseAudioDeviceManager::new(config)?)),
        AudioBackendKind::Alsa => Ok(Arc::new(AlsaAudioDeviceManager::new(config)?)),
        AudioBackendKind::Auto => match PulseAudioDeviceManager::new(config) {
            Ok(manager) => Ok(Arc::new(manager)),
            Err(e @ DeviceError::InitializationFailed { .. }) => {
                warn!(error = %e, "No PulseAudio server, falling back to ALSA");
                Ok(Arc::new(AlsaAudioDeviceManager::new(config)?))
            }
            Err(e) => Err(e),
        },
        other => Err(unsupported_audio(other)),
    }
}

#[cfg(target_os = "macos")]
fn platform_audio_manager(config: &AudioConfig) -> Result<SharedAudioManager, DeviceError> {
    use crate::services::audio::backend::coreaudio::CoreAudioDeviceManager;

    match config.backend {
        AudioBackendKind::Auto | AudioBackendKind::CoreAudio => {
            Ok(Arc::new(CoreAudioDeviceManager::new()?))
        }
        other => Err(unsupported_audio(other)),
    }
}

#[cfg(target_os = "windows")]
fn platform_audio_manager(config: &AudioConfig) -> Result<SharedAudioManager, DeviceError> {
    use crate::services::audio::backend::mmdevice::MmDeviceAudioDeviceManager;

    match config.backend {
        AudioBackendKind::Auto | AudioBackendKind::MmDevice => {
            Ok(Arc::new(MmDeviceAudioDeviceManager::new()?))
        }
        other => Err(unsupported_audio(other)),
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
fn platform_audio_manager(config: &AudioConfig) -> Result<SharedAudioManager, DeviceError> {
    Err(unsupported_audio(config.backend))
}

fn unsupported_audio(kind: AudioBackendKind) -> DeviceError {
    DeviceError::Unsupported(format!(
        "audio backend {kind:?} is not available on {}",
        std::env::consts::OS
    ))
}

/// Creates the video manager of this platform.
///
/// # Errors
/// Returns [`DeviceError::Unsupported`] on platforms without a video backend,
/// or the backend's initialization error
#[instrument(skip(config))]
pub fn create_video_manager(config: &VideoConfig) -> Result<SharedVideoManager, DeviceError> {
    let manager = platform_video_manager(config)?;
    info!(backend = manager.backend_name(), "Video device manager created");
    Ok(manager)
}

#[cfg(target_os = "linux")]
fn platform_video_manager(config: &VideoConfig) -> Result<SharedVideoManager, DeviceError> {
    use crate::services::video::backend::v4l2::V4l2VideoDeviceManager;

    Ok(Arc::new(V4l2VideoDeviceManager::new(config)?))
}

#[cfg(target_os = "macos")]
fn platform_video_manager(config: &VideoConfig) -> Result<SharedVideoManager, DeviceError> {
    use crate::services::video::backend::avfoundation::AvFoundationVideoDeviceManager;

    Ok(Arc::new(AvFoundationVideoDeviceManager::new(config)?))
}

#[cfg(target_os = "windows")]
fn platform_video_manager(_config: &VideoConfig) -> Result<SharedVideoManager, DeviceError> {
    use crate::services::video::backend::media_foundation::MediaFoundationVideoDeviceManager;

    Ok(Arc::new(MediaFoundationVideoDeviceManager::new()?))
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
fn platform_video_manager(_config: &VideoConfig) -> Result<SharedVideoManager, DeviceError> {
    Err(DeviceError::Unsupported(format!(
        "no video backend on {}",
        std::env::consts::OS
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn foreign_backend_is_unsupported() {
        let foreign = if cfg!(target_os = "macos") {
            AudioBackendKind::MmDevice
        } else {
            AudioBackendKind::CoreAudio
        };
        let config = AudioConfig {
            backend: foreign,
            ..AudioConfig::default()
        };

        let result = create_audio_manager(&config);

        assert!(matches!(result, Err(DeviceError::Unsupported(_))));
    }

    #[test]
    fn auto_is_never_listed_as_concrete_backend() {
        assert!(!available_audio_backends().contains(&AudioBackendKind::Auto));
    }
}
