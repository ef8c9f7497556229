use std::{collections::BTreeSet, sync::Arc};

use futures::{Stream, stream};
use tracing::{debug, instrument};

use crate::{
    config::Config,
    services::{
        DeviceError,
        audio::{AudioDeviceManager, AudioDevicePtr},
        backend::{SharedAudioManager, SharedVideoManager, create_audio_manager, create_video_manager},
        common::{DeviceEvent, DeviceHotplugListener},
        video::{VideoCaptureCapability, VideoDevice, VideoDeviceManager, VideoDevicePtr},
    },
};

/// System-wide device directory: one audio and one video manager.
///
/// A listener added here is attached to both managers and therefore sees
/// arrivals and removals of every device kind. [`MediaDevices::events`]
/// merges both event channels, default changes included.
pub struct MediaDevices {
    audio: SharedAudioManager,
    video: SharedVideoManager,
}

impl MediaDevices {
    /// Creates the platform managers selected by `config`.
    ///
    /// # Errors
    /// Returns error if either backend fails to start
    #[instrument(skip(config))]
    pub fn new(config: &Config) -> Result<Self, DeviceError> {
        let audio = create_audio_manager(&config.audio)?;
        let video = create_video_manager(&config.video)?;

        Ok(Self::with_managers(audio, video))
    }

    /// Wraps already constructed managers.
    pub fn with_managers(audio: SharedAudioManager, video: SharedVideoManager) -> Self {
        debug!(
            audio = audio.backend_name(),
            video = video.backend_name(),
            "Media devices ready"
        );

        Self { audio, video }
    }

    /// Audio manager.
    pub fn audio(&self) -> &SharedAudioManager {
        &self.audio
    }

    /// Video manager.
    pub fn video(&self) -> &SharedVideoManager {
        &self.video
    }

    /// Attaches `listener` to both managers.
    pub fn add_device_change_listener(&self, listener: &Arc<dyn DeviceHotplugListener>) {
        self.audio.attach_hotplug_listener(listener);
        self.video.attach_hotplug_listener(listener);
    }

    /// Detaches `listener` from both managers.
    pub fn remove_device_change_listener(&self, listener: &Arc<dyn DeviceHotplugListener>) {
        self.audio.detach_hotplug_listener(listener);
        self.video.detach_hotplug_listener(listener);
    }

    /// Merged device events of both managers.
    pub fn events(&self) -> impl Stream<Item = DeviceEvent> + Send + 'static {
        stream::select(
            self.audio.state().hotplug().events(),
            self.video.state().hotplug().events(),
        )
    }

    /// See [`AudioDeviceManager::audio_capture_devices`].
    ///
    /// # Errors
    /// Returns error if the audio backend cannot be queried
    pub fn audio_capture_devices(&self) -> Result<BTreeSet<AudioDevicePtr>, DeviceError> {
        self.audio.audio_capture_devices()
    }

    /// See [`AudioDeviceManager::audio_playback_devices`].
    ///
    /// # Errors
    /// Returns error if the audio backend cannot be queried
    pub fn audio_playback_devices(&self) -> Result<BTreeSet<AudioDevicePtr>, DeviceError> {
        self.audio.audio_playback_devices()
    }

    /// See [`AudioDeviceManager::default_audio_capture_device`].
    ///
    /// # Errors
    /// Returns error if the audio backend cannot be queried
    pub fn default_audio_capture_device(&self) -> Result<Option<AudioDevicePtr>, DeviceError> {
        self.audio.default_audio_capture_device()
    }

    /// See [`AudioDeviceManager::default_audio_playback_device`].
    ///
    /// # Errors
    /// Returns error if the audio backend cannot be queried
    pub fn default_audio_playback_device(&self) -> Result<Option<AudioDevicePtr>, DeviceError> {
        self.audio.default_audio_playback_device()
    }

    /// See [`VideoDeviceManager::video_capture_devices`].
    ///
    /// # Errors
    /// Returns error if the video backend cannot be queried
    pub fn video_capture_devices(&self) -> Result<BTreeSet<VideoDevicePtr>, DeviceError> {
        self.video.video_capture_devices()
    }

    /// See [`VideoDeviceManager::default_video_capture_device`].
    ///
    /// # Errors
    /// Returns error if the video backend cannot be queried
    pub fn default_video_capture_device(&self) -> Result<Option<VideoDevicePtr>, DeviceError> {
        self.video.default_video_capture_device()
    }

    /// See [`VideoDeviceManager::video_capture_capabilities`].
    ///
    /// # Errors
    /// Returns error if the device cannot be opened or queried
    pub fn video_capture_capabilities(
        &self,
        device: &VideoDevice,
    ) -> Result<BTreeSet<VideoCaptureCapability>, DeviceError> {
        self.video.video_capture_capabilities(device)
    }
}
