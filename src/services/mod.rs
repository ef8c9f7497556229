/// Audio device directory
pub mod audio;
/// Platform backend selection
pub mod backend;
/// Building blocks shared by all managers
pub mod common;
/// Device directory errors
pub mod error;
/// System-wide fan-out over the audio and video managers
pub mod media_devices;
/// Video device directory
pub mod video;

pub use audio::{AudioDevice, AudioDeviceManager, AudioDevicePtr, AudioDeviceState};
pub use backend::{create_audio_manager, create_video_manager};
pub use common::{
    Device, DeviceEvent, DeviceFormFactor, DeviceHotplugListener, DevicePtr, DeviceTransport,
    DirectionType, MediaDevice, MediaKind,
};
pub use error::DeviceError;
pub use media_devices::MediaDevices;
pub use video::{
    VideoCaptureCapability, VideoDevice, VideoDeviceManager, VideoDevicePtr, VideoDeviceState,
    VideoType,
};
