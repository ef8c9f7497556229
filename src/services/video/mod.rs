/// Platform backends
pub mod backend;
/// Frame format descriptions
pub mod capability;
/// Video device record
pub mod device;
/// Video device directory contract and shared state
pub mod manager;

pub use capability::{VideoCaptureCapability, VideoType};
pub use device::VideoDevice;
pub use manager::{VideoDeviceManager, VideoDevicePtr, VideoDeviceState};
