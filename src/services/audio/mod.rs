/// Platform backends
pub mod backend;
/// Audio device record
pub mod device;
/// Audio device directory contract and shared state
pub mod manager;

pub use device::AudioDevice;
pub use manager::{AudioDeviceManager, AudioDevicePtr, AudioDeviceState, DefaultAudioDevice};
