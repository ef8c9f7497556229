//! Building blocks shared by every device manager and backend

/// COM apartment and string helpers
#[cfg(target_os = "windows")]
pub mod com;
/// Descriptor normalization
pub mod descriptor;
/// Device identity records
pub mod device;
/// Thread-safe device container
pub mod device_list;
/// Hotplug listener protocol
pub mod hotplug;
/// Backend lifecycle state machine
pub mod lifecycle;
/// Polling thread for backends without change notifications
pub mod poll_monitor;

pub use device::{
    Device, DeviceFormFactor, DevicePtr, DeviceTransport, DirectionType, MediaDevice, MediaKind,
};
pub use device_list::DeviceList;
pub use hotplug::{DeviceEvent, DeviceHotplugListener, DeviceManager, EventSender};
pub use lifecycle::{BackendState, Lifecycle};
pub use poll_monitor::PollMonitor;
