use std::{cmp::Ordering, fmt, ops::Deref};

use serde::{Deserialize, Serialize};

use crate::services::common::{Device, DirectionType, MediaDevice, MediaKind};

/// Audio capture or playback device.
///
/// Identity is the wrapped [`Device`]; direction only decides which list of a
/// manager the device lives in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioDevice {
    #[serde(flatten)]
    device: Device,
    direction: DirectionType,
}

impl AudioDevice {
    /// Creates an audio device for `direction`.
    pub fn new(device: Device, direction: DirectionType) -> Self {
        Self { device, direction }
    }

    /// Shortcut for a capture device.
    pub fn capture(name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self::new(Device::new(name, descriptor), DirectionType::Capture)
    }

    /// Shortcut for a playback device.
    pub fn playback(name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self::new(Device::new(name, descriptor), DirectionType::Render)
    }

    /// Data direction.
    pub fn direction(&self) -> DirectionType {
        self.direction
    }

    /// Identity record.
    pub fn device(&self) -> &Device {
        &self.device
    }
}

impl Deref for AudioDevice {
    type Target = Device;

    fn deref(&self) -> &Device {
        &self.device
    }
}

impl PartialEq for AudioDevice {
    fn eq(&self, other: &Self) -> bool {
        self.device == other.device
    }
}

impl Eq for AudioDevice {}

impl PartialOrd for AudioDevice {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AudioDevice {
    fn cmp(&self, other: &Self) -> Ordering {
        self.device.cmp(&other.device)
    }
}

impl fmt::Display for AudioDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.device, self.direction)
    }
}

impl MediaDevice for AudioDevice {
    fn device(&self) -> &Device {
        &self.device
    }

    fn kind(&self) -> MediaKind {
        MediaKind::Audio
    }

    fn as_audio(&self) -> Option<&AudioDevice> {
        Some(self)
    }
}
