use std::{fmt, ops::Deref};

use serde::{Deserialize, Serialize};

use crate::services::common::{Device, MediaDevice, MediaKind};

/// Video capture device.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VideoDevice {
    #[serde(flatten)]
    device: Device,
}

impl VideoDevice {
    /// Wraps an identity record.
    pub fn new(device: Device) -> Self {
        Self { device }
    }

    /// Identity record.
    pub fn device(&self) -> &Device {
        &self.device
    }
}

impl Deref for VideoDevice {
    type Target = Device;

    fn deref(&self) -> &Device {
        &self.device
    }
}

impl fmt::Display for VideoDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.device, f)
    }
}

impl MediaDevice for VideoDevice {
    fn device(&self) -> &Device {
        &self.device
    }

    fn kind(&self) -> MediaKind {
        MediaKind::Video
    }

    fn as_video(&self) -> Option<&VideoDevice> {
        Some(self)
    }
}
