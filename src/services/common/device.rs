use std::{
    cmp::Ordering,
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};

use serde::{Deserialize, Serialize};

use crate::services::{audio::AudioDevice, video::VideoDevice};

/// Physical connection of a device to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceTransport {
    /// Transport could not be determined
    #[default]
    Unknown,
    /// HDMI audio sink
    Hdmi,
    /// DisplayPort audio sink
    DisplayPort,
    /// USB attached device
    Usb,
    /// Bluetooth device
    Bluetooth,
    /// PCI or PCIe card
    Pci,
    /// Integrated into the machine
    BuiltIn,
    /// Software device without hardware
    Virtual,
    /// Network stream or remote device
    Network,
}

impl DeviceTransport {
    /// Maps the four-char transport codes of CoreAudio and AVFoundation
    /// (`'usb '`, `'bltn'`, ...).
    pub fn from_four_char_code(code: u32) -> Self {
        match &code.to_be_bytes() {
            b"bltn" => DeviceTransport::BuiltIn,
            b"usb " => DeviceTransport::Usb,
            b"blue" | b"blea" => DeviceTransport::Bluetooth,
            b"hdmi" => DeviceTransport::Hdmi,
            b"dprt" => DeviceTransport::DisplayPort,
            b"pci " | b"thun" => DeviceTransport::Pci,
            b"virt" | b"grup" => DeviceTransport::Virtual,
            b"airp" | b"eavb" => DeviceTransport::Network,
            _ => DeviceTransport::Unknown,
        }
    }
}

/// Physical shape of an audio endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceFormFactor {
    /// Form factor could not be determined
    #[default]
    Unknown,
    /// Loudspeaker
    Speaker,
    /// Headphones without a microphone
    Headphone,
    /// Headphones with a microphone
    Headset,
    /// Standalone microphone
    Microphone,
}

/// Data direction of an audio device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectionType {
    /// Records from the device
    Capture,
    /// Plays to the device
    Render,
    /// Direction not reported
    Unknown,
}

/// Media kind handled by a manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Audio capture or playback device
    Audio,
    /// Video capture device
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

impl fmt::Display for DirectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirectionType::Capture => write!(f, "capture"),
            DirectionType::Render => write!(f, "playback"),
            DirectionType::Unknown => write!(f, "unknown"),
        }
    }
}

/// Identity record of a media device.
///
/// Two devices are equal when both `name` and `descriptor` match. Transport
/// and form factor are classification metadata and never take part in
/// equality, ordering or hashing. Devices sort by name, then by descriptor,
/// so an ordered set never merges two devices that share a display name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    name: String,
    descriptor: String,
    transport: DeviceTransport,
    form_factor: DeviceFormFactor,
}

impl Device {
    /// Creates a device with unknown classification.
    pub fn new(name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            descriptor: descriptor.into(),
            transport: DeviceTransport::Unknown,
            form_factor: DeviceFormFactor::Unknown,
        }
    }

    /// Human readable name. Not unique.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stable OS identifier of the device.
    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    /// Physical connection type.
    pub fn transport(&self) -> DeviceTransport {
        self.transport
    }

    /// Physical shape of the device.
    pub fn form_factor(&self) -> DeviceFormFactor {
        self.form_factor
    }

    /// Sets the transport. Only possible before the device is shared.
    pub fn set_transport(&mut self, transport: DeviceTransport) {
        self.transport = transport;
    }

    /// Sets the form factor. Only possible before the device is shared.
    pub fn set_form_factor(&mut self, form_factor: DeviceFormFactor) {
        self.form_factor = form_factor;
    }

    /// Builder variant of [`Device::set_transport`].
    #[must_use]
    pub fn with_transport(mut self, transport: DeviceTransport) -> Self {
        self.transport = transport;
        self
    }

    /// Builder variant of [`Device::set_form_factor`].
    #[must_use]
    pub fn with_form_factor(mut self, form_factor: DeviceFormFactor) -> Self {
        self.form_factor = form_factor;
        self
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.descriptor == other.descriptor
    }
}

impl Eq for Device {}

impl Hash for Device {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.descriptor.hash(state);
    }
}

impl PartialOrd for Device {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Device {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name
            .cmp(&other.name)
            .then_with(|| self.descriptor.cmp(&other.descriptor))
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.name, self.descriptor)
    }
}

/// Kind-agnostic view of a device handed to hotplug listeners.
pub trait MediaDevice: fmt::Debug + Send + Sync + 'static {
    /// Identity record.
    fn device(&self) -> &Device;

    /// Media kind of the device.
    fn kind(&self) -> MediaKind;

    /// Audio view, if this is an audio device.
    fn as_audio(&self) -> Option<&AudioDevice> {
        None
    }

    /// Video view, if this is a video device.
    fn as_video(&self) -> Option<&VideoDevice> {
        None
    }

    /// Shortcut for `device().name()`.
    fn name(&self) -> &str {
        self.device().name()
    }

    /// Shortcut for `device().descriptor()`.
    fn descriptor(&self) -> &str {
        self.device().descriptor()
    }
}

/// Shared device handle delivered to listeners and event subscribers.
pub type DevicePtr = Arc<dyn MediaDevice>;

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    #[test]
    fn equality_ignores_classification() {
        let a = Device::new("Mic", "hw:0,0").with_transport(DeviceTransport::Usb);
        let b = Device::new("Mic", "hw:0,0").with_form_factor(DeviceFormFactor::Headset);

        assert_eq!(a, b);
    }

    #[test]
    fn four_char_transport_codes() {
        let code = |fourcc: &[u8; 4]| u32::from_be_bytes(*fourcc);

        assert_eq!(DeviceTransport::from_four_char_code(code(b"usb ")), DeviceTransport::Usb);
        assert_eq!(
            DeviceTransport::from_four_char_code(code(b"blea")),
            DeviceTransport::Bluetooth
        );
        assert_eq!(DeviceTransport::from_four_char_code(code(b"hdmi")), DeviceTransport::Hdmi);
        assert_eq!(
            DeviceTransport::from_four_char_code(code(b"zzzz")),
            DeviceTransport::Unknown
        );
    }

    #[test]
    fn same_name_different_descriptor_are_distinct() {
        let mut set = BTreeSet::new();

        assert!(set.insert(Device::new("USB Camera", "/dev/video0")));
        assert!(set.insert(Device::new("USB Camera", "/dev/video2")));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn orders_by_name_then_descriptor() {
        let a = Device::new("A", "2");
        let b = Device::new("A", "10");
        let c = Device::new("B", "0");

        let ordered: Vec<_> = BTreeSet::from([c.clone(), a.clone(), b.clone()])
            .into_iter()
            .collect();

        assert_eq!(ordered, vec![b, a, c]);
    }

    #[test]
    fn displays_name_and_descriptor() {
        let device = Device::new("Built-in Output", "73");

        assert_eq!(device.to_string(), "Built-in Output [73]");
    }
}
