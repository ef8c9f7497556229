//! Formatting utilities for CLI output.
//!
//! Provides consistent, colored formatting for device tables and event lines,
//! plus serializable views for `--json` output.

use serde::Serialize;

use crate::services::{
    DeviceEvent, DeviceFormFactor, DevicePtr, DeviceTransport, DirectionType, MediaKind,
    VideoCaptureCapability, common::MediaDevice,
};

/// ANSI color codes for terminal output
pub struct Colors;

impl Colors {
    /// Reset all formatting
    pub const RESET: &'static str = "\x1b[0m";
    /// Bold text
    pub const BOLD: &'static str = "\x1b[1m";
    /// Dim text
    pub const DIM: &'static str = "\x1b[2m";

    /// Red color
    pub const RED: &'static str = "\x1b[31m";
    /// Green color
    pub const GREEN: &'static str = "\x1b[32m";
    /// Yellow color
    pub const YELLOW: &'static str = "\x1b[33m";
    /// Cyan color
    pub const CYAN: &'static str = "\x1b[36m";
}

/// Formats section headers with styling
pub fn format_header(text: &str) -> String {
    format!("{}{}{}{}", Colors::BOLD, Colors::CYAN, text, Colors::RESET)
}

/// Formats descriptions with muted styling
pub fn format_description(text: &str) -> String {
    format!("{}{}{}", Colors::DIM, text, Colors::RESET)
}

/// Formats error messages with red styling
pub fn format_error(text: &str) -> String {
    format!("{}{}{}{}", Colors::BOLD, Colors::RED, text, Colors::RESET)
}

/// Serializable description of one device.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DeviceView {
    /// Display name
    pub name: String,
    /// Stable OS identifier
    pub descriptor: String,
    /// Audio or video
    pub kind: MediaKind,
    /// Direction of audio devices
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<DirectionType>,
    /// Physical connection
    pub transport: DeviceTransport,
    /// Physical shape
    pub form_factor: DeviceFormFactor,
    /// Whether this is the default of its slot
    pub is_default: bool,
}

impl DeviceView {
    /// Builds a view of `device`.
    pub fn new(device: &dyn MediaDevice, is_default: bool) -> Self {
        let record = device.device();

        Self {
            name: record.name().to_string(),
            descriptor: record.descriptor().to_string(),
            kind: device.kind(),
            direction: device.as_audio().map(|audio| audio.direction()),
            transport: record.transport(),
            form_factor: record.form_factor(),
            is_default,
        }
    }
}

/// Serializable form of a hotplug event.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum EventView {
    /// A device arrived
    Connected {
        /// RFC 3339 timestamp
        at: String,
        /// The device
        device: DeviceView,
    },
    /// A device left
    Disconnected {
        /// RFC 3339 timestamp
        at: String,
        /// The device
        device: DeviceView,
    },
    /// A default slot changed
    DefaultChanged {
        /// RFC 3339 timestamp
        at: String,
        /// Media kind of the slot
        kind: MediaKind,
        /// Direction of the slot
        direction: DirectionType,
        /// The new default, if any
        device: Option<DeviceView>,
    },
}

impl From<&DeviceEvent> for EventView {
    fn from(event: &DeviceEvent) -> Self {
        match event {
            DeviceEvent::Connected { device, at } => EventView::Connected {
                at: at.to_rfc3339(),
                device: DeviceView::new(device.as_ref(), false),
            },
            DeviceEvent::Disconnected { device, at } => EventView::Disconnected {
                at: at.to_rfc3339(),
                device: DeviceView::new(device.as_ref(), false),
            },
            DeviceEvent::DefaultChanged {
                kind,
                direction,
                device,
                at,
            } => EventView::DefaultChanged {
                at: at.to_rfc3339(),
                kind: *kind,
                direction: *direction,
                device: device.as_ref().map(|d| DeviceView::new(d.as_ref(), true)),
            },
        }
    }
}

/// Formats one row of a device table.
pub fn format_device_row(view: &DeviceView) -> String {
    let slot = match view.direction {
        Some(direction) => format!("{} {direction}", view.kind),
        None => view.kind.to_string(),
    };
    let marker = if view.is_default {
        format!(" {}(default){}", Colors::GREEN, Colors::RESET)
    } else {
        String::new()
    };

    format!(
        "{:<14} {:<36} {}{}",
        slot,
        view.name,
        format_description(&view.descriptor),
        marker
    )
}

/// Formats a device table, or a note when there is nothing to show.
pub fn format_device_table(title: &str, views: &[DeviceView]) -> String {
    let mut output = format_header(title);
    output.push('\n');

    if views.is_empty() {
        output.push_str(&format_description("  none"));
        output.push('\n');
        return output;
    }

    for view in views {
        output.push_str("  ");
        output.push_str(&format_device_row(view));
        output.push('\n');
    }

    output
}

/// Formats one capability line.
pub fn format_capability(capability: &VideoCaptureCapability) -> String {
    format!("  {capability}")
}

/// Formats an event for the `watch` command.
pub fn format_event(event: &DeviceEvent) -> String {
    let (label, color, detail) = match event {
        DeviceEvent::Connected { device, .. } => ("+", Colors::GREEN, describe(device)),
        DeviceEvent::Disconnected { device, .. } => ("-", Colors::RED, describe(device)),
        DeviceEvent::DefaultChanged {
            kind,
            direction,
            device,
            ..
        } => (
            "*",
            Colors::YELLOW,
            format!(
                "default {kind} {direction}: {}",
                device
                    .as_ref()
                    .map(describe)
                    .unwrap_or_else(|| String::from("none"))
            ),
        ),
    };

    let at = match event {
        DeviceEvent::Connected { at, .. }
        | DeviceEvent::Disconnected { at, .. }
        | DeviceEvent::DefaultChanged { at, .. } => at.format("%H:%M:%S%.3f"),
    };

    format!(
        "{} {color}{}{}{} {detail}",
        format_description(&at.to_string()),
        Colors::BOLD,
        label,
        Colors::RESET
    )
}

fn describe(device: &DevicePtr) -> String {
    format!("{} {}", device.kind(), device.device())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::services::{AudioDevice, Device, VideoDevice};

    #[test]
    fn audio_view_carries_direction() {
        let mic = AudioDevice::capture("Mic", "hw:0,0");

        let view = DeviceView::new(&mic, true);

        assert_eq!(view.direction, Some(DirectionType::Capture));
        assert_eq!(view.kind, MediaKind::Audio);
        assert!(view.is_default);
    }

    #[test]
    fn video_view_omits_direction_in_json() {
        let camera = VideoDevice::new(Device::new("Cam", "/dev/video0"));

        let json = serde_json::to_value(DeviceView::new(&camera, false)).unwrap_or_default();

        assert!(json.get("direction").is_none());
        assert_eq!(json["descriptor"], "/dev/video0");
    }

    #[test]
    fn event_lines_name_the_device() {
        let device: DevicePtr = Arc::new(AudioDevice::playback("Speakers", "sink0"));
        let event = DeviceEvent::Connected {
            device,
            at: chrono::Utc::now(),
        };

        let line = format_event(&event);

        assert!(line.contains("Speakers"));
        assert!(line.contains("sink0"));
    }

    #[test]
    fn empty_table_says_none() {
        let table = format_device_table("Audio", &[]);

        assert!(table.contains("none"));
    }
}
