use serde::Serialize;

use crate::{
    cli::{
        Command, CommandResult,
        formatting::{DeviceView, format_description, format_header},
    },
    services::MediaDevices,
};

/// Shows the default device of every slot
pub struct DefaultsCommand {
    json: bool,
}

#[derive(Debug, Serialize)]
struct Defaults {
    audio_capture: Option<DeviceView>,
    audio_playback: Option<DeviceView>,
    video_capture: Option<DeviceView>,
}

impl DefaultsCommand {
    /// Creates the command.
    pub fn new(json: bool) -> Self {
        Self { json }
    }
}

impl Command for DefaultsCommand {
    fn execute(&self, devices: &MediaDevices) -> CommandResult {
        let defaults = Defaults {
            audio_capture: devices
                .default_audio_capture_device()?
                .map(|device| DeviceView::new(&*device, true)),
            audio_playback: devices
                .default_audio_playback_device()?
                .map(|device| DeviceView::new(&*device, true)),
            video_capture: devices
                .default_video_capture_device()?
                .map(|device| DeviceView::new(&*device, true)),
        };

        if self.json {
            return Ok(serde_json::to_string_pretty(&defaults)?);
        }

        let slots = [
            ("Audio capture", &defaults.audio_capture),
            ("Audio playback", &defaults.audio_playback),
            ("Video capture", &defaults.video_capture),
        ];

        let mut output = format_header("Default devices");
        for (slot, view) in slots {
            let value = match view {
                Some(view) => format!("{} {}", view.name, format_description(&view.descriptor)),
                None => format_description("none"),
            };
            output.push_str(&format!("\n  {slot:<16} {value}"));
        }

        Ok(output)
    }
}
