use clap::ValueEnum;
use serde::Serialize;

use crate::{
    cli::{
        Command, CommandResult,
        formatting::{DeviceView, format_device_table},
    },
    services::{AudioDevicePtr, MediaDevices, VideoDevicePtr},
};

/// Which device kinds `list` shows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ListKind {
    /// Audio capture and playback devices
    Audio,
    /// Video capture devices
    Video,
    /// Everything
    #[default]
    All,
}

/// Lists devices with their default markers
pub struct ListCommand {
    kind: ListKind,
    json: bool,
}

#[derive(Debug, Default, Serialize)]
struct Listing {
    #[serde(skip_serializing_if = "Option::is_none")]
    audio_capture: Option<Vec<DeviceView>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    audio_playback: Option<Vec<DeviceView>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    video_capture: Option<Vec<DeviceView>>,
}

impl ListCommand {
    /// Creates the command.
    pub fn new(kind: ListKind, json: bool) -> Self {
        Self { kind, json }
    }
}

fn audio_views<I>(devices: I, default: Option<&AudioDevicePtr>) -> Vec<DeviceView>
where
    I: IntoIterator<Item = AudioDevicePtr>,
{
    devices
        .into_iter()
        .map(|device| DeviceView::new(&*device, Some(&device) == default))
        .collect()
}

fn video_views<I>(devices: I, default: Option<&VideoDevicePtr>) -> Vec<DeviceView>
where
    I: IntoIterator<Item = VideoDevicePtr>,
{
    devices
        .into_iter()
        .map(|device| DeviceView::new(&*device, Some(&device) == default))
        .collect()
}

impl Command for ListCommand {
    fn execute(&self, devices: &MediaDevices) -> CommandResult {
        let mut listing = Listing::default();

        if matches!(self.kind, ListKind::Audio | ListKind::All) {
            let default_capture = devices.default_audio_capture_device()?;
            let default_playback = devices.default_audio_playback_device()?;

            listing.audio_capture = Some(audio_views(
                devices.audio_capture_devices()?,
                default_capture.as_ref(),
            ));
            listing.audio_playback = Some(audio_views(
                devices.audio_playback_devices()?,
                default_playback.as_ref(),
            ));
        }

        if matches!(self.kind, ListKind::Video | ListKind::All) {
            let default_camera = devices.default_video_capture_device()?;

            listing.video_capture = Some(video_views(
                devices.video_capture_devices()?,
                default_camera.as_ref(),
            ));
        }

        if self.json {
            return Ok(serde_json::to_string_pretty(&listing)?);
        }

        let sections = [
            ("Audio capture", &listing.audio_capture),
            ("Audio playback", &listing.audio_playback),
            ("Video capture", &listing.video_capture),
        ];

        Ok(sections
            .iter()
            .filter_map(|(title, views)| {
                views
                    .as_ref()
                    .map(|views| format_device_table(title, views))
            })
            .collect::<Vec<_>>()
            .join("\n"))
    }
}
