use std::sync::Arc;

use futures::StreamExt;
use tokio::{pin, signal};
use tracing::{debug, info};

use crate::{
    cli::{
        CliError,
        formatting::{EventView, format_event, format_header},
    },
    services::{DeviceHotplugListener, DevicePtr, MediaDevices},
};

/// Traces listener callbacks next to the printed event stream.
struct Presence;

impl DeviceHotplugListener for Presence {
    fn device_connected(&self, device: DevicePtr) {
        debug!(device = %device.device(), "watch: connected");
    }

    fn device_disconnected(&self, device: DevicePtr) {
        debug!(device = %device.device(), "watch: disconnected");
    }
}

/// Prints device events until Ctrl-C.
///
/// Backends only apply deltas once enumerated, so both managers are queried
/// before the first event is awaited.
///
/// # Errors
/// Returns error if the initial enumeration fails or output cannot be
/// rendered
pub async fn watch(devices: &MediaDevices, json: bool) -> Result<(), CliError> {
    let events = devices.events();
    pin!(events);

    let listener: Arc<dyn DeviceHotplugListener> = Arc::new(Presence);
    devices.add_device_change_listener(&listener);

    let audio = devices.audio_capture_devices()?.len() + devices.audio_playback_devices()?.len();
    let video = devices.video_capture_devices()?.len();

    if !json {
        println!(
            "{} ({audio} audio, {video} video devices, Ctrl-C to stop)",
            format_header("Watching for device changes")
        );
    }

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Interrupted, stopping watch");
                break;
            }
            event = events.next() => {
                let Some(event) = event else {
                    break;
                };

                if json {
                    println!("{}", serde_json::to_string(&EventView::from(&event))?);
                } else {
                    println!("{}", format_event(&event));
                }
            }
        }
    }

    devices.remove_device_change_listener(&listener);
    Ok(())
}
