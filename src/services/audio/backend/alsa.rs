use std::{fs, sync::Arc};

use alsa::{
    Direction,
    card::{self, Card},
    ctl::{Ctl, DeviceIter},
};
use tracing::{debug, instrument, trace, warn};

use crate::{
    config::AudioConfig,
    services::{
        DeviceError,
        audio::{AudioDevice, AudioDeviceManager, AudioDeviceState},
        common::{Device, DeviceTransport, DirectionType, Lifecycle, PollMonitor},
    },
};

const BACKEND: &str = "ALSA";
const THREAD_NAME: &str = "avdev-alsa";

struct Shared {
    state: AudioDeviceState,
    lifecycle: Lifecycle,
}

impl Shared {
    fn enumerate(&self) -> Result<(), DeviceError> {
        let directions = [DirectionType::Capture, DirectionType::Render];
        self.state.insert_scanned(directions.into_iter().map(scan))?;
        Ok(())
    }

    fn rescan(&self) {
        if !self.lifecycle.is_ready() {
            return;
        }

        for direction in [DirectionType::Capture, DirectionType::Render] {
            match scan(direction) {
                Ok(present) => self.state.reconcile_devices(direction, present),
                Err(e) => warn!(error = %e, %direction, "ALSA rescan failed"),
            }
        }
    }
}

/// Audio devices of the ALSA PCM layer.
///
/// ALSA has no change notification for card arrival, so a monitor thread
/// rescans the cards periodically and applies the difference. ALSA has no
/// notion of a default device; both defaults stay `None`.
pub struct AlsaAudioDeviceManager {
    shared: Arc<Shared>,
    monitor: Option<PollMonitor>,
}

impl AlsaAudioDeviceManager {
    /// Starts the rescan thread. Nothing is enumerated until the first query.
    ///
    /// # Errors
    /// Returns error if the rescan thread cannot be spawned
    #[instrument(skip(config))]
    pub fn new(config: &AudioConfig) -> Result<Self, DeviceError> {
        let shared = Arc::new(Shared {
            state: AudioDeviceState::new(),
            lifecycle: Lifecycle::new(),
        });

        let monitored = Arc::clone(&shared);
        let monitor = PollMonitor::spawn(THREAD_NAME, config.alsa_poll_interval(), move || {
            monitored.rescan();
        })
        .map_err(|e| DeviceError::initialization(BACKEND, e))?;

        Ok(Self {
            shared,
            monitor: Some(monitor),
        })
    }
}

impl AudioDeviceManager for AlsaAudioDeviceManager {
    fn state(&self) -> &AudioDeviceState {
        &self.shared.state
    }

    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    fn ensure_enumerated(&self) -> Result<(), DeviceError> {
        self.shared.lifecycle.ensure_ready(|| self.shared.enumerate())
    }
}

impl Drop for AlsaAudioDeviceManager {
    fn drop(&mut self) {
        if !self.shared.lifecycle.begin_dispose() {
            return;
        }

        drop(self.monitor.take());
        self.shared.lifecycle.mark_stopped();
        debug!("ALSA manager stopped");
    }
}

fn alsa_direction(direction: DirectionType) -> Option<Direction> {
    match direction {
        DirectionType::Capture => Some(Direction::Capture),
        DirectionType::Render => Some(Direction::Playback),
        DirectionType::Unknown => None,
    }
}

/// Lists the PCM devices of every card that support `direction`.
fn scan(direction: DirectionType) -> Result<Vec<AudioDevice>, DeviceError> {
    let Some(stream) = alsa_direction(direction) else {
        return Ok(Vec::new());
    };

    let mut devices = Vec::new();

    for card in card::Iter::new() {
        let card = card.map_err(|e| DeviceError::query(BACKEND, e))?;
        devices.extend(scan_card(&card, direction, stream));
    }

    trace!(%direction, count = devices.len(), "ALSA scan");
    Ok(devices)
}

fn scan_card(card: &Card, direction: DirectionType, stream: Direction) -> Vec<AudioDevice> {
    let index = card.get_index();

    let ctl = match Ctl::from_card(card, false) {
        Ok(ctl) => ctl,
        Err(e) => {
            warn!(card = index, error = %e, "Cannot open ALSA control");
            return Vec::new();
        }
    };

    let info = match ctl.card_info() {
        Ok(info) => info,
        Err(e) => {
            warn!(card = index, error = %e, "Cannot read ALSA card info");
            return Vec::new();
        }
    };

    let card_name = info.get_name().unwrap_or_default().to_string();
    let driver = info.get_driver().unwrap_or_default().to_string();
    let usb_attached = card_on_usb(index);

    DeviceIter::new(&ctl)
        .filter_map(|pcm| {
            let pcm = u32::try_from(pcm).ok()?;
            // ENOENT here only means the PCM lacks this direction.
            let pcm_info = ctl.pcm_info(pcm, 0, stream).ok()?;
            let pcm_name = pcm_info.get_name().unwrap_or_default();

            let transport = card_transport(&driver, &card_name, pcm_name, usb_attached);
            let device = Device::new(
                pcm_display_name(&card_name, pcm_name),
                pcm_descriptor(index, pcm),
            )
            .with_transport(transport);

            Some(AudioDevice::new(device, direction))
        })
        .collect()
}

/// `plughw` descriptor so consumers get format conversion for free.
pub(crate) fn pcm_descriptor(card: i32, pcm: u32) -> String {
    format!("plughw:{card},{pcm}")
}

pub(crate) fn pcm_display_name(card_name: &str, pcm_name: &str) -> String {
    format!("{card_name} [{pcm_name}]")
}

fn card_on_usb(card: i32) -> bool {
    fs::read_link(format!("/sys/class/sound/card{card}/device"))
        .map(|target| {
            target
                .components()
                .any(|c| c.as_os_str().to_string_lossy().starts_with("usb"))
        })
        .unwrap_or(false)
}

/// Classifies a card by driver and names. HDMI wins over the bus so that
/// display audio on a PCI controller is reported as HDMI.
pub(crate) fn card_transport(
    driver: &str,
    card_name: &str,
    pcm_name: &str,
    usb_attached: bool,
) -> DeviceTransport {
    let names = format!("{card_name} {pcm_name}").to_ascii_lowercase();

    if names.contains("hdmi") {
        return DeviceTransport::Hdmi;
    }
    if names.contains("displayport") || names.contains(" dp ") {
        return DeviceTransport::DisplayPort;
    }

    match driver {
        "USB-Audio" => DeviceTransport::Usb,
        "Loopback" | "Dummy" | "Aloop" => DeviceTransport::Virtual,
        _ if usb_attached => DeviceTransport::Usb,
        d if d.starts_with("HDA") || d.starts_with("snd_hda") => DeviceTransport::Pci,
        _ => DeviceTransport::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_and_name_formats() {
        assert_eq!(pcm_descriptor(1, 3), "plughw:1,3");
        assert_eq!(
            pcm_display_name("HDA Intel PCH", "ALC892 Analog"),
            "HDA Intel PCH [ALC892 Analog]"
        );
    }

    #[test]
    fn hdmi_pcm_on_hda_controller() {
        assert_eq!(
            card_transport("HDA-Intel", "HDA Intel PCH", "HDMI 0", false),
            DeviceTransport::Hdmi
        );
        assert_eq!(
            card_transport("HDA-Intel", "HDA Intel PCH", "ALC892 Analog", false),
            DeviceTransport::Pci
        );
    }

    #[test]
    fn usb_and_virtual_cards() {
        assert_eq!(
            card_transport("USB-Audio", "C920", "USB Audio", true),
            DeviceTransport::Usb
        );
        assert_eq!(
            card_transport("snd_usb_x", "Headset", "PCM", true),
            DeviceTransport::Usb
        );
        assert_eq!(
            card_transport("Loopback", "Loopback", "Loopback PCM", false),
            DeviceTransport::Virtual
        );
        assert_eq!(
            card_transport("", "Mystery", "PCM", false),
            DeviceTransport::Unknown
        );
    }
}
