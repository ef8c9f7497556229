use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

const MIN_POLL_INTERVAL_MS: u64 = 50;

/// Audio device backend selection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AudioBackendKind {
    /// Platform default: PulseAudio on Linux (ALSA when no sound server is
    /// reachable), CoreAudio on macOS, MMDevice on Windows.
    #[default]
    Auto,
    /// PulseAudio or a PulseAudio compatible server such as PipeWire
    PulseAudio,
    /// ALSA cards polled for changes
    Alsa,
    /// macOS CoreAudio
    CoreAudio,
    /// Windows MMDevice API
    MmDevice,
}

/// Audio device manager configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    /// Which audio backend to use.
    pub backend: AudioBackendKind,

    /// How often the ALSA backend rescans cards, in milliseconds.
    pub alsa_poll_interval_ms: u64,

    /// Client name announced to the PulseAudio server.
    pub pulse_application_name: String,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            backend: AudioBackendKind::Auto,
            alsa_poll_interval_ms: 1000,
            pulse_application_name: String::from("avdev"),
        }
    }
}

impl AudioConfig {
    /// ALSA rescan period, clamped to a sane minimum.
    pub fn alsa_poll_interval(&self) -> Duration {
        Duration::from_millis(self.alsa_poll_interval_ms.max(MIN_POLL_INTERVAL_MS))
    }
}

/// Video device manager configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VideoConfig {
    /// Directory holding V4L2 device nodes.
    pub device_dir: PathBuf,

    /// How many times a freshly created node is probed before the arrival
    /// is dropped.
    pub probe_retries: u32,

    /// Delay between probes of a freshly created node, in milliseconds.
    pub probe_retry_delay_ms: u64,

    /// How often the AVFoundation backend rescans cameras, in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            device_dir: PathBuf::from("/dev"),
            probe_retries: 5,
            probe_retry_delay_ms: 100,
            poll_interval_ms: 1000,
        }
    }
}

impl VideoConfig {
    /// Delay between probes of a freshly created node.
    pub fn probe_retry_delay(&self) -> Duration {
        Duration::from_millis(self.probe_retry_delay_ms)
    }

    /// AVFoundation rescan period, clamped to a sane minimum.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(MIN_POLL_INTERVAL_MS))
    }
}
