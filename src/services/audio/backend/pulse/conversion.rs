use std::borrow::Cow;

use libpulse_binding::{
    context::introspect::{SinkInfo, SourceInfo},
    proplist::Proplist,
};

use crate::services::{
    audio::AudioDevice,
    common::{Device, DeviceFormFactor, DeviceTransport, DirectionType},
};

const PROP_FORM_FACTOR: &str = "device.form_factor";
const PROP_BUS: &str = "device.bus";
const PROP_CLASS: &str = "device.class";

fn cow_str_to_string(cow_str: Option<&Cow<str>>) -> String {
    cow_str.map(|s| s.to_string()).unwrap_or_default()
}

/// Maps the `device.form_factor` property.
pub(super) fn form_factor_from_property(value: &str) -> DeviceFormFactor {
    match value {
        "speaker" | "hifi" | "tv" | "car" | "portable" => DeviceFormFactor::Speaker,
        "headphone" => DeviceFormFactor::Headphone,
        "headset" | "handset" | "hands-free" => DeviceFormFactor::Headset,
        "microphone" | "webcam" => DeviceFormFactor::Microphone,
        _ => DeviceFormFactor::Unknown,
    }
}

/// Derives the transport from `device.bus`, `device.class` and the names
/// of the device and its active port.
pub(super) fn transport_from_properties(
    bus: Option<&str>,
    class: Option<&str>,
    labels: &[&str],
) -> DeviceTransport {
    let mentions = |needle: &str| {
        labels
            .iter()
            .any(|label| label.to_ascii_lowercase().contains(needle))
    };

    if mentions("hdmi") {
        return DeviceTransport::Hdmi;
    }
    if mentions("displayport") {
        return DeviceTransport::DisplayPort;
    }

    match bus {
        Some("usb") => DeviceTransport::Usb,
        Some("bluetooth") => DeviceTransport::Bluetooth,
        Some("pci") => DeviceTransport::Pci,
        Some("isa" | "platform") => DeviceTransport::BuiltIn,
        Some("network") => DeviceTransport::Network,
        _ => match class {
            Some("abstract" | "filter") => DeviceTransport::Virtual,
            _ => DeviceTransport::Unknown,
        },
    }
}

fn classified_device(
    name: Option<&Cow<str>>,
    description: Option<&Cow<str>>,
    active_port: Option<String>,
    proplist: &Proplist,
) -> Option<Device> {
    let descriptor = cow_str_to_string(name);
    if descriptor.is_empty() {
        return None;
    }

    let mut display_name = cow_str_to_string(description);
    if display_name.is_empty() {
        display_name.clone_from(&descriptor);
    }

    let bus = proplist.get_str(PROP_BUS);
    let class = proplist.get_str(PROP_CLASS);
    let port = active_port.unwrap_or_default();

    let transport = transport_from_properties(
        bus.as_deref(),
        class.as_deref(),
        &[descriptor.as_str(), display_name.as_str(), port.as_str()],
    );
    let form_factor = proplist
        .get_str(PROP_FORM_FACTOR)
        .map(|value| form_factor_from_property(&value))
        .unwrap_or_default();

    Some(
        Device::new(display_name, descriptor)
            .with_transport(transport)
            .with_form_factor(form_factor),
    )
}

/// Creates a capture device from a source. Monitor sources of sinks are
/// not capture devices and yield `None`.
pub(super) fn audio_device_from_source(source_info: &SourceInfo) -> Option<AudioDevice> {
    if source_info.monitor_of_sink.is_some() {
        return None;
    }

    let active_port = source_info
        .active_port
        .as_ref()
        .and_then(|p| p.name.as_ref().map(|s| s.to_string()));

    classified_device(
        source_info.name.as_ref(),
        source_info.description.as_ref(),
        active_port,
        &source_info.proplist,
    )
    .map(|device| AudioDevice::new(device, DirectionType::Capture))
}

/// Creates a playback device from a sink.
pub(super) fn audio_device_from_sink(sink_info: &SinkInfo) -> Option<AudioDevice> {
    let active_port = sink_info
        .active_port
        .as_ref()
        .and_then(|p| p.name.as_ref().map(|s| s.to_string()));

    classified_device(
        sink_info.name.as_ref(),
        sink_info.description.as_ref(),
        active_port,
        &sink_info.proplist,
    )
    .map(|device| AudioDevice::new(device, DirectionType::Render))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hdmi_in_port_name_wins_over_bus() {
        let transport = transport_from_properties(
            Some("pci"),
            Some("sound"),
            &["alsa_output.pci-0000_00_1f.3.hdmi-stereo", "Built-in Audio", ""],
        );

        assert_eq!(transport, DeviceTransport::Hdmi);
    }

    #[test]
    fn bus_property_maps_to_transport() {
        assert_eq!(
            transport_from_properties(Some("usb"), None, &["Webcam"]),
            DeviceTransport::Usb
        );
        assert_eq!(
            transport_from_properties(Some("bluetooth"), None, &["WH-1000XM4"]),
            DeviceTransport::Bluetooth
        );
    }

    #[test]
    fn null_sinks_are_virtual() {
        assert_eq!(
            transport_from_properties(None, Some("abstract"), &["Null Output"]),
            DeviceTransport::Virtual
        );
        assert_eq!(
            transport_from_properties(None, None, &["Mystery"]),
            DeviceTransport::Unknown
        );
    }

    #[test]
    fn form_factor_values() {
        assert_eq!(form_factor_from_property("headset"), DeviceFormFactor::Headset);
        assert_eq!(form_factor_from_property("webcam"), DeviceFormFactor::Microphone);
        assert_eq!(form_factor_from_property("internal"), DeviceFormFactor::Unknown);
    }
}
