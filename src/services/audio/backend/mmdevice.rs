#![allow(unsafe_code)]

use std::sync::Arc;

use tracing::{debug, instrument, trace, warn};
use windows::{
    Win32::{
        Devices::FunctionDiscovery::PKEY_Device_FriendlyName,
        Media::Audio::{
            DEVICE_STATE_ACTIVE, DEVICE_STATE_DISABLED, DEVICE_STATE_NOTPRESENT,
            DEVICE_STATE_UNPLUGGED, EDataFlow, ERole, IMMDevice, IMMDeviceEnumerator, IMMEndpoint,
            IMMNotificationClient, IMMNotificationClient_Impl, MMDeviceEnumerator,
            PKEY_AudioEndpoint_FormFactor, eCapture, eConsole, eRender,
        },
        System::{
            Com::{
                CLSCTX_ALL, CoCreateInstance, STGM_READ,
                StructuredStorage::{PROPVARIANT, PropVariantClear},
            },
            Variant::{VT_LPWSTR, VT_UI4},
        },
        UI::Shell::PropertiesSystem::PROPERTYKEY,
    },
    core::{ComInterface, PCWSTR, implement},
};

use crate::services::{
    DeviceError,
    audio::{AudioDevice, AudioDeviceManager, AudioDeviceState},
    common::{
        Device, DeviceFormFactor, DeviceTransport, DirectionType, Lifecycle,
        com::{Agile, MtaUsage, take_co_string},
        descriptor::same_endpoint_id,
    },
};

const BACKEND: &str = "MMDevice";

/// Values of `EndpointFormFactor`
mod form_factor {
    pub const REMOTE_NETWORK_DEVICE: u32 = 0;
    pub const SPEAKERS: u32 = 1;
    pub const LINE_LEVEL: u32 = 2;
    pub const HEADPHONES: u32 = 3;
    pub const MICROPHONE: u32 = 4;
    pub const HEADSET: u32 = 5;
    pub const HANDSET: u32 = 6;
    pub const SPDIF: u32 = 8;
    pub const DIGITAL_AUDIO_DISPLAY_DEVICE: u32 = 9;
}

struct Shared {
    state: AudioDeviceState,
    lifecycle: Lifecycle,
    enumerator: Agile<IMMDeviceEnumerator>,
}

impl Shared {
    fn enumerate(&self) -> Result<(), DeviceError> {
        let directions = [DirectionType::Capture, DirectionType::Render];
        self.state
            .insert_scanned(directions.into_iter().map(|direction| self.scan(direction)))?;

        for direction in directions {
            self.resolve_default(direction);
        }
        Ok(())
    }

    fn scan(&self, direction: DirectionType) -> Result<Vec<AudioDevice>, DeviceError> {
        let Some(flow) = data_flow(direction) else {
            return Ok(Vec::new());
        };

        // SAFETY: plain COM calls on a live enumerator.
        let devices = unsafe {
            let collection = self
                .enumerator
                .EnumAudioEndpoints(flow, DEVICE_STATE_ACTIVE)
                .map_err(|e| DeviceError::query(BACKEND, e))?;
            let count = collection
                .GetCount()
                .map_err(|e| DeviceError::query(BACKEND, e))?;

            (0..count)
                .filter_map(|index| collection.Item(index).ok())
                .filter_map(|device| describe(&device, direction))
                .collect::<Vec<_>>()
        };

        trace!(%direction, count = devices.len(), "MMDevice scan");
        Ok(devices)
    }

    fn resolve_default(&self, direction: DirectionType) {
        let Some(flow) = data_flow(direction) else {
            return;
        };

        // SAFETY: fails with E_NOTFOUND when no endpoint of `flow` exists.
        let default_id = unsafe { self.enumerator.GetDefaultAudioEndpoint(flow, eConsole) }
            .ok()
            .and_then(|device| endpoint_id(&device));

        self.resolve_default_id(direction, default_id.as_deref());
    }

    fn resolve_default_id(&self, direction: DirectionType, id: Option<&str>) {
        match id {
            Some(id) => {
                let resolved = self.state.resolve_default_device(direction, |device| {
                    same_endpoint_id(device.descriptor(), id)
                });
                if resolved.is_none() {
                    warn!(id, %direction, "Default endpoint is not listed");
                }
            }
            None => {
                self.state.set_default_device(direction, None);
            }
        }
    }

    fn device_by_id(&self, id: &str) -> Option<IMMDevice> {
        let wide: Vec<u16> = id.encode_utf16().chain(Some(0)).collect();

        // SAFETY: `wide` is NUL terminated and outlives the call.
        unsafe { self.enumerator.GetDevice(PCWSTR(wide.as_ptr())) }.ok()
    }

    fn add_device(&self, id: &str) {
        let Some(device) = self.device_by_id(id) else {
            debug!(id, "Endpoint vanished before it could be read");
            return;
        };

        if !is_active(&device) {
            return;
        }

        let Some(direction) = endpoint_direction(&device) else {
            return;
        };

        if let Some(audio_device) = describe(&device, direction) {
            self.state.connect_device(Arc::new(audio_device));
            // The default change for this endpoint may have arrived before it
            // was listed.
            self.resolve_default(direction);
        }
    }

    fn remove_device(&self, id: &str) {
        for direction in [DirectionType::Capture, DirectionType::Render] {
            self.state
                .disconnect_device(direction, |device| same_endpoint_id(device.descriptor(), id));
        }
    }

    fn on_state_changed(&self, id: &str, new_state: u32) {
        if !self.lifecycle.is_ready() {
            return;
        }

        match new_state {
            DEVICE_STATE_ACTIVE => self.add_device(id),
            DEVICE_STATE_DISABLED | DEVICE_STATE_NOTPRESENT | DEVICE_STATE_UNPLUGGED => {
                self.remove_device(id);
            }
            _ => trace!(id, new_state, "Ignoring endpoint state"),
        }
    }

    fn on_added(&self, id: &str) {
        if self.lifecycle.is_ready() {
            self.add_device(id);
        }
    }

    fn on_removed(&self, id: &str) {
        if self.lifecycle.is_ready() {
            self.remove_device(id);
        }
    }

    fn on_default_changed(&self, flow: EDataFlow, role: ERole, id: Option<&str>) {
        if !self.lifecycle.is_ready() || role != eConsole {
            return;
        }

        let direction = match flow {
            f if f == eCapture => DirectionType::Capture,
            f if f == eRender => DirectionType::Render,
            _ => return,
        };

        self.resolve_default_id(direction, id);
    }
}

#[implement(IMMNotificationClient)]
struct NotificationClient {
    shared: Arc<Shared>,
}

fn wide_arg(value: &PCWSTR) -> Option<String> {
    if value.is_null() {
        return None;
    }

    // SAFETY: the endpoint ID passed to the callback is NUL terminated.
    unsafe { value.to_string() }.ok()
}

impl IMMNotificationClient_Impl for NotificationClient {
    fn OnDeviceStateChanged(&self, device_id: &PCWSTR, new_state: u32) -> windows::core::Result<()> {
        if let Some(id) = wide_arg(device_id) {
            self.shared.on_state_changed(&id, new_state);
        }
        Ok(())
    }

    fn OnDeviceAdded(&self, device_id: &PCWSTR) -> windows::core::Result<()> {
        if let Some(id) = wide_arg(device_id) {
            self.shared.on_added(&id);
        }
        Ok(())
    }

    fn OnDeviceRemoved(&self, device_id: &PCWSTR) -> windows::core::Result<()> {
        if let Some(id) = wide_arg(device_id) {
            self.shared.on_removed(&id);
        }
        Ok(())
    }

    fn OnDefaultDeviceChanged(
        &self,
        flow: EDataFlow,
        role: ERole,
        default_device_id: &PCWSTR,
    ) -> windows::core::Result<()> {
        let id = wide_arg(default_device_id);
        self.shared.on_default_changed(flow, role, id.as_deref());
        Ok(())
    }

    fn OnPropertyValueChanged(
        &self,
        _device_id: &PCWSTR,
        _key: &PROPERTYKEY,
    ) -> windows::core::Result<()> {
        Ok(())
    }
}

/// Audio endpoints of the Windows MMDevice API.
///
/// Endpoint notifications arrive on a system thread through an
/// `IMMNotificationClient`. Descriptors are endpoint IDs, compared without
/// regard to case.
pub struct MmDeviceAudioDeviceManager {
    shared: Arc<Shared>,
    client: Agile<IMMNotificationClient>,
    _mta: MtaUsage,
}

impl MmDeviceAudioDeviceManager {
    /// Creates the enumerator and registers for endpoint notifications.
    ///
    /// # Errors
    /// Returns error if COM or the enumerator cannot be set up
    #[instrument]
    pub fn new() -> Result<Self, DeviceError> {
        let mta = MtaUsage::acquire().map_err(|e| DeviceError::initialization(BACKEND, e))?;

        // SAFETY: the MTA is alive for the lifetime of the manager.
        let enumerator: IMMDeviceEnumerator =
            unsafe { CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL) }
                .map_err(|e| DeviceError::initialization(BACKEND, e))?;

        let shared = Arc::new(Shared {
            state: AudioDeviceState::new(),
            lifecycle: Lifecycle::new(),
            enumerator: Agile::new(enumerator),
        });

        let client: IMMNotificationClient = NotificationClient {
            shared: Arc::clone(&shared),
        }
        .into();

        // SAFETY: the client stays registered until Drop unregisters it.
        unsafe {
            shared
                .enumerator
                .RegisterEndpointNotificationCallback(&client)
        }
        .map_err(|e| DeviceError::initialization(BACKEND, e))?;

        Ok(Self {
            shared,
            client: Agile::new(client),
            _mta: mta,
        })
    }
}

impl AudioDeviceManager for MmDeviceAudioDeviceManager {
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

impl Drop for MmDeviceAudioDeviceManager {
    fn drop(&mut self) {
        if !self.shared.lifecycle.begin_dispose() {
            return;
        }

        // SAFETY: the same client that was registered in `new`.
        let result = unsafe {
            self.shared
                .enumerator
                .UnregisterEndpointNotificationCallback(&*self.client)
        };
        if let Err(e) = result {
            warn!(error = %e, "Unregistering endpoint notifications failed");
        }

        self.shared.lifecycle.mark_stopped();
        debug!("MMDevice manager stopped");
    }
}

fn data_flow(direction: DirectionType) -> Option<EDataFlow> {
    match direction {
        DirectionType::Capture => Some(eCapture),
        DirectionType::Render => Some(eRender),
        DirectionType::Unknown => None,
    }
}

fn endpoint_id(device: &IMMDevice) -> Option<String> {
    // SAFETY: the returned string is freed by `take_co_string`.
    unsafe { device.GetId() }.ok().and_then(take_co_string)
}

fn is_active(device: &IMMDevice) -> bool {
    // SAFETY: plain COM call.
    unsafe { device.GetState() }.is_ok_and(|state| state == DEVICE_STATE_ACTIVE)
}

fn endpoint_direction(device: &IMMDevice) -> Option<DirectionType> {
    let endpoint: IMMEndpoint = device.cast().ok()?;

    // SAFETY: plain COM call.
    match unsafe { endpoint.GetDataFlow() }.ok()? {
        f if f == eCapture => Some(DirectionType::Capture),
        f if f == eRender => Some(DirectionType::Render),
        _ => None,
    }
}

/// Reads a property into a value, clearing the variant afterwards.
fn read_property<T>(
    device: &IMMDevice,
    key: &PROPERTYKEY,
    read: impl FnOnce(&PROPVARIANT) -> Option<T>,
) -> Option<T> {
    // SAFETY: read-only property store access; the variant is cleared before
    // it goes out of scope.
    unsafe {
        let store = device.OpenPropertyStore(STGM_READ).ok()?;
        let mut value = store.GetValue(key).ok()?;
        let result = read(&value);
        let _ = PropVariantClear(&mut value);
        result
    }
}

fn friendly_name(device: &IMMDevice) -> Option<String> {
    read_property(device, &PKEY_Device_FriendlyName, |value| {
        // SAFETY: the union is read according to its type tag.
        unsafe {
            let inner = &value.Anonymous.Anonymous;
            if inner.vt != VT_LPWSTR {
                return None;
            }
            inner.Anonymous.pwszVal.to_string().ok()
        }
    })
}

fn form_factor_code(device: &IMMDevice) -> Option<u32> {
    read_property(device, &PKEY_AudioEndpoint_FormFactor, |value| {
        // SAFETY: the union is read according to its type tag.
        unsafe {
            let inner = &value.Anonymous.Anonymous;
            (inner.vt == VT_UI4).then(|| inner.Anonymous.ulVal)
        }
    })
}

/// Splits an `EndpointFormFactor` into shape and connection.
pub(crate) fn classify_form_factor(code: u32) -> (DeviceFormFactor, DeviceTransport) {
    use form_factor::*;

    match code {
        REMOTE_NETWORK_DEVICE => (DeviceFormFactor::Unknown, DeviceTransport::Network),
        SPEAKERS => (DeviceFormFactor::Speaker, DeviceTransport::Unknown),
        HEADPHONES => (DeviceFormFactor::Headphone, DeviceTransport::Unknown),
        MICROPHONE => (DeviceFormFactor::Microphone, DeviceTransport::Unknown),
        HEADSET | HANDSET => (DeviceFormFactor::Headset, DeviceTransport::Unknown),
        DIGITAL_AUDIO_DISPLAY_DEVICE => (DeviceFormFactor::Unknown, DeviceTransport::Hdmi),
        LINE_LEVEL | SPDIF => (DeviceFormFactor::Unknown, DeviceTransport::Unknown),
        _ => (DeviceFormFactor::Unknown, DeviceTransport::Unknown),
    }
}

fn describe(device: &IMMDevice, direction: DirectionType) -> Option<AudioDevice> {
    let id = endpoint_id(device)?;
    let name = friendly_name(device)?;
    let (form_factor, transport) = form_factor_code(device)
        .map(classify_form_factor)
        .unwrap_or_default();

    let device = Device::new(name, id)
        .with_transport(transport)
        .with_form_factor(form_factor);

    Some(AudioDevice::new(device, direction))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_factors() {
        assert_eq!(
            classify_form_factor(form_factor::HEADSET),
            (DeviceFormFactor::Headset, DeviceTransport::Unknown)
        );
        assert_eq!(
            classify_form_factor(form_factor::DIGITAL_AUDIO_DISPLAY_DEVICE),
            (DeviceFormFactor::Unknown, DeviceTransport::Hdmi)
        );
        assert_eq!(
            classify_form_factor(form_factor::REMOTE_NETWORK_DEVICE),
            (DeviceFormFactor::Unknown, DeviceTransport::Network)
        );
        assert_eq!(
            classify_form_factor(42),
            (DeviceFormFactor::Unknown, DeviceTransport::Unknown)
        );
    }
}
