#![allow(unsafe_code)]

use std::{ffi::c_void, mem, ptr, slice, sync::Arc};

use core_foundation::{
    base::TCFType,
    string::{CFString, CFStringRef},
};
use coreaudio_sys::{
    AudioBuffer, AudioBufferList, AudioObjectAddPropertyListener, AudioObjectGetPropertyData,
    AudioObjectGetPropertyDataSize, AudioObjectID, AudioObjectPropertyAddress,
    AudioObjectRemovePropertyListener, OSStatus, kAudioDevicePropertyStreamConfiguration,
    kAudioDevicePropertyTransportType, kAudioHardwarePropertyDefaultInputDevice,
    kAudioHardwarePropertyDefaultOutputDevice, kAudioHardwarePropertyDevices,
    kAudioObjectPropertyElementMaster, kAudioObjectPropertyElementWildcard,
    kAudioObjectPropertyName, kAudioObjectPropertyScopeGlobal, kAudioObjectPropertyScopeInput,
    kAudioObjectPropertyScopeOutput, kAudioObjectPropertyScopeWildcard,
    kAudioObjectPropertySelectorWildcard, kAudioObjectSystemObject,
};
use tracing::{debug, instrument, trace, warn};

use crate::services::{
    DeviceError,
    audio::{AudioDevice, AudioDeviceManager, AudioDeviceState},
    common::{
        Device, DeviceTransport, DirectionType, Lifecycle,
        descriptor::{object_id_descriptor, parse_object_id},
    },
};

const BACKEND: &str = "CoreAudio";
const NO_ERR: OSStatus = 0;

struct Shared {
    state: AudioDeviceState,
    lifecycle: Lifecycle,
}

impl Shared {
    fn enumerate(&self) -> Result<(), DeviceError> {
        let directions = [DirectionType::Capture, DirectionType::Render];
        self.state.insert_scanned(directions.into_iter().map(scan))?;

        for direction in directions {
            self.resolve_default(direction);
        }
        Ok(())
    }

    fn resolve_default(&self, direction: DirectionType) {
        match default_device_id(direction) {
            Some(id) => {
                let resolved = self.state.resolve_default_device(direction, |device| {
                    parse_object_id(device.descriptor()) == Some(id)
                });
                if resolved.is_none() {
                    warn!(id, %direction, "Default device is not listed");
                }
            }
            None => {
                self.state.set_default_device(direction, None);
            }
        }
    }

    fn on_devices_changed(&self) {
        for direction in [DirectionType::Capture, DirectionType::Render] {
            match scan(direction) {
                Ok(present) => self.state.reconcile_devices(direction, present),
                Err(e) => warn!(error = %e, %direction, "CoreAudio rescan failed"),
            }
            self.resolve_default(direction);
        }
    }

    fn on_property_changed(&self, selector: u32) {
        if !self.lifecycle.is_ready() {
            return;
        }

        match selector {
            kAudioHardwarePropertyDevices => self.on_devices_changed(),
            kAudioHardwarePropertyDefaultInputDevice => {
                self.resolve_default(DirectionType::Capture);
            }
            kAudioHardwarePropertyDefaultOutputDevice => {
                self.resolve_default(DirectionType::Render);
            }
            _ => trace!(selector, "Ignoring CoreAudio property change"),
        }
    }
}

/// Audio devices of the macOS HAL.
///
/// A wildcard property listener on the system object delivers device list
/// and default device changes on a CoreAudio thread. Descriptors are the
/// decimal `AudioObjectID`. The listener's context stays allocated after
/// the manager is dropped.
pub struct CoreAudioDeviceManager {
    shared: Arc<Shared>,
}

impl CoreAudioDeviceManager {
    /// Registers the system object listener.
    ///
    /// # Errors
    /// Returns error if the HAL refuses the listener
    #[instrument]
    pub fn new() -> Result<Self, DeviceError> {
        let shared = Arc::new(Shared {
            state: AudioDeviceState::new(),
            lifecycle: Lifecycle::new(),
        });

        let client_data = Arc::into_raw(Arc::clone(&shared)) as *mut c_void;
        let wildcard = wildcard_address();

        // SAFETY: client_data owns a strong count on `Shared` that is never
        // released, so the pointer stays valid for any callback.
        let status = unsafe {
            AudioObjectAddPropertyListener(
                kAudioObjectSystemObject,
                &wildcard,
                Some(property_listener),
                client_data,
            )
        };

        if status != NO_ERR {
            // SAFETY: the listener was not registered, reclaim the count.
            unsafe { Arc::decrement_strong_count(client_data as *const Shared) };
            return Err(DeviceError::initialization(
                BACKEND,
                format!("add property listener failed: status {status}"),
            ));
        }

        Ok(Self { shared })
    }
}

impl AudioDeviceManager for CoreAudioDeviceManager {
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

impl Drop for CoreAudioDeviceManager {
    fn drop(&mut self) {
        if !self.shared.lifecycle.begin_dispose() {
            return;
        }

        let client_data = Arc::as_ptr(&self.shared);
        let wildcard = wildcard_address();

        // SAFETY: same system object, address, proc and client data as in `new`.
        let status = unsafe {
            AudioObjectRemovePropertyListener(
                kAudioObjectSystemObject,
                &wildcard,
                Some(property_listener),
                client_data as *mut c_void,
            )
        };

        // The HAL does not wait for a callback already running when the
        // listener is removed, so the strong count taken in `new` is kept.
        // Late callbacks see a stopped lifecycle and return.
        if status != NO_ERR {
            warn!(status, "Removing CoreAudio listener failed");
        }

        self.shared.lifecycle.mark_stopped();
        debug!("CoreAudio manager stopped");
    }
}

unsafe extern "C" fn property_listener(
    _object_id: AudioObjectID,
    number_addresses: u32,
    addresses: *const AudioObjectPropertyAddress,
    client_data: *mut c_void,
) -> OSStatus {
    if client_data.is_null() || addresses.is_null() {
        return NO_ERR;
    }

    // SAFETY: registered with a pointer from `Arc::into_raw` whose count is
    // never released.
    let shared = unsafe { &*(client_data as *const Shared) };
    // SAFETY: the HAL passes `number_addresses` valid entries.
    let addresses = unsafe { slice::from_raw_parts(addresses, number_addresses as usize) };

    for address in addresses {
        shared.on_property_changed(address.mSelector);
    }

    NO_ERR
}

fn wildcard_address() -> AudioObjectPropertyAddress {
    AudioObjectPropertyAddress {
        mSelector: kAudioObjectPropertySelectorWildcard,
        mScope: kAudioObjectPropertyScopeWildcard,
        mElement: kAudioObjectPropertyElementWildcard,
    }
}

fn global_address(selector: u32) -> AudioObjectPropertyAddress {
    AudioObjectPropertyAddress {
        mSelector: selector,
        mScope: kAudioObjectPropertyScopeGlobal,
        mElement: kAudioObjectPropertyElementMaster,
    }
}

fn scope(direction: DirectionType) -> Option<u32> {
    match direction {
        DirectionType::Capture => Some(kAudioObjectPropertyScopeInput),
        DirectionType::Render => Some(kAudioObjectPropertyScopeOutput),
        DirectionType::Unknown => None,
    }
}

fn read_scalar<T: Default>(object: AudioObjectID, address: &AudioObjectPropertyAddress) -> Option<T> {
    let mut value = T::default();
    let mut size = mem::size_of::<T>() as u32;

    // SAFETY: `value` is a writable buffer of `size` bytes.
    let status = unsafe {
        AudioObjectGetPropertyData(
            object,
            address,
            0,
            ptr::null(),
            &mut size,
            (&mut value as *mut T).cast(),
        )
    };

    (status == NO_ERR).then_some(value)
}

fn device_ids() -> Result<Vec<AudioObjectID>, DeviceError> {
    let address = global_address(kAudioHardwarePropertyDevices);
    let mut size = 0u32;

    // SAFETY: size query on the system object.
    let status = unsafe {
        AudioObjectGetPropertyDataSize(kAudioObjectSystemObject, &address, 0, ptr::null(), &mut size)
    };
    if status != NO_ERR {
        return Err(DeviceError::query(BACKEND, format!("device list size: status {status}")));
    }

    let count = size as usize / mem::size_of::<AudioObjectID>();
    let mut ids: Vec<AudioObjectID> = vec![0; count];

    // SAFETY: `ids` holds `size` bytes.
    let status = unsafe {
        AudioObjectGetPropertyData(
            kAudioObjectSystemObject,
            &address,
            0,
            ptr::null(),
            &mut size,
            ids.as_mut_ptr().cast(),
        )
    };
    if status != NO_ERR {
        return Err(DeviceError::query(BACKEND, format!("device list: status {status}")));
    }

    ids.truncate(size as usize / mem::size_of::<AudioObjectID>());
    Ok(ids)
}

fn device_name(id: AudioObjectID) -> Option<String> {
    let address = global_address(kAudioObjectPropertyName);
    let name_ref: CFStringRef = read_scalar::<usize>(id, &address)? as CFStringRef;

    if name_ref.is_null() {
        return None;
    }

    // SAFETY: the HAL returns a retained CFString the caller must release.
    let name = unsafe { CFString::wrap_under_create_rule(name_ref) };
    Some(name.to_string())
}

fn channel_count(id: AudioObjectID, scope: u32) -> u32 {
    let address = AudioObjectPropertyAddress {
        mSelector: kAudioDevicePropertyStreamConfiguration,
        mScope: scope,
        mElement: kAudioObjectPropertyElementMaster,
    };
    let mut size = 0u32;

    // SAFETY: size query on a device object.
    let status = unsafe { AudioObjectGetPropertyDataSize(id, &address, 0, ptr::null(), &mut size) };
    if status != NO_ERR || (size as usize) < mem::size_of::<AudioBufferList>() {
        return 0;
    }

    // u64 storage keeps the buffer list suitably aligned.
    let mut storage = vec![0u64; (size as usize).div_ceil(mem::size_of::<u64>())];
    let list = storage.as_mut_ptr().cast::<AudioBufferList>();

    // SAFETY: `storage` holds at least `size` bytes.
    let status =
        unsafe { AudioObjectGetPropertyData(id, &address, 0, ptr::null(), &mut size, list.cast()) };
    if status != NO_ERR {
        return 0;
    }

    // SAFETY: the HAL filled a buffer list with `mNumberBuffers` entries.
    let buffers: &[AudioBuffer] = unsafe {
        let list = &*list;
        slice::from_raw_parts(list.mBuffers.as_ptr(), list.mNumberBuffers as usize)
    };

    buffers.iter().map(|buffer| buffer.mNumberChannels).sum()
}

fn device_transport(id: AudioObjectID) -> DeviceTransport {
    read_scalar::<u32>(id, &global_address(kAudioDevicePropertyTransportType))
        .map(DeviceTransport::from_four_char_code)
        .unwrap_or_default()
}

fn default_device_id(direction: DirectionType) -> Option<AudioObjectID> {
    let selector = match direction {
        DirectionType::Capture => kAudioHardwarePropertyDefaultInputDevice,
        DirectionType::Render => kAudioHardwarePropertyDefaultOutputDevice,
        DirectionType::Unknown => return None,
    };

    read_scalar::<AudioObjectID>(kAudioObjectSystemObject, &global_address(selector))
        .filter(|id| *id != 0)
}

fn create_device(id: AudioObjectID, direction: DirectionType) -> Option<AudioDevice> {
    let scope = scope(direction)?;
    if channel_count(id, scope) == 0 {
        return None;
    }

    let name = device_name(id)?;
    let device = Device::new(name, object_id_descriptor(id)).with_transport(device_transport(id));

    Some(AudioDevice::new(device, direction))
}

fn scan(direction: DirectionType) -> Result<Vec<AudioDevice>, DeviceError> {
    let devices: Vec<AudioDevice> = device_ids()?
        .into_iter()
        .filter_map(|id| create_device(id, direction))
        .collect();

    trace!(%direction, count = devices.len(), "CoreAudio scan");
    Ok(devices)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::services::common::BackendState;

    #[test]
    fn late_callback_after_drop_is_ignored() {
        let manager = CoreAudioDeviceManager::new().unwrap();
        let context = Arc::downgrade(&manager.shared);

        drop(manager);

        let shared = context.upgrade().unwrap();
        assert_eq!(shared.lifecycle.state(), BackendState::Stopped);

        let address = global_address(kAudioHardwarePropertyDevices);
        // SAFETY: the pointer comes from a live `Arc<Shared>`.
        let status = unsafe {
            property_listener(
                kAudioObjectSystemObject,
                1,
                &address,
                Arc::as_ptr(&shared) as *mut c_void,
            )
        };

        assert_eq!(status, NO_ERR);
        assert!(shared.state.capture_devices().is_empty());
    }
}
