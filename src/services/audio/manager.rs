use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tokio::sync::broadcast;
use tracing::debug;

use super::AudioDevice;
use crate::services::{
    DeviceError,
    common::{
        DeviceEvent, DeviceHotplugListener, DeviceList, DeviceManager, DevicePtr, DirectionType,
        MediaKind,
    },
};

/// Shared handle to an audio device
pub type AudioDevicePtr = Arc<AudioDevice>;

/// Thread-safe storage for a default audio device
pub type DefaultAudioDevice = Mutex<Option<AudioDevicePtr>>;

/// Device lists, default devices and listener registry of an audio backend.
///
/// Backends mutate this state from their notification thread and the trait
/// methods of [`AudioDeviceManager`] read it. Mutations that change
/// membership notify after every lock has been released.
#[derive(Debug, Default)]
pub struct AudioDeviceState {
    hotplug: DeviceManager,
    capture: DeviceList<AudioDevicePtr>,
    playback: DeviceList<AudioDevicePtr>,
    default_capture: DefaultAudioDevice,
    default_playback: DefaultAudioDevice,
}

fn lock_default(slot: &DefaultAudioDevice) -> MutexGuard<'_, Option<AudioDevicePtr>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

impl AudioDeviceState {
    /// Creates empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Listener registry and event channel.
    pub fn hotplug(&self) -> &DeviceManager {
        &self.hotplug
    }

    /// Capture device list.
    pub fn capture_devices(&self) -> &DeviceList<AudioDevicePtr> {
        &self.capture
    }

    /// Playback device list.
    pub fn playback_devices(&self) -> &DeviceList<AudioDevicePtr> {
        &self.playback
    }

    /// List holding devices of `direction`. Devices of unknown direction have
    /// no list.
    pub fn list(&self, direction: DirectionType) -> Option<&DeviceList<AudioDevicePtr>> {
        match direction {
            DirectionType::Capture => Some(&self.capture),
            DirectionType::Render => Some(&self.playback),
            DirectionType::Unknown => None,
        }
    }

    fn default_slot(&self, direction: DirectionType) -> Option<&DefaultAudioDevice> {
        match direction {
            DirectionType::Capture => Some(&self.default_capture),
            DirectionType::Render => Some(&self.default_playback),
            DirectionType::Unknown => None,
        }
    }

    /// Current default capture device.
    pub fn default_capture_device(&self) -> Option<AudioDevicePtr> {
        lock_default(&self.default_capture).clone()
    }

    /// Current default playback device.
    pub fn default_playback_device(&self) -> Option<AudioDevicePtr> {
        lock_default(&self.default_playback).clone()
    }

    /// Current default device of `direction`.
    pub fn default_device(&self, direction: DirectionType) -> Option<AudioDevicePtr> {
        self.default_slot(direction).and_then(|slot| lock_default(slot).clone())
    }

    /// Inserts an enumerated device without notifying.
    pub fn insert_device(&self, device: AudioDevicePtr) -> bool {
        match self.list(device.direction()) {
            Some(list) => list.insert_device(device),
            None => false,
        }
    }

    /// Inserts the results of a full platform scan without notifying.
    ///
    /// Scans are consumed in order and the first failure is returned with
    /// nothing inserted, so a failed enumeration leaves the lists untouched.
    ///
    /// # Errors
    /// Returns the first scan error
    pub fn insert_scanned<I>(&self, scans: I) -> Result<usize, DeviceError>
    where
        I: IntoIterator<Item = Result<Vec<AudioDevice>, DeviceError>>,
    {
        let scanned = scans.into_iter().collect::<Result<Vec<_>, _>>()?;

        Ok(scanned
            .into_iter()
            .flatten()
            .map(Arc::new)
            .filter(|device| self.insert_device(Arc::clone(device)))
            .count())
    }

    /// Inserts a hotplugged device and notifies if it was not present yet.
    pub fn connect_device(&self, device: AudioDevicePtr) -> bool {
        if !self.insert_device(Arc::clone(&device)) {
            debug!(device = %device, "Ignoring arrival of known device");
            return false;
        }

        self.hotplug.notify_device_connected(device);
        true
    }

    /// Removes the first device of `direction` matching `predicate`, clears
    /// the default if it pointed at it, then notifies.
    pub fn disconnect_device<P>(
        &self,
        direction: DirectionType,
        predicate: P,
    ) -> Option<AudioDevicePtr>
    where
        P: FnMut(&AudioDevicePtr) -> bool,
    {
        let removed = self.list(direction)?.remove_device_by(predicate)?;

        self.forget_default(&removed);
        self.hotplug.notify_device_disconnected(removed.clone());

        Some(removed)
    }

    /// Removes every device of `direction` matching `predicate`, notifying
    /// once per removed device.
    pub fn disconnect_devices<P>(
        &self,
        direction: DirectionType,
        predicate: P,
    ) -> Vec<AudioDevicePtr>
    where
        P: FnMut(&AudioDevicePtr) -> bool,
    {
        let Some(list) = self.list(direction) else {
            return Vec::new();
        };

        let removed = list.remove_devices_by(predicate);

        for device in &removed {
            self.forget_default(device);
        }
        for device in &removed {
            self.hotplug.notify_device_disconnected(device.clone());
        }

        removed
    }

    /// Brings the list of `direction` in line with a fresh platform scan.
    ///
    /// Listed devices missing from `present` are disconnected first, then
    /// devices not listed yet are connected.
    pub fn reconcile_devices<I>(&self, direction: DirectionType, present: I)
    where
        I: IntoIterator<Item = AudioDevice>,
    {
        let present: BTreeSet<AudioDevicePtr> = present
            .into_iter()
            .filter(|device| device.direction() == direction)
            .map(Arc::new)
            .collect();

        self.disconnect_devices(direction, |device| !present.contains(device));

        for device in present {
            self.connect_device(device);
        }
    }

    fn forget_default(&self, removed: &AudioDevicePtr) {
        let Some(slot) = self.default_slot(removed.direction()) else {
            return;
        };

        let cleared = {
            let mut current = lock_default(slot);
            if current.as_ref() == Some(removed) {
                *current = None;
                true
            } else {
                false
            }
        };

        if cleared {
            self.hotplug
                .notify_default_changed(MediaKind::Audio, removed.direction(), None);
        }
    }

    /// Points the default of `direction` at `device`.
    ///
    /// Only a device currently in the list (or `None`) is accepted. Returns
    /// `true` if the default changed.
    pub fn set_default_device(
        &self,
        direction: DirectionType,
        device: Option<AudioDevicePtr>,
    ) -> bool {
        let (Some(slot), Some(list)) = (self.default_slot(direction), self.list(direction)) else {
            return false;
        };

        let changed = {
            let mut current = lock_default(slot);

            if let Some(candidate) = &device {
                if !list.contains(candidate) {
                    debug!(device = %candidate, "Refusing default that is not in the device list");
                    return false;
                }
            }

            if *current == device {
                false
            } else {
                current.clone_from(&device);
                true
            }
        };

        if changed {
            self.hotplug.notify_default_changed(
                MediaKind::Audio,
                direction,
                device.map(|d| d as DevicePtr),
            );
        }

        changed
    }

    /// Re-points the default of `direction` at the listed device matching
    /// `predicate`, or clears it when no device matches.
    pub fn resolve_default_device<P>(
        &self,
        direction: DirectionType,
        predicate: P,
    ) -> Option<AudioDevicePtr>
    where
        P: FnMut(&AudioDevicePtr) -> bool,
    {
        let resolved = self.list(direction)?.find_device(predicate);
        self.set_default_device(direction, resolved.clone());

        resolved
    }

    /// Shortcut for [`AudioDeviceState::set_default_device`] on capture.
    pub fn set_default_capture_device(&self, device: Option<AudioDevicePtr>) -> bool {
        self.set_default_device(DirectionType::Capture, device)
    }

    /// Shortcut for [`AudioDeviceState::set_default_device`] on playback.
    pub fn set_default_playback_device(&self, device: Option<AudioDevicePtr>) -> bool {
        self.set_default_device(DirectionType::Render, device)
    }
}

/// Audio device directory of one platform backend.
///
/// All queries are synchronous and return value snapshots. The first query
/// enumerates the platform; later ones read the cache kept current by
/// hotplug deltas.
pub trait AudioDeviceManager: Send + Sync {
    /// Shared state of the backend.
    fn state(&self) -> &AudioDeviceState;

    /// Backend name used in logs and errors.
    fn backend_name(&self) -> &'static str;

    /// Makes sure the first enumeration ran.
    ///
    /// # Errors
    /// Returns error if the platform scan fails or the manager is stopped
    fn ensure_enumerated(&self) -> Result<(), DeviceError>;

    /// Snapshot of capture devices.
    ///
    /// # Errors
    /// Returns error if the platform scan fails or the manager is stopped
    fn audio_capture_devices(&self) -> Result<BTreeSet<AudioDevicePtr>, DeviceError> {
        self.ensure_enumerated()?;
        Ok(self.state().capture_devices().devices())
    }

    /// Snapshot of playback devices.
    ///
    /// # Errors
    /// Returns error if the platform scan fails or the manager is stopped
    fn audio_playback_devices(&self) -> Result<BTreeSet<AudioDevicePtr>, DeviceError> {
        self.ensure_enumerated()?;
        Ok(self.state().playback_devices().devices())
    }

    /// Default capture device, `None` if the platform reports none.
    ///
    /// # Errors
    /// Returns error if the platform scan fails or the manager is stopped
    fn default_audio_capture_device(&self) -> Result<Option<AudioDevicePtr>, DeviceError> {
        self.ensure_enumerated()?;
        Ok(self.state().default_capture_device())
    }

    /// Default playback device, `None` if the platform reports none.
    ///
    /// # Errors
    /// Returns error if the platform scan fails or the manager is stopped
    fn default_audio_playback_device(&self) -> Result<Option<AudioDevicePtr>, DeviceError> {
        self.ensure_enumerated()?;
        Ok(self.state().default_playback_device())
    }

    /// Registers a hotplug listener.
    fn attach_hotplug_listener(&self, listener: &Arc<dyn DeviceHotplugListener>) {
        self.state().hotplug().attach_hotplug_listener(listener);
    }

    /// Unregisters a hotplug listener.
    fn detach_hotplug_listener(&self, listener: &Arc<dyn DeviceHotplugListener>) {
        self.state().hotplug().detach_hotplug_listener(listener);
    }

    /// Subscribes to device events of this manager.
    fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.state().hotplug().subscribe()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn mic(descriptor: &str) -> AudioDevicePtr {
        Arc::new(AudioDevice::capture(format!("Mic {descriptor}"), descriptor))
    }

    #[test]
    fn devices_land_in_their_direction_list() {
        let state = AudioDeviceState::new();

        state.insert_device(mic("hw:0,0"));
        state.insert_device(Arc::new(AudioDevice::playback("Speakers", "hw:0,1")));
        let unknown = AudioDevice::new(
            crate::services::common::Device::new("?", "?"),
            DirectionType::Unknown,
        );

        assert!(!state.insert_device(Arc::new(unknown)));
        assert_eq!(state.capture_devices().len(), 1);
        assert_eq!(state.playback_devices().len(), 1);
    }

    #[test]
    fn default_must_be_listed() {
        let state = AudioDeviceState::new();
        let listed = mic("hw:0,0");
        state.insert_device(listed.clone());

        assert!(!state.set_default_capture_device(Some(mic("hw:9,9"))));
        assert!(state.default_capture_device().is_none());

        assert!(state.set_default_capture_device(Some(listed.clone())));
        assert!(!state.set_default_capture_device(Some(listed.clone())));
        assert_eq!(state.default_capture_device(), Some(listed));
    }

    #[test]
    fn removing_default_clears_it() {
        let state = AudioDeviceState::new();
        let d = mic("hw:1,0");
        state.insert_device(d.clone());
        state.set_default_capture_device(Some(d.clone()));

        let removed = state.disconnect_device(DirectionType::Capture, |x| x == &d);

        assert_eq!(removed, Some(d));
        assert!(state.default_capture_device().is_none());
    }

    #[test]
    fn removing_other_device_keeps_default() {
        let state = AudioDeviceState::new();
        let keep = mic("hw:0,0");
        let gone = mic("hw:1,0");
        state.insert_device(keep.clone());
        state.insert_device(gone.clone());
        state.set_default_capture_device(Some(keep.clone()));

        state.disconnect_device(DirectionType::Capture, |x| x == &gone);

        assert_eq!(state.default_capture_device(), Some(keep));
    }

    #[test]
    fn resolve_default_clears_when_nothing_matches() {
        let state = AudioDeviceState::new();
        let d = mic("hw:0,0");
        state.insert_device(d.clone());
        state.set_default_capture_device(Some(d));

        let resolved =
            state.resolve_default_device(DirectionType::Capture, |x| x.descriptor() == "nope");

        assert!(resolved.is_none());
        assert!(state.default_capture_device().is_none());
    }

    #[test]
    fn failed_scan_inserts_nothing() {
        let state = AudioDeviceState::new();
        let scans = [
            Ok(vec![AudioDevice::capture("Mic", "hw:0,0")]),
            Err(DeviceError::query("test", "render scan failed")),
        ];

        let result = state.insert_scanned(scans);

        assert!(matches!(result, Err(DeviceError::QueryFailed { .. })));
        assert!(state.capture_devices().is_empty());
        assert!(state.playback_devices().is_empty());
    }

    #[test]
    fn scanned_devices_are_counted_once() {
        let state = AudioDeviceState::new();
        let scans = [
            Ok(vec![
                AudioDevice::capture("Mic", "hw:0,0"),
                AudioDevice::capture("Mic", "hw:0,0"),
            ]),
            Ok(vec![AudioDevice::playback("Speakers", "hw:0,1")]),
        ];

        assert_eq!(state.insert_scanned(scans).unwrap(), 2);
        assert_eq!(state.capture_devices().len(), 1);
        assert_eq!(state.playback_devices().len(), 1);
    }

    #[test]
    fn default_reported_before_arrival_resolves_on_connect() {
        let state = AudioDeviceState::new();
        let late = mic("usb:1,0");
        let matches_late = |x: &AudioDevicePtr| x.descriptor() == "usb:1,0";

        assert!(
            state
                .resolve_default_device(DirectionType::Capture, matches_late)
                .is_none()
        );

        state.connect_device(late.clone());
        let resolved = state.resolve_default_device(DirectionType::Capture, matches_late);

        assert_eq!(resolved, Some(late.clone()));
        assert_eq!(state.default_capture_device(), Some(late));
    }

    #[test]
    fn connect_notifies_only_on_change() {
        let state = AudioDeviceState::new();
        let mut rx = state.hotplug().subscribe();

        assert!(state.connect_device(mic("hw:0,0")));
        assert!(!state.connect_device(mic("hw:0,0")));

        assert!(matches!(rx.try_recv().unwrap(), DeviceEvent::Connected { .. }));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn reconcile_applies_scan_difference() {
        let state = AudioDeviceState::new();
        state.insert_device(mic("hw:0,0"));
        state.insert_device(mic("hw:1,0"));
        let mut rx = state.hotplug().subscribe();

        state.reconcile_devices(
            DirectionType::Capture,
            vec![
                AudioDevice::capture("Mic hw:1,0", "hw:1,0"),
                AudioDevice::capture("Mic hw:2,0", "hw:2,0"),
                AudioDevice::playback("Speakers", "hw:0,1"),
            ],
        );

        let descriptors: Vec<_> = state
            .capture_devices()
            .devices()
            .iter()
            .map(|d| d.descriptor().to_string())
            .collect();
        assert_eq!(descriptors, vec!["hw:1,0", "hw:2,0"]);
        assert!(state.playback_devices().is_empty());

        assert!(matches!(rx.try_recv().unwrap(), DeviceEvent::Disconnected { .. }));
        assert!(matches!(rx.try_recv().unwrap(), DeviceEvent::Connected { .. }));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn disconnect_of_absent_device_is_silent() {
        let state = AudioDeviceState::new();
        let mut rx = state.hotplug().subscribe();

        assert!(
            state
                .disconnect_device(DirectionType::Capture, |d| d.descriptor() == "hw:0,0")
                .is_none()
        );
        assert!(rx.try_recv().is_err());
    }
}
