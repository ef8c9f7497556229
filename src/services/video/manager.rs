use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tokio::sync::broadcast;
use tracing::debug;

use super::{VideoCaptureCapability, VideoDevice};
use crate::services::{
    DeviceError,
    common::{
        DeviceEvent, DeviceHotplugListener, DeviceList, DeviceManager, DevicePtr, DirectionType,
        MediaKind,
    },
};

/// Shared handle to a video device
pub type VideoDevicePtr = Arc<VideoDevice>;

/// Capture list, default device and listener registry of a video backend.
#[derive(Debug, Default)]
pub struct VideoDeviceState {
    hotplug: DeviceManager,
    capture: DeviceList<VideoDevicePtr>,
    default_capture: Mutex<Option<VideoDevicePtr>>,
}

impl VideoDeviceState {
    /// Creates empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Listener registry and event channel.
    pub fn hotplug(&self) -> &DeviceManager {
        &self.hotplug
    }

    /// Capture device list.
    pub fn capture_devices(&self) -> &DeviceList<VideoDevicePtr> {
        &self.capture
    }

    fn default_slot(&self) -> MutexGuard<'_, Option<VideoDevicePtr>> {
        self.default_capture
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Current default capture device.
    pub fn default_capture_device(&self) -> Option<VideoDevicePtr> {
        self.default_slot().clone()
    }

    /// Inserts an enumerated device without notifying.
    pub fn insert_device(&self, device: VideoDevicePtr) -> bool {
        self.capture.insert_device(device)
    }

    /// Inserts a hotplugged device and notifies if it was not present yet.
    pub fn connect_device(&self, device: VideoDevicePtr) -> bool {
        if !self.capture.insert_device(Arc::clone(&device)) {
            debug!(device = %device, "Ignoring arrival of known device");
            return false;
        }

        self.hotplug.notify_device_connected(device);
        true
    }

    /// Removes every device matching `predicate`, clears the default if it
    /// was among them, then notifies once per device.
    pub fn disconnect_devices<P>(&self, predicate: P) -> Vec<VideoDevicePtr>
    where
        P: FnMut(&VideoDevicePtr) -> bool,
    {
        let removed = self.capture.remove_devices_by(predicate);

        let cleared = {
            let mut current = self.default_slot();
            match current.as_ref() {
                Some(default) if removed.contains(default) => {
                    *current = None;
                    true
                }
                _ => false,
            }
        };

        if cleared {
            self.hotplug
                .notify_default_changed(MediaKind::Video, DirectionType::Capture, None);
        }

        for device in &removed {
            self.hotplug.notify_device_disconnected(device.clone());
        }

        removed
    }

    /// Brings the list in line with a fresh platform scan.
    pub fn reconcile_devices<I>(&self, present: I)
    where
        I: IntoIterator<Item = VideoDevice>,
    {
        let present: BTreeSet<VideoDevicePtr> = present.into_iter().map(Arc::new).collect();

        self.disconnect_devices(|device| !present.contains(device));

        for device in present {
            self.connect_device(device);
        }
    }

    /// Points the default at `device`. Only listed devices (or `None`) are
    /// accepted. Returns `true` if the default changed.
    pub fn set_default_capture_device(&self, device: Option<VideoDevicePtr>) -> bool {
        let changed = {
            let mut current = self.default_slot();

            if let Some(candidate) = &device {
                if !self.capture.contains(candidate) {
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
                MediaKind::Video,
                DirectionType::Capture,
                device.map(|d| d as DevicePtr),
            );
        }

        changed
    }

    /// Re-points the default at the listed device matching `predicate`, or
    /// clears it.
    pub fn resolve_default_device<P>(&self, predicate: P) -> Option<VideoDevicePtr>
    where
        P: FnMut(&VideoDevicePtr) -> bool,
    {
        let resolved = self.capture.find_device(predicate);
        self.set_default_capture_device(resolved.clone());

        resolved
    }
}

/// Video device directory of one platform backend.
pub trait VideoDeviceManager: Send + Sync {
    /// Shared state of the backend.
    fn state(&self) -> &VideoDeviceState;

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
    fn video_capture_devices(&self) -> Result<BTreeSet<VideoDevicePtr>, DeviceError> {
        self.ensure_enumerated()?;
        Ok(self.state().capture_devices().devices())
    }

    /// Formats, sizes and rates `device` offers. Queried on every call.
    ///
    /// # Errors
    /// Returns error if the device cannot be opened or queried
    fn video_capture_capabilities(
        &self,
        device: &VideoDevice,
    ) -> Result<BTreeSet<VideoCaptureCapability>, DeviceError>;

    /// Default capture device, `None` where the platform has no such notion.
    ///
    /// # Errors
    /// Returns error if the platform scan fails or the manager is stopped
    fn default_video_capture_device(&self) -> Result<Option<VideoDevicePtr>, DeviceError> {
        self.ensure_enumerated()?;
        Ok(self.state().default_capture_device())
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
