use std::{
    collections::BTreeSet,
    sync::{Mutex, MutexGuard, PoisonError},
};

/// Thread-safe ordered set of device handles.
///
/// Every operation holds the list mutex only for its own duration and never
/// calls out while holding it. Insert and remove are idempotent and report
/// whether membership changed, which is what drives hotplug notification.
#[derive(Debug)]
pub struct DeviceList<T> {
    devices: Mutex<BTreeSet<T>>,
}

impl<T> Default for DeviceList<T> {
    fn default() -> Self {
        Self {
            devices: Mutex::new(BTreeSet::new()),
        }
    }
}

impl<T: Ord + Clone> DeviceList<T> {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<T>> {
        self.devices.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts a device. Returns `false` if an equal device was already present.
    pub fn insert_device(&self, device: T) -> bool {
        self.lock().insert(device)
    }

    /// Removes a device. Returns `false` if no equal device was present.
    pub fn remove_device(&self, device: &T) -> bool {
        self.lock().remove(device)
    }

    /// Removes the first device, in list order, matching `predicate`.
    pub fn remove_device_by<P>(&self, mut predicate: P) -> Option<T>
    where
        P: FnMut(&T) -> bool,
    {
        let mut devices = self.lock();
        let found = devices.iter().find(|device| predicate(device)).cloned()?;
        devices.remove(&found);

        Some(found)
    }

    /// Removes every device matching `predicate`.
    pub fn remove_devices_by<P>(&self, mut predicate: P) -> Vec<T>
    where
        P: FnMut(&T) -> bool,
    {
        let mut devices = self.lock();
        let mut removed = Vec::new();

        devices.retain(|device| {
            if predicate(device) {
                removed.push(device.clone());
                false
            } else {
                true
            }
        });

        removed
    }

    /// Returns the first device, in list order, matching `predicate`.
    pub fn find_device<P>(&self, mut predicate: P) -> Option<T>
    where
        P: FnMut(&T) -> bool,
    {
        self.lock().iter().find(|device| predicate(device)).cloned()
    }

    /// Whether an equal device is present.
    pub fn contains(&self, device: &T) -> bool {
        self.lock().contains(device)
    }

    /// Whether the list holds no devices.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Number of devices.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Owned snapshot of the current contents.
    pub fn devices(&self) -> BTreeSet<T> {
        self.lock().clone()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;
    use crate::services::common::Device;

    fn mic() -> Device {
        Device::new("Mic-1", "hw:0,0")
    }

    #[test]
    fn insert_then_remove_is_idempotent() {
        let list = DeviceList::new();
        assert!(list.is_empty());

        assert!(list.insert_device(mic()));
        assert_eq!(list.devices(), BTreeSet::from([mic()]));

        assert!(!list.insert_device(mic()));
        assert_eq!(list.len(), 1);

        assert!(list.remove_device(&mic()));
        assert!(list.is_empty());

        assert!(!list.remove_device(&mic()));
    }

    #[test]
    fn remove_by_predicate_takes_first_match_only() {
        let list = DeviceList::new();
        list.insert_device(Device::new("A", "1"));
        list.insert_device(Device::new("B", "1"));

        let removed = list.remove_device_by(|d| d.descriptor() == "1").unwrap();

        assert_eq!(removed.name(), "A");
        assert_eq!(list.len(), 1);
        assert!(list.remove_device_by(|d| d.name() == "missing").is_none());
    }

    #[test]
    fn remove_all_matching() {
        let list = DeviceList::new();
        list.insert_device(Device::new("A", "usb-1"));
        list.insert_device(Device::new("B", "usb-2"));
        list.insert_device(Device::new("C", "pci-1"));

        let removed = list.remove_devices_by(|d| d.descriptor().starts_with("usb"));

        assert_eq!(removed.len(), 2);
        assert_eq!(list.devices(), BTreeSet::from([Device::new("C", "pci-1")]));
    }

    #[test]
    fn find_returns_clone_without_removing() {
        let list = DeviceList::new();
        list.insert_device(mic());

        let found = list.find_device(|d| d.name() == "Mic-1");

        assert_eq!(found, Some(mic()));
        assert!(list.contains(&mic()));
    }

    #[test]
    fn snapshot_is_unaffected_by_later_mutation() {
        let list = DeviceList::new();
        list.insert_device(mic());

        let snapshot = list.devices();
        list.remove_device(&mic());

        assert_eq!(snapshot.len(), 1);
        assert!(list.is_empty());
    }

    #[test]
    fn concurrent_inserts_never_duplicate() {
        let list = Arc::new(DeviceList::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let list = Arc::clone(&list);
                thread::spawn(move || {
                    let mut inserted = 0;
                    for i in 0..50 {
                        if list.insert_device(Device::new(format!("dev-{i}"), "x")) {
                            inserted += 1;
                        }
                    }
                    inserted
                })
            })
            .collect();

        let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        assert_eq!(total, 50);
        assert_eq!(list.len(), 50);
    }
}
