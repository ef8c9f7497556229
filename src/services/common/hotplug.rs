use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::{DateTime, Utc};
use futures::Stream;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::device::{DevicePtr, DirectionType, MediaKind};

/// Observer of device arrival and removal.
///
/// Callbacks run synchronously on the backend's notification thread, one
/// listener after another in attachment order. A slow listener delays further
/// hotplug processing of that backend.
pub trait DeviceHotplugListener: Send + Sync {
    /// A device became present.
    fn device_connected(&self, device: DevicePtr);

    /// A device stopped being present.
    fn device_disconnected(&self, device: DevicePtr);
}

/// Hotplug change broadcast to async subscribers.
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    /// A device became present
    Connected {
        /// The connected device
        device: DevicePtr,
        /// When the backend observed the change
        at: DateTime<Utc>,
    },
    /// A device stopped being present
    Disconnected {
        /// The removed device
        device: DevicePtr,
        /// When the backend observed the change
        at: DateTime<Utc>,
    },
    /// The default device of a direction changed
    DefaultChanged {
        /// Media kind of the default slot
        kind: MediaKind,
        /// Direction of the default slot
        direction: DirectionType,
        /// New default, `None` when no device is default
        device: Option<DevicePtr>,
        /// When the backend observed the change
        at: DateTime<Utc>,
    },
}

impl DeviceEvent {
    /// Device carried by the event, if any.
    pub fn device(&self) -> Option<&DevicePtr> {
        match self {
            DeviceEvent::Connected { device, .. } | DeviceEvent::Disconnected { device, .. } => {
                Some(device)
            }
            DeviceEvent::DefaultChanged { device, .. } => device.as_ref(),
        }
    }
}

/// Channel sender for device events
pub type EventSender = broadcast::Sender<DeviceEvent>;

type ListenerRegistry = Mutex<Vec<Weak<dyn DeviceHotplugListener>>>;

/// Hotplug listener registry and notification protocol shared by all managers.
///
/// Listeners are held weakly: the manager never extends their lifetime, and
/// listeners dropped by their owner are pruned on the next notification.
pub struct DeviceManager {
    listeners: ListenerRegistry,
    events_tx: EventSender,
}

impl std::fmt::Debug for DeviceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceManager")
            .field("listeners", &self.listener_count())
            .field("subscribers", &self.events_tx.receiver_count())
            .finish()
    }
}

impl Default for DeviceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceManager {
    /// Creates a manager with no listeners.
    pub fn new() -> Self {
        const EVENTS_BUFFER_SIZE: usize = 100;

        let (events_tx, _) = broadcast::channel(EVENTS_BUFFER_SIZE);

        Self {
            listeners: Mutex::new(Vec::new()),
            events_tx,
        }
    }

    fn registry(&self) -> MutexGuard<'_, Vec<Weak<dyn DeviceHotplugListener>>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a listener. Attaching the same listener twice has no effect.
    pub fn attach_hotplug_listener(&self, listener: &Arc<dyn DeviceHotplugListener>) {
        let weak = Arc::downgrade(listener);
        let mut listeners = self.registry();

        if listeners.iter().any(|existing| Weak::ptr_eq(existing, &weak)) {
            return;
        }

        listeners.push(weak);
        debug!(listeners = listeners.len(), "Hotplug listener attached");
    }

    /// Unregisters a listener. Unknown listeners are ignored.
    pub fn detach_hotplug_listener(&self, listener: &Arc<dyn DeviceHotplugListener>) {
        let weak = Arc::downgrade(listener);
        let mut listeners = self.registry();

        listeners.retain(|existing| !Weak::ptr_eq(existing, &weak) && existing.strong_count() > 0);
        debug!(listeners = listeners.len(), "Hotplug listener detached");
    }

    /// Number of live attached listeners.
    pub fn listener_count(&self) -> usize {
        self.registry()
            .iter()
            .filter(|listener| listener.strong_count() > 0)
            .count()
    }

    /// Subscribes to the broadcast form of the notification protocol.
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events_tx.subscribe()
    }

    /// Get a stream of device events
    pub fn events(&self) -> impl Stream<Item = DeviceEvent> + Send + 'static {
        use async_stream::stream;

        let mut events_rx = self.events_tx.subscribe();
        stream! {
            loop {
                match events_rx.recv().await {
                    Ok(event) => yield event,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    /// Copies out live listeners and prunes expired ones. The registry lock
    /// is released before the caller invokes anything.
    fn live_listeners(&self) -> Vec<Arc<dyn DeviceHotplugListener>> {
        let mut listeners = self.registry();
        let mut live = Vec::with_capacity(listeners.len());

        listeners.retain(|weak| match weak.upgrade() {
            Some(listener) => {
                live.push(listener);
                true
            }
            None => false,
        });

        live
    }

    /// Notifies listeners and subscribers that `device` became present.
    pub fn notify_device_connected(&self, device: DevicePtr) {
        info!(kind = %device.kind(), device = %device.device(), "Device connected");

        for listener in self.live_listeners() {
            listener.device_connected(Arc::clone(&device));
        }

        let _ = self.events_tx.send(DeviceEvent::Connected {
            device,
            at: Utc::now(),
        });
    }

    /// Notifies listeners and subscribers that `device` is gone.
    pub fn notify_device_disconnected(&self, device: DevicePtr) {
        info!(kind = %device.kind(), device = %device.device(), "Device disconnected");

        for listener in self.live_listeners() {
            listener.device_disconnected(Arc::clone(&device));
        }

        let _ = self.events_tx.send(DeviceEvent::Disconnected {
            device,
            at: Utc::now(),
        });
    }

    /// Broadcasts a default device change. Listeners have no callback for it.
    pub fn notify_default_changed(
        &self,
        kind: MediaKind,
        direction: DirectionType,
        device: Option<DevicePtr>,
    ) {
        info!(
            %kind,
            %direction,
            device = device.as_ref().map(|d| d.device().to_string()).unwrap_or_default(),
            "Default device changed"
        );

        let _ = self.events_tx.send(DeviceEvent::DefaultChanged {
            kind,
            direction,
            device,
            at: Utc::now(),
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::services::{common::Device, video::VideoDevice};

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl DeviceHotplugListener for Recorder {
        fn device_connected(&self, device: DevicePtr) {
            self.calls.lock().unwrap().push(format!("+{}", device.name()));
        }

        fn device_disconnected(&self, device: DevicePtr) {
            self.calls.lock().unwrap().push(format!("-{}", device.name()));
        }
    }

    fn camera(name: &str) -> DevicePtr {
        Arc::new(VideoDevice::new(Device::new(name, format!("/dev/{name}"))))
    }

    #[test]
    fn attached_listener_receives_both_callbacks() {
        let manager = DeviceManager::new();
        let recorder = Arc::new(Recorder::default());
        let listener: Arc<dyn DeviceHotplugListener> = recorder.clone();

        manager.attach_hotplug_listener(&listener);
        manager.notify_device_connected(camera("cam"));
        manager.notify_device_disconnected(camera("cam"));

        assert_eq!(recorder.calls(), vec!["+cam", "-cam"]);
    }

    #[test]
    fn double_attach_delivers_once() {
        let manager = DeviceManager::new();
        let recorder = Arc::new(Recorder::default());
        let listener: Arc<dyn DeviceHotplugListener> = recorder.clone();

        manager.attach_hotplug_listener(&listener);
        manager.attach_hotplug_listener(&listener);
        manager.notify_device_connected(camera("cam"));

        assert_eq!(manager.listener_count(), 1);
        assert_eq!(recorder.calls().len(), 1);
    }

    #[test]
    fn detached_listener_is_silent() {
        let manager = DeviceManager::new();
        let recorder = Arc::new(Recorder::default());
        let listener: Arc<dyn DeviceHotplugListener> = recorder.clone();

        manager.attach_hotplug_listener(&listener);
        manager.detach_hotplug_listener(&listener);
        manager.notify_device_connected(camera("cam"));

        assert!(recorder.calls().is_empty());
        assert_eq!(manager.listener_count(), 0);
    }

    #[test]
    fn dropped_listener_is_pruned() {
        let manager = DeviceManager::new();
        let listener: Arc<dyn DeviceHotplugListener> = Arc::new(Recorder::default());

        manager.attach_hotplug_listener(&listener);
        drop(listener);
        manager.notify_device_connected(camera("cam"));

        assert_eq!(manager.listener_count(), 0);
        assert!(manager.registry().is_empty());
    }

    #[test]
    fn listeners_run_in_attachment_order() {
        struct Tagged {
            tag: &'static str,
            log: Arc<Mutex<Vec<&'static str>>>,
        }

        impl DeviceHotplugListener for Tagged {
            fn device_connected(&self, _device: DevicePtr) {
                self.log.lock().unwrap().push(self.tag);
            }

            fn device_disconnected(&self, _device: DevicePtr) {}
        }

        let manager = DeviceManager::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let first: Arc<dyn DeviceHotplugListener> = Arc::new(Tagged {
            tag: "first",
            log: Arc::clone(&log),
        });
        let second: Arc<dyn DeviceHotplugListener> = Arc::new(Tagged {
            tag: "second",
            log: Arc::clone(&log),
        });

        manager.attach_hotplug_listener(&first);
        manager.attach_hotplug_listener(&second);
        manager.notify_device_connected(camera("cam"));

        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn listener_may_detach_itself_during_callback() {
        struct SelfDetaching {
            manager: Arc<DeviceManager>,
            this: Mutex<Option<Arc<dyn DeviceHotplugListener>>>,
        }

        impl DeviceHotplugListener for SelfDetaching {
            fn device_connected(&self, _device: DevicePtr) {
                if let Some(this) = self.this.lock().unwrap().take() {
                    self.manager.detach_hotplug_listener(&this);
                }
            }

            fn device_disconnected(&self, _device: DevicePtr) {}
        }

        let manager = Arc::new(DeviceManager::new());
        let listener = Arc::new(SelfDetaching {
            manager: Arc::clone(&manager),
            this: Mutex::new(None),
        });
        let as_dyn: Arc<dyn DeviceHotplugListener> = listener.clone();
        *listener.this.lock().unwrap() = Some(Arc::clone(&as_dyn));

        manager.attach_hotplug_listener(&as_dyn);
        manager.notify_device_connected(camera("cam"));

        assert_eq!(manager.listener_count(), 0);
    }

    #[test]
    fn subscribers_receive_events() {
        let manager = DeviceManager::new();
        let mut rx = manager.subscribe();

        manager.notify_device_connected(camera("cam"));
        manager.notify_default_changed(MediaKind::Video, DirectionType::Capture, None);

        match rx.try_recv().unwrap() {
            DeviceEvent::Connected { device, .. } => assert_eq!(device.name(), "cam"),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(matches!(
            rx.try_recv().unwrap(),
            DeviceEvent::DefaultChanged { device: None, .. }
        ));
    }
}
