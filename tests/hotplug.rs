//! Integration tests for the hotplug protocol, driven by an in-memory backend.

#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{
        Arc, Mutex, Weak,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use avdev::services::{
    AudioDevice, AudioDeviceManager, AudioDeviceState, Device, DeviceError, DeviceEvent,
    DeviceHotplugListener, DevicePtr, DirectionType, MediaDevices, MediaKind,
    VideoCaptureCapability, VideoDevice, VideoDeviceManager, VideoDeviceState,
    common::{DeviceList, Lifecycle},
};
use futures::StreamExt;
use proptest::prelude::*;

/// Audio backend whose "platform" is a fixed device list.
struct MemoryAudio {
    state: AudioDeviceState,
    lifecycle: Lifecycle,
    present: Vec<AudioDevice>,
    render_failure: Option<DeviceError>,
    scans: AtomicUsize,
}

impl MemoryAudio {
    fn new(present: Vec<AudioDevice>) -> Self {
        Self {
            state: AudioDeviceState::new(),
            lifecycle: Lifecycle::new(),
            present,
            render_failure: None,
            scans: AtomicUsize::new(0),
        }
    }

    /// Backend whose playback scan fails after the capture scan succeeded.
    fn failing_render(present: Vec<AudioDevice>, error: DeviceError) -> Self {
        Self {
            render_failure: Some(error),
            ..Self::new(present)
        }
    }

    fn scan(&self, direction: DirectionType) -> Result<Vec<AudioDevice>, DeviceError> {
        if direction == DirectionType::Render {
            if let Some(error) = &self.render_failure {
                return Err(error.clone());
            }
        }

        Ok(self
            .present
            .iter()
            .filter(|device| device.direction() == direction)
            .cloned()
            .collect())
    }

    fn dispose(&self) {
        self.lifecycle.begin_dispose();
        self.lifecycle.mark_stopped();
    }
}

impl AudioDeviceManager for MemoryAudio {
    fn state(&self) -> &AudioDeviceState {
        &self.state
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }

    fn ensure_enumerated(&self) -> Result<(), DeviceError> {
        self.lifecycle.ensure_ready(|| {
            self.scans.fetch_add(1, Ordering::SeqCst);
            let directions = [DirectionType::Capture, DirectionType::Render];
            self.state
                .insert_scanned(directions.into_iter().map(|direction| self.scan(direction)))?;
            Ok(())
        })
    }
}

struct MemoryVideo {
    state: VideoDeviceState,
    lifecycle: Lifecycle,
}

impl MemoryVideo {
    fn new() -> Self {
        Self {
            state: VideoDeviceState::new(),
            lifecycle: Lifecycle::new(),
        }
    }
}

impl VideoDeviceManager for MemoryVideo {
    fn state(&self) -> &VideoDeviceState {
        &self.state
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }

    fn ensure_enumerated(&self) -> Result<(), DeviceError> {
        self.lifecycle.ensure_ready(|| Ok(()))
    }

    fn video_capture_capabilities(
        &self,
        _device: &VideoDevice,
    ) -> Result<BTreeSet<VideoCaptureCapability>, DeviceError> {
        Ok(BTreeSet::new())
    }
}

/// Counts callbacks per descriptor: +1 on connect, -1 on disconnect.
#[derive(Default)]
struct Balance {
    counts: Mutex<BTreeMap<String, i64>>,
}

impl Balance {
    fn get(&self, descriptor: &str) -> i64 {
        self.counts
            .lock()
            .unwrap()
            .get(descriptor)
            .copied()
            .unwrap_or(0)
    }

    fn total_calls(&self) -> usize {
        self.counts.lock().unwrap().len()
    }
}

impl DeviceHotplugListener for Balance {
    fn device_connected(&self, device: DevicePtr) {
        *self
            .counts
            .lock()
            .unwrap()
            .entry(device.descriptor().to_string())
            .or_default() += 1;
    }

    fn device_disconnected(&self, device: DevicePtr) {
        *self
            .counts
            .lock()
            .unwrap()
            .entry(device.descriptor().to_string())
            .or_default() -= 1;
    }
}

/// What a listener saw when it queried the state from inside a callback.
#[derive(Debug, PartialEq)]
struct Observation {
    listed: bool,
    default: Option<String>,
}

/// Listener that re-reads the capture list and default on every callback.
struct Reentrant {
    state: Weak<AudioDeviceState>,
    seen: Mutex<Vec<Observation>>,
}

impl Reentrant {
    fn new(state: &Arc<AudioDeviceState>) -> Arc<Self> {
        Arc::new(Self {
            state: Arc::downgrade(state),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn observe(&self, device: &DevicePtr) {
        let Some(state) = self.state.upgrade() else {
            return;
        };

        let listed = state
            .capture_devices()
            .devices()
            .iter()
            .any(|listed| listed.descriptor() == device.descriptor());
        let default = state
            .default_capture_device()
            .map(|default| default.descriptor().to_string());

        self.seen.lock().unwrap().push(Observation { listed, default });
    }

    fn take(&self) -> Vec<Observation> {
        std::mem::take(&mut *self.seen.lock().unwrap())
    }
}

impl DeviceHotplugListener for Reentrant {
    fn device_connected(&self, device: DevicePtr) {
        self.observe(&device);
    }

    fn device_disconnected(&self, device: DevicePtr) {
        self.observe(&device);
    }
}

fn mic(index: u64) -> Arc<AudioDevice> {
    Arc::new(AudioDevice::capture(
        format!("Mic-{index}"),
        format!("hw:{index},0"),
    ))
}

mod device_list {
    use super::*;

    #[test]
    fn insert_remove_scenario() {
        let list: DeviceList<Arc<AudioDevice>> = DeviceList::new();
        let a = Arc::new(AudioDevice::capture("Mic-1", "hw:0,0"));

        assert!(list.is_empty());
        assert!(list.insert_device(Arc::clone(&a)));
        assert_eq!(list.devices(), BTreeSet::from([Arc::clone(&a)]));

        assert!(!list.insert_device(Arc::clone(&a)));
        assert_eq!(list.len(), 1);

        assert!(list.remove_device(&a));
        assert!(list.devices().is_empty());
        assert!(!list.remove_device(&a));
    }

    #[test]
    fn snapshot_isolated_from_concurrent_mutation() {
        let list: Arc<DeviceList<Arc<AudioDevice>>> = Arc::new(DeviceList::new());
        for index in 0..8 {
            list.insert_device(mic(index));
        }

        let snapshot = list.devices();

        let writer = {
            let list = Arc::clone(&list);
            thread::spawn(move || {
                for index in 0..200 {
                    list.insert_device(mic(100 + index));
                    list.remove_device(&mic(index % 8));
                }
            })
        };
        writer.join().unwrap();

        assert_eq!(snapshot.len(), 8);
        assert!(snapshot.iter().all(|device| device.name().starts_with("Mic-")));
        assert!(snapshot.contains(&mic(0)));
    }
}

mod replay {
    use super::*;

    proptest! {
        #[test]
        fn callbacks_balance_to_final_membership(
            ops in prop::collection::vec((any::<bool>(), 0u64..12), 0..400)
        ) {
            let manager = MemoryAudio::new(Vec::new());
            let balance = Arc::new(Balance::default());
            let listener: Arc<dyn DeviceHotplugListener> = balance.clone();
            manager.attach_hotplug_listener(&listener);

            for (connect, index) in ops {
                let device = mic(index);
                if connect {
                    manager.state().connect_device(device);
                } else {
                    manager
                        .state()
                        .disconnect_device(DirectionType::Capture, |d| *d == device);
                }
            }

            let present = manager.audio_capture_devices().unwrap();
            for index in 0..12 {
                let device = mic(index);
                let expected = i64::from(present.contains(&device));
                prop_assert_eq!(balance.get(device.descriptor()), expected, "{}", device);
            }
        }

        #[test]
        fn default_is_always_listed(
            ops in prop::collection::vec((0u8..4, 0u64..6), 0..400)
        ) {
            let manager = MemoryAudio::new(Vec::new());

            for (op, index) in ops {
                let device = mic(index);
                match op {
                    0 => {
                        manager.state().connect_device(device);
                    }
                    1 => {
                        manager
                            .state()
                            .disconnect_device(DirectionType::Capture, |d| *d == device);
                    }
                    2 => {
                        manager.state().set_default_capture_device(Some(device));
                    }
                    _ => {
                        manager
                            .state()
                            .resolve_default_device(DirectionType::Capture, |d| {
                                d.descriptor() == device.descriptor()
                            });
                    }
                }

                if let Some(default) = manager.state().default_capture_device() {
                    prop_assert!(manager.state().capture_devices().contains(&default));
                }
            }
        }
    }

    #[test]
    fn removing_default_never_leaves_it_dangling() {
        let manager = MemoryAudio::new(Vec::new());
        let d = mic(1);
        manager.state().connect_device(Arc::clone(&d));
        manager.state().connect_device(mic(2));
        assert!(manager.state().set_default_capture_device(Some(Arc::clone(&d))));

        manager
            .state()
            .disconnect_device(DirectionType::Capture, |device| *device == d);

        let default = manager.default_audio_capture_device().unwrap();
        assert_ne!(default, Some(d));
    }
}

mod reentrancy {
    use super::*;

    #[test]
    fn listener_sees_connected_device_listed() {
        let state = Arc::new(AudioDeviceState::new());
        let reentrant = Reentrant::new(&state);
        let listener: Arc<dyn DeviceHotplugListener> = reentrant.clone();
        state.hotplug().attach_hotplug_listener(&listener);

        state.connect_device(mic(0));

        assert_eq!(
            reentrant.take(),
            vec![Observation {
                listed: true,
                default: None,
            }]
        );
    }

    #[test]
    fn listener_sees_removed_default_cleared() {
        let state = Arc::new(AudioDeviceState::new());
        let d = mic(1);
        state.connect_device(Arc::clone(&d));
        state.connect_device(mic(2));
        assert!(state.set_default_capture_device(Some(Arc::clone(&d))));

        let reentrant = Reentrant::new(&state);
        let listener: Arc<dyn DeviceHotplugListener> = reentrant.clone();
        state.hotplug().attach_hotplug_listener(&listener);

        state.disconnect_device(DirectionType::Capture, |device| *device == d);

        assert_eq!(
            reentrant.take(),
            vec![Observation {
                listed: false,
                default: None,
            }]
        );
    }

    #[test]
    fn listener_may_mutate_from_callback() {
        struct Evict(Weak<AudioDeviceState>);

        impl DeviceHotplugListener for Evict {
            fn device_connected(&self, device: DevicePtr) {
                if let Some(state) = self.0.upgrade() {
                    state.disconnect_device(DirectionType::Capture, |d| {
                        d.descriptor() == device.descriptor()
                    });
                }
            }

            fn device_disconnected(&self, _device: DevicePtr) {}
        }

        let state = Arc::new(AudioDeviceState::new());
        let listener: Arc<dyn DeviceHotplugListener> = Arc::new(Evict(Arc::downgrade(&state)));
        state.hotplug().attach_hotplug_listener(&listener);

        state.connect_device(mic(3));

        assert!(state.capture_devices().is_empty());
    }
}

mod lifecycle {
    use super::*;

    #[test]
    fn failed_scan_leaves_cache_untouched() {
        let manager = MemoryAudio::failing_render(
            vec![
                AudioDevice::capture("Mic", "hw:0,0"),
                AudioDevice::playback("Speakers", "hw:0,1"),
            ],
            DeviceError::query("memory", "render scan failed"),
        );

        let result = manager.audio_capture_devices();

        assert!(matches!(result, Err(DeviceError::QueryFailed { .. })));
        assert!(manager.state().capture_devices().is_empty());
        assert!(manager.state().playback_devices().is_empty());
        assert!(!manager.lifecycle.is_ready());
    }

    #[test]
    fn first_query_enumerates_once() {
        let manager = MemoryAudio::new(vec![
            AudioDevice::capture("Mic", "hw:0,0"),
            AudioDevice::playback("Speakers", "hw:0,1"),
        ]);

        assert_eq!(manager.audio_capture_devices().unwrap().len(), 1);
        assert_eq!(manager.audio_playback_devices().unwrap().len(), 1);
        assert_eq!(manager.default_audio_playback_device().unwrap(), None);
        assert_eq!(manager.scans.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn enumeration_does_not_notify() {
        let manager = MemoryAudio::new(vec![AudioDevice::capture("Mic", "hw:0,0")]);
        let balance = Arc::new(Balance::default());
        let listener: Arc<dyn DeviceHotplugListener> = balance.clone();
        manager.attach_hotplug_listener(&listener);

        manager.audio_capture_devices().unwrap();

        assert_eq!(balance.total_calls(), 0);
    }

    #[test]
    fn queries_fail_after_dispose() {
        let manager = MemoryAudio::new(Vec::new());
        manager.dispose();

        assert_eq!(manager.audio_capture_devices(), Err(DeviceError::Stopped));
    }
}

mod media_devices {
    use super::*;

    fn directory() -> (Arc<MemoryAudio>, Arc<MemoryVideo>, MediaDevices) {
        let audio = Arc::new(MemoryAudio::new(Vec::new()));
        let video = Arc::new(MemoryVideo::new());
        let devices = MediaDevices::with_managers(audio.clone(), video.clone());
        (audio, video, devices)
    }

    fn camera(node: &str) -> Arc<VideoDevice> {
        Arc::new(VideoDevice::new(Device::new("Camera", node)))
    }

    #[test]
    fn one_listener_hears_both_kinds() {
        let (audio, video, devices) = directory();
        let balance = Arc::new(Balance::default());
        let listener: Arc<dyn DeviceHotplugListener> = balance.clone();
        devices.add_device_change_listener(&listener);

        audio.state().connect_device(mic(0));
        video.state().connect_device(camera("/dev/video0"));

        assert_eq!(balance.get("hw:0,0"), 1);
        assert_eq!(balance.get("/dev/video0"), 1);
    }

    #[test]
    fn removed_listener_is_silent() {
        let (audio, video, devices) = directory();
        let balance = Arc::new(Balance::default());
        let listener: Arc<dyn DeviceHotplugListener> = balance.clone();
        devices.add_device_change_listener(&listener);
        devices.remove_device_change_listener(&listener);

        audio.state().connect_device(mic(0));
        video.state().connect_device(camera("/dev/video0"));

        assert_eq!(balance.total_calls(), 0);
    }

    #[test]
    fn queries_delegate_to_managers() {
        let (audio, video, devices) = directory();
        audio.state().connect_device(mic(3));
        let cam = camera("/dev/video2");
        video.state().connect_device(Arc::clone(&cam));
        video.state().set_default_capture_device(Some(Arc::clone(&cam)));

        assert_eq!(devices.audio_capture_devices().unwrap().len(), 1);
        assert_eq!(devices.default_video_capture_device().unwrap(), Some(cam));
        assert!(devices.audio_playback_devices().unwrap().is_empty());
    }

    #[tokio::test]
    async fn merged_stream_carries_both_kinds() {
        let (audio, video, devices) = directory();
        let events = devices.events();
        tokio::pin!(events);

        audio.state().connect_device(mic(0));
        video.state().connect_device(camera("/dev/video0"));

        let mut kinds = Vec::new();
        for _ in 0..2 {
            let event = tokio::time::timeout(Duration::from_secs(1), events.next())
                .await
                .unwrap()
                .unwrap();
            match event {
                DeviceEvent::Connected { device, .. } => kinds.push(device.kind()),
                other => panic!("unexpected event {other:?}"),
            }
        }
        kinds.sort_by_key(|kind| *kind == MediaKind::Video);

        assert_eq!(kinds, vec![MediaKind::Audio, MediaKind::Video]);
    }

    #[tokio::test]
    async fn default_changes_are_streamed() {
        let (audio, _video, devices) = directory();
        let events = devices.events();
        tokio::pin!(events);

        let d = mic(7);
        audio.state().connect_device(Arc::clone(&d));
        audio.state().set_default_capture_device(Some(d));

        let mut saw_default = false;
        for _ in 0..2 {
            let event = tokio::time::timeout(Duration::from_secs(1), events.next())
                .await
                .unwrap()
                .unwrap();
            if let DeviceEvent::DefaultChanged {
                kind,
                direction,
                device,
                ..
            } = event
            {
                assert_eq!(kind, MediaKind::Audio);
                assert_eq!(direction, DirectionType::Capture);
                assert_eq!(device.unwrap().descriptor(), "hw:7,0");
                saw_default = true;
            }
        }

        assert!(saw_default);
    }
}
