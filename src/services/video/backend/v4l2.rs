use std::{
    collections::BTreeSet,
    fs, io,
    path::{Path, PathBuf},
    sync::{Arc, mpsc},
    thread::{self, JoinHandle},
    time::Duration,
};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher, recommended_watcher};
use tracing::{debug, instrument, trace, warn};
use v4l::{
    capability::Flags, frameinterval::FrameIntervalEnum, framesize::FrameSizeEnum, video::Capture,
};

use crate::{
    config::VideoConfig,
    services::{
        DeviceError,
        common::{
            Device, DeviceTransport, Lifecycle,
            descriptor::{device_node_descriptor, is_video_node_name},
        },
        video::{VideoCaptureCapability, VideoDevice, VideoDeviceManager, VideoDeviceState, VideoType},
    },
};

const BACKEND: &str = "V4L2";
const THREAD_NAME: &str = "avdev-v4l2";

/// Node change reported by the filesystem watcher
#[derive(Debug)]
enum NodeEvent {
    Created(PathBuf),
    Removed(PathBuf),
}

struct Shared {
    state: VideoDeviceState,
    lifecycle: Lifecycle,
    device_dir: PathBuf,
    probe_retries: u32,
    probe_retry_delay: Duration,
}

impl Shared {
    fn enumerate(&self) -> Result<(), DeviceError> {
        for device in scan(&self.device_dir)? {
            self.state.insert_device(Arc::new(device));
        }
        Ok(())
    }

    /// Probes a freshly created node. udev may still be applying
    /// permissions, so open failures are retried.
    fn probe_new_node(&self, path: &Path) -> Option<VideoDevice> {
        for attempt in 0..=self.probe_retries {
            match probe_node(&self.device_dir, path) {
                Ok(device) => return device,
                Err(e) => {
                    trace!(path = %path.display(), attempt, error = %e, "Node not ready");
                    thread::sleep(self.probe_retry_delay);
                }
            }
        }

        debug!(path = %path.display(), "Giving up on new video node");
        None
    }

    fn apply(&self, event: NodeEvent) {
        if !self.lifecycle.is_ready() {
            trace!(?event, "Ignoring node event before enumeration");
            return;
        }

        match event {
            NodeEvent::Created(path) => {
                if let Some(device) = self.probe_new_node(&path) {
                    self.state.connect_device(Arc::new(device));
                }
            }
            NodeEvent::Removed(path) => {
                let descriptor = device_node_descriptor(&self.device_dir, &path);
                self.state
                    .disconnect_devices(|device| device.descriptor() == descriptor);
            }
        }
    }
}

/// Video capture devices exposed as V4L2 nodes.
///
/// A filesystem watcher on the device directory feeds node creation and
/// removal into a monitor thread. V4L2 has no default device.
pub struct V4l2VideoDeviceManager {
    shared: Arc<Shared>,
    watcher: Option<RecommendedWatcher>,
    monitor: Option<JoinHandle<()>>,
}

impl V4l2VideoDeviceManager {
    /// Starts watching the device directory.
    ///
    /// # Errors
    /// Returns error if the directory cannot be watched or the monitor thread
    /// cannot be spawned
    #[instrument(skip(config), fields(device_dir = %config.device_dir.display()))]
    pub fn new(config: &VideoConfig) -> Result<Self, DeviceError> {
        let shared = Arc::new(Shared {
            state: VideoDeviceState::new(),
            lifecycle: Lifecycle::new(),
            device_dir: config.device_dir.clone(),
            probe_retries: config.probe_retries,
            probe_retry_delay: config.probe_retry_delay(),
        });

        let (event_tx, event_rx) = mpsc::channel::<NodeEvent>();

        let mut watcher = recommended_watcher(move |res: notify::Result<Event>| {
            let Ok(event) = res else {
                return;
            };

            for path in event.paths {
                let is_node = path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(is_video_node_name);
                if !is_node {
                    continue;
                }

                let node_event = match event.kind {
                    EventKind::Create(_) => NodeEvent::Created(path),
                    EventKind::Remove(_) => NodeEvent::Removed(path),
                    _ => continue,
                };
                let _ = event_tx.send(node_event);
            }
        })
        .map_err(|e| DeviceError::initialization(BACKEND, e))?;

        watcher
            .watch(&config.device_dir, RecursiveMode::NonRecursive)
            .map_err(|e| DeviceError::initialization(BACKEND, e))?;

        let monitored = Arc::clone(&shared);
        let monitor = thread::Builder::new()
            .name(String::from(THREAD_NAME))
            .spawn(move || {
                while let Ok(event) = event_rx.recv() {
                    monitored.apply(event);
                }
                debug!("V4L2 monitor stopped");
            })
            .map_err(|e| DeviceError::initialization(BACKEND, e))?;

        Ok(Self {
            shared,
            watcher: Some(watcher),
            monitor: Some(monitor),
        })
    }
}

impl VideoDeviceManager for V4l2VideoDeviceManager {
    fn state(&self) -> &VideoDeviceState {
        &self.shared.state
    }

    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    fn ensure_enumerated(&self) -> Result<(), DeviceError> {
        self.shared.lifecycle.ensure_ready(|| self.shared.enumerate())
    }

    fn video_capture_capabilities(
        &self,
        device: &VideoDevice,
    ) -> Result<BTreeSet<VideoCaptureCapability>, DeviceError> {
        query_capabilities(Path::new(device.descriptor())).map_err(|e| {
            DeviceError::query(BACKEND, format!("{}: {e}", device.descriptor()))
        })
    }
}

impl Drop for V4l2VideoDeviceManager {
    fn drop(&mut self) {
        if !self.shared.lifecycle.begin_dispose() {
            return;
        }

        // The watcher owns the event sender; dropping it ends the monitor loop.
        drop(self.watcher.take());

        if let Some(handle) = self.monitor.take() {
            if handle.thread().id() == thread::current().id() {
                warn!("V4L2 manager dropped on its monitor thread, not joining");
            } else if handle.join().is_err() {
                warn!("V4L2 monitor thread panicked");
            }
        }

        self.shared.lifecycle.mark_stopped();
        debug!("V4L2 manager stopped");
    }
}

/// Maps the V4L2 bus info to a transport.
pub(crate) fn bus_transport(bus: &str) -> DeviceTransport {
    if bus.starts_with("usb-") {
        DeviceTransport::Usb
    } else if bus.starts_with("pci") {
        DeviceTransport::Pci
    } else if bus.starts_with("platform:") {
        DeviceTransport::BuiltIn
    } else {
        DeviceTransport::Unknown
    }
}

/// Opens `path` and returns it as a device if it captures video in at least
/// one format.
fn probe_node(device_dir: &Path, path: &Path) -> io::Result<Option<VideoDevice>> {
    let device = v4l::Device::with_path(path)?;
    let caps = device.query_caps()?;

    if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
        trace!(path = %path.display(), "Not a capture node");
        return Ok(None);
    }
    if device.enum_formats()?.is_empty() {
        trace!(path = %path.display(), "Capture node without formats");
        return Ok(None);
    }

    let descriptor = device_node_descriptor(device_dir, path);
    let transport = bus_transport(&caps.bus);

    Ok(Some(VideoDevice::new(
        Device::new(caps.card, descriptor).with_transport(transport),
    )))
}

fn scan(device_dir: &Path) -> Result<Vec<VideoDevice>, DeviceError> {
    let entries = fs::read_dir(device_dir)
        .map_err(|e| DeviceError::query(BACKEND, format!("{}: {e}", device_dir.display())))?;

    let mut nodes: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(is_video_node_name)
        })
        .collect();
    nodes.sort();

    let devices: Vec<VideoDevice> = nodes
        .iter()
        .filter_map(|path| match probe_node(device_dir, path) {
            Ok(device) => device,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Skipping unreadable video node");
                None
            }
        })
        .collect();

    debug!(count = devices.len(), "V4L2 scan");
    Ok(devices)
}

fn query_capabilities(path: &Path) -> io::Result<BTreeSet<VideoCaptureCapability>> {
    let device = v4l::Device::with_path(path)?;
    let mut capabilities = BTreeSet::new();

    for format in device.enum_formats()? {
        let video_type = VideoType::from_fourcc(format.fourcc.repr);

        let sizes = match device.enum_framesizes(format.fourcc) {
            Ok(sizes) => sizes,
            Err(e) => {
                debug!(fourcc = %format.fourcc, error = %e, "No frame sizes");
                continue;
            }
        };

        for size in sizes {
            let (width, height) = match size.size {
                FrameSizeEnum::Discrete(discrete) => (discrete.width, discrete.height),
                FrameSizeEnum::Stepwise(stepwise) => (stepwise.max_width, stepwise.max_height),
            };

            let intervals = device
                .enum_frameintervals(format.fourcc, width, height)
                .unwrap_or_default();

            for interval in intervals {
                let max_fps = match interval.interval {
                    FrameIntervalEnum::Discrete(fraction) => {
                        VideoCaptureCapability::fps_from_interval(
                            fraction.numerator,
                            fraction.denominator,
                        )
                    }
                    FrameIntervalEnum::Stepwise(stepwise) => {
                        VideoCaptureCapability::fps_from_interval(
                            stepwise.min.numerator,
                            stepwise.min.denominator,
                        )
                    }
                };

                if max_fps > 0 {
                    capabilities.insert(VideoCaptureCapability::new(
                        width, height, max_fps, video_type,
                    ));
                }
            }
        }
    }

    Ok(capabilities)
}
