#![allow(unsafe_code)]

use std::{collections::BTreeSet, sync::Arc};

use objc2::{
    Encoding, RefEncode, class, msg_send,
    rc::{Retained, autoreleasepool},
    runtime::AnyObject,
};
use objc2_foundation::NSString;
use tracing::{debug, instrument, trace};

use crate::{
    config::VideoConfig,
    services::{
        DeviceError,
        common::{Device, DeviceTransport, Lifecycle, PollMonitor},
        video::{VideoCaptureCapability, VideoDevice, VideoDeviceManager, VideoDeviceState, VideoType},
    },
};

const BACKEND: &str = "AVFoundation";
const THREAD_NAME: &str = "avdev-avfoundation";

#[repr(C)]
struct OpaqueCMFormatDescription {
    _private: [u8; 0],
}

// SAFETY: matches the encoding AVFoundation reports for `formatDescription`.
unsafe impl RefEncode for OpaqueCMFormatDescription {
    const ENCODING_REF: Encoding =
        Encoding::Pointer(&Encoding::Struct("opaqueCMFormatDescription", &[]));
}

type CMFormatDescriptionRef = *const OpaqueCMFormatDescription;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct CMVideoDimensions {
    width: i32,
    height: i32,
}

#[link(name = "AVFoundation", kind = "framework")]
unsafe extern "C" {
    static AVMediaTypeVideo: &'static NSString;
}

#[link(name = "CoreMedia", kind = "framework")]
unsafe extern "C" {
    fn CMVideoFormatDescriptionGetDimensions(description: CMFormatDescriptionRef)
    -> CMVideoDimensions;
    fn CMFormatDescriptionGetMediaSubType(description: CMFormatDescriptionRef) -> u32;
}

struct Shared {
    state: VideoDeviceState,
    lifecycle: Lifecycle,
}

impl Shared {
    fn enumerate(&self) -> Result<(), DeviceError> {
        autoreleasepool(|_| {
            for device in capture_devices() {
                self.state.insert_device(Arc::new(describe(&device)));
            }
            self.resolve_default();
        });
        Ok(())
    }

    fn resolve_default(&self) {
        match default_unique_id() {
            Some(unique_id) => {
                self.state
                    .resolve_default_device(|device| device.descriptor() == unique_id);
            }
            None => {
                self.state.set_default_capture_device(None);
            }
        }
    }

    fn rescan(&self) {
        if !self.lifecycle.is_ready() {
            return;
        }

        autoreleasepool(|_| {
            let present: Vec<VideoDevice> = capture_devices()
                .iter()
                .map(|device| describe(device))
                .collect();
            trace!(count = present.len(), "AVFoundation rescan");

            self.state.reconcile_devices(present);
            self.resolve_default();
        });
    }
}

/// Cameras known to AVFoundation.
///
/// Capture devices are rescanned on a polling thread; the default is the
/// device AVFoundation picks for video. Descriptors are `uniqueID`s.
pub struct AvFoundationVideoDeviceManager {
    shared: Arc<Shared>,
    monitor: Option<PollMonitor>,
}

impl AvFoundationVideoDeviceManager {
    /// Starts the rescan thread.
    ///
    /// # Errors
    /// Returns error if the rescan thread cannot be spawned
    #[instrument(skip(config))]
    pub fn new(config: &VideoConfig) -> Result<Self, DeviceError> {
        let shared = Arc::new(Shared {
            state: VideoDeviceState::new(),
            lifecycle: Lifecycle::new(),
        });

        let monitored = Arc::clone(&shared);
        let monitor = PollMonitor::spawn(THREAD_NAME, config.poll_interval(), move || {
            monitored.rescan();
        })
        .map_err(|e| DeviceError::initialization(BACKEND, e))?;

        Ok(Self {
            shared,
            monitor: Some(monitor),
        })
    }
}

impl VideoDeviceManager for AvFoundationVideoDeviceManager {
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
        autoreleasepool(|_| {
            let unique_id = NSString::from_str(device.descriptor());

            // SAFETY: class method taking an NSString, returns nil if unknown.
            let capture_device: Option<Retained<AnyObject>> = unsafe {
                msg_send![class!(AVCaptureDevice), deviceWithUniqueID: &*unique_id]
            };

            capture_device
                .map(|capture_device| capabilities(&capture_device))
                .ok_or_else(|| {
                    DeviceError::query(BACKEND, format!("no device with id {}", device.descriptor()))
                })
        })
    }
}

impl Drop for AvFoundationVideoDeviceManager {
    fn drop(&mut self) {
        if !self.shared.lifecycle.begin_dispose() {
            return;
        }

        drop(self.monitor.take());
        self.shared.lifecycle.mark_stopped();
        debug!("AVFoundation manager stopped");
    }
}

/// Maps CoreVideo pixel formats and CoreMedia codec types.
pub(crate) fn core_video_type(code: u32) -> VideoType {
    match code {
        // kCVPixelFormatType_32ARGB and _24RGB are plain numbers, not FourCCs.
        0x20 => VideoType::Bgra,
        0x18 => VideoType::Rgb24,
        _ => match &code.to_be_bytes() {
            b"BGRA" => VideoType::Argb,
            b"L565" => VideoType::Rgb565,
            b"y420" | b"f420" => VideoType::I420,
            _ => VideoType::from_fourcc_be(code),
        },
    }
}

fn array_items(array: &AnyObject) -> Vec<Retained<AnyObject>> {
    // SAFETY: `array` is an NSArray.
    let count: usize = unsafe { msg_send![array, count] };

    (0..count)
        .map(|index| {
            // SAFETY: index is below `count`.
            unsafe { msg_send![array, objectAtIndex: index] }
        })
        .collect()
}

fn capture_devices() -> Vec<Retained<AnyObject>> {
    // SAFETY: AVMediaTypeVideo is a framework constant; the call returns an
    // NSArray of AVCaptureDevice.
    let devices: Retained<AnyObject> =
        unsafe { msg_send![class!(AVCaptureDevice), devicesWithMediaType: AVMediaTypeVideo] };

    array_items(&devices)
}

fn default_unique_id() -> Option<String> {
    // SAFETY: class method returning nil when no camera is present.
    let device: Option<Retained<AnyObject>> =
        unsafe { msg_send![class!(AVCaptureDevice), defaultDeviceWithMediaType: AVMediaTypeVideo] };

    device.map(|device| {
        // SAFETY: `uniqueID` is a non-null NSString property.
        let unique_id: Retained<NSString> = unsafe { msg_send![&*device, uniqueID] };
        unique_id.to_string()
    })
}

fn describe(device: &AnyObject) -> VideoDevice {
    // SAFETY: AVCaptureDevice properties.
    let (name, unique_id, transport) = unsafe {
        let name: Retained<NSString> = msg_send![device, localizedName];
        let unique_id: Retained<NSString> = msg_send![device, uniqueID];
        let transport: i32 = msg_send![device, transportType];
        (name, unique_id, transport)
    };

    VideoDevice::new(
        Device::new(name.to_string(), unique_id.to_string())
            .with_transport(DeviceTransport::from_four_char_code(transport as u32)),
    )
}

fn capabilities(device: &AnyObject) -> BTreeSet<VideoCaptureCapability> {
    // SAFETY: `formats` is an NSArray of AVCaptureDeviceFormat.
    let formats: Retained<AnyObject> = unsafe { msg_send![device, formats] };
    let mut capabilities = BTreeSet::new();

    for format in array_items(&formats) {
        // SAFETY: AVCaptureDeviceFormat properties and CoreMedia accessors on
        // the description they return.
        let (dimensions, subtype, ranges) = unsafe {
            let description: CMFormatDescriptionRef = msg_send![&*format, formatDescription];
            if description.is_null() {
                continue;
            }
            let ranges: Retained<AnyObject> = msg_send![&*format, videoSupportedFrameRateRanges];
            (
                CMVideoFormatDescriptionGetDimensions(description),
                CMFormatDescriptionGetMediaSubType(description),
                ranges,
            )
        };

        let max_fps = array_items(&ranges)
            .iter()
            .map(|range| {
                // SAFETY: AVFrameRateRange property.
                let rate: f64 = unsafe { msg_send![&**range, maxFrameRate] };
                rate
            })
            .fold(0.0_f64, f64::max);

        let (Ok(width), Ok(height)) = (
            u32::try_from(dimensions.width),
            u32::try_from(dimensions.height),
        ) else {
            continue;
        };

        capabilities.insert(VideoCaptureCapability::new(
            width,
            height,
            max_fps as u32,
            core_video_type(subtype),
        ));
    }

    capabilities
}
