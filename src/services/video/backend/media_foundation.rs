#![allow(unsafe_code)]

use std::{collections::BTreeSet, ptr, slice, sync::Arc};

use tracing::{debug, instrument, trace, warn};
use windows::{
    Win32::{
        Media::{
            KernelStreaming::KSCATEGORY_VIDEO,
            MediaFoundation::{
                IMFActivate, IMFAttributes, IMFMediaSource, IMFMediaType, MF_DEVSOURCE_ATTRIBUTE_FRIENDLY_NAME,
                MF_DEVSOURCE_ATTRIBUTE_SOURCE_TYPE, MF_DEVSOURCE_ATTRIBUTE_SOURCE_TYPE_VIDCAP_GUID,
                MF_DEVSOURCE_ATTRIBUTE_SOURCE_TYPE_VIDCAP_SYMBOLIC_LINK, MF_MT_FRAME_RATE,
                MF_MT_FRAME_SIZE, MF_MT_SUBTYPE, MF_SOURCE_READER_FIRST_VIDEO_STREAM,
                MF_VERSION, MFCreateAttributes, MFCreateSourceReaderFromMediaSource,
                MFEnumDeviceSources, MFSTARTUP_LITE, MFShutdown, MFStartup,
            },
        },
        System::Com::CoTaskMemFree,
    },
    core::{GUID, PWSTR},
};

use super::device_notifier::{DeviceNotifier, InterfaceChange};
use crate::services::{
    DeviceError,
    common::{
        Device, DeviceTransport, Lifecycle,
        com::{MtaUsage, take_co_string},
        descriptor::{same_symbolic_link, symbolic_link_instance},
    },
    video::{VideoCaptureCapability, VideoDevice, VideoDeviceManager, VideoDeviceState, VideoType},
};

const BACKEND: &str = "MediaFoundation";
const THREAD_NAME: &str = "avdev-mf-notify";

/// Numeric subtypes that are D3D formats rather than FourCCs.
const D3DFMT_R8G8B8: u32 = 20;
const D3DFMT_A8R8G8B8: u32 = 21;
const D3DFMT_X8R8G8B8: u32 = 22;
const D3DFMT_R5G6B5: u32 = 23;

struct Shared {
    state: VideoDeviceState,
    lifecycle: Lifecycle,
}

impl Shared {
    fn enumerate(&self) -> Result<(), DeviceError> {
        for device in scan()? {
            self.state.insert_device(Arc::new(device));
        }
        Ok(())
    }

    fn apply(&self, change: InterfaceChange) {
        if !self.lifecycle.is_ready() {
            trace!(?change, "Ignoring interface change before enumeration");
            return;
        }

        match change {
            // The arrival carries only a link; re-enumerate to learn the name.
            InterfaceChange::Arrived(link) => match scan() {
                Ok(present) => {
                    for device in present {
                        if same_symbolic_link(device.descriptor(), &link) {
                            self.state.connect_device(Arc::new(device));
                        }
                    }
                }
                Err(e) => warn!(error = %e, link, "Rescan after arrival failed"),
            },
            InterfaceChange::Removed(link) => {
                self.state
                    .disconnect_devices(|device| same_symbolic_link(device.descriptor(), &link));
            }
        }
    }
}

/// Cameras exposed through Media Foundation.
///
/// Interface arrival and removal for `KSCATEGORY_VIDEO` come from a
/// notifier thread. Descriptors are symbolic links; the same camera is
/// reported under different interface classes, so links are compared by
/// instance. Windows has no default camera.
pub struct MediaFoundationVideoDeviceManager {
    shared: Arc<Shared>,
    notifier: Option<DeviceNotifier>,
    _mta: MtaUsage,
}

impl MediaFoundationVideoDeviceManager {
    /// Starts Media Foundation and the notifier thread.
    ///
    /// # Errors
    /// Returns error if Media Foundation or the notifier cannot be started
    #[instrument]
    pub fn new() -> Result<Self, DeviceError> {
        let mta = MtaUsage::acquire().map_err(|e| DeviceError::initialization(BACKEND, e))?;

        // SAFETY: balanced by MFShutdown in Drop or below on failure.
        unsafe { MFStartup(MF_VERSION, MFSTARTUP_LITE) }
            .map_err(|e| DeviceError::initialization(BACKEND, e))?;

        let shared = Arc::new(Shared {
            state: VideoDeviceState::new(),
            lifecycle: Lifecycle::new(),
        });

        let notified = Arc::clone(&shared);
        let notifier = DeviceNotifier::spawn(THREAD_NAME, KSCATEGORY_VIDEO, move |change| {
            notified.apply(change);
        });

        let notifier = match notifier {
            Ok(notifier) => notifier,
            Err(e) => {
                // SAFETY: balances the MFStartup above.
                let _ = unsafe { MFShutdown() };
                return Err(DeviceError::initialization(BACKEND, e));
            }
        };

        Ok(Self {
            shared,
            notifier: Some(notifier),
            _mta: mta,
        })
    }
}

impl VideoDeviceManager for MediaFoundationVideoDeviceManager {
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
        let activate = device_sources()?
            .into_iter()
            .find(|activate| {
                attribute_string(activate, &MF_DEVSOURCE_ATTRIBUTE_SOURCE_TYPE_VIDCAP_SYMBOLIC_LINK)
                    .is_some_and(|link| same_symbolic_link(&link, device.descriptor()))
            })
            .ok_or_else(|| {
                DeviceError::query(BACKEND, format!("no device with link {}", device.descriptor()))
            })?;

        let capabilities = capabilities(&activate);

        // SAFETY: releases the source created by `capabilities`.
        if let Err(e) = unsafe { activate.ShutdownObject() } {
            debug!(error = %e, "Shutting down media source failed");
        }

        capabilities
    }
}

impl Drop for MediaFoundationVideoDeviceManager {
    fn drop(&mut self) {
        if !self.shared.lifecycle.begin_dispose() {
            return;
        }

        drop(self.notifier.take());

        // SAFETY: balances MFStartup in `new`.
        if let Err(e) = unsafe { MFShutdown() } {
            warn!(error = %e, "MFShutdown failed");
        }

        self.shared.lifecycle.mark_stopped();
        debug!("Media Foundation manager stopped");
    }
}

/// Maps a Media Foundation video subtype by its first GUID field.
pub(crate) fn subtype_video_type(data1: u32) -> VideoType {
    match data1 {
        D3DFMT_R8G8B8 => VideoType::Rgb24,
        D3DFMT_A8R8G8B8 | D3DFMT_X8R8G8B8 => VideoType::Argb,
        D3DFMT_R5G6B5 => VideoType::Rgb565,
        fourcc => VideoType::from_fourcc_le(fourcc),
    }
}

/// Splits a packed `UINT64` attribute into its high and low halves.
pub(crate) fn unpack_u64(value: u64) -> (u32, u32) {
    ((value >> 32) as u32, value as u32)
}

fn attribute_string(activate: &IMFActivate, key: &GUID) -> Option<String> {
    let mut value = PWSTR::null();
    let mut length = 0u32;

    // SAFETY: the string is freed by `take_co_string`.
    unsafe { activate.GetAllocatedString(key, &mut value, &mut length) }.ok()?;
    take_co_string(value)
}

fn device_sources() -> Result<Vec<IMFActivate>, DeviceError> {
    // SAFETY: the returned array is copied out and freed with CoTaskMemFree.
    unsafe {
        let mut attributes: Option<IMFAttributes> = None;
        MFCreateAttributes(&mut attributes, 1).map_err(|e| DeviceError::query(BACKEND, e))?;
        let attributes =
            attributes.ok_or_else(|| DeviceError::query(BACKEND, "no attribute store"))?;

        attributes
            .SetGUID(
                &MF_DEVSOURCE_ATTRIBUTE_SOURCE_TYPE,
                &MF_DEVSOURCE_ATTRIBUTE_SOURCE_TYPE_VIDCAP_GUID,
            )
            .map_err(|e| DeviceError::query(BACKEND, e))?;

        let mut sources: *mut Option<IMFActivate> = ptr::null_mut();
        let mut count = 0u32;
        MFEnumDeviceSources(&attributes, &mut sources, &mut count)
            .map_err(|e| DeviceError::query(BACKEND, e))?;

        if sources.is_null() {
            return Ok(Vec::new());
        }

        let activates = slice::from_raw_parts_mut(sources, count as usize)
            .iter_mut()
            .filter_map(Option::take)
            .collect();
        CoTaskMemFree(Some(sources as *const _));

        Ok(activates)
    }
}

fn scan() -> Result<Vec<VideoDevice>, DeviceError> {
    let devices: Vec<VideoDevice> = device_sources()?
        .iter()
        .filter_map(|activate| {
            let name = attribute_string(activate, &MF_DEVSOURCE_ATTRIBUTE_FRIENDLY_NAME)?;
            let link =
                attribute_string(activate, &MF_DEVSOURCE_ATTRIBUTE_SOURCE_TYPE_VIDCAP_SYMBOLIC_LINK)?;
            let transport = link_transport(&link);

            Some(VideoDevice::new(Device::new(name, link).with_transport(transport)))
        })
        .collect();

    trace!(count = devices.len(), "Media Foundation scan");
    Ok(devices)
}

/// Bus of a symbolic link: `\\?\usb#...` is USB, `\\?\root#...` is software.
pub(crate) fn link_transport(link: &str) -> DeviceTransport {
    let instance = symbolic_link_instance(link);
    let bus = instance
        .trim_start_matches(r"\\?\")
        .split('#')
        .next()
        .unwrap_or_default();

    match bus {
        "usb" => DeviceTransport::Usb,
        "pci" => DeviceTransport::Pci,
        "root" | "swd" => DeviceTransport::Virtual,
        "bth" | "bthenum" => DeviceTransport::Bluetooth,
        _ => DeviceTransport::Unknown,
    }
}

fn media_type_capability(media_type: &IMFMediaType) -> Option<VideoCaptureCapability> {
    // SAFETY: attribute reads on a media type owned by the reader.
    let (subtype, size, rate) = unsafe {
        (
            media_type.GetGUID(&MF_MT_SUBTYPE).ok()?,
            media_type.GetUINT64(&MF_MT_FRAME_SIZE).ok()?,
            media_type.GetUINT64(&MF_MT_FRAME_RATE).ok()?,
        )
    };

    let (width, height) = unpack_u64(size);
    let (numerator, denominator) = unpack_u64(rate);
    // The frame rate is the inverse of the interval.
    let max_fps = VideoCaptureCapability::fps_from_interval(denominator, numerator);

    (max_fps > 0).then(|| {
        VideoCaptureCapability::new(width, height, max_fps, subtype_video_type(subtype.data1))
    })
}

fn capabilities(activate: &IMFActivate) -> Result<BTreeSet<VideoCaptureCapability>, DeviceError> {
    // SAFETY: the source is shut down by the caller through the activate.
    let reader = unsafe {
        let source: IMFMediaSource = activate
            .ActivateObject()
            .map_err(|e| DeviceError::query(BACKEND, e))?;
        MFCreateSourceReaderFromMediaSource(&source, None)
            .map_err(|e| DeviceError::query(BACKEND, e))?
    };

    let stream = MF_SOURCE_READER_FIRST_VIDEO_STREAM.0 as u32;
    let mut capabilities = BTreeSet::new();

    // Stops at MF_E_NO_MORE_TYPES.
    for index in 0.. {
        // SAFETY: plain reader query.
        let Ok(media_type) = (unsafe { reader.GetNativeMediaType(stream, index) }) else {
            break;
        };

        if let Some(capability) = media_type_capability(&media_type) {
            capabilities.insert(capability);
        }
    }

    Ok(capabilities)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_and_fourcc_subtypes() {
        assert_eq!(subtype_video_type(D3DFMT_R8G8B8), VideoType::Rgb24);
        assert_eq!(subtype_video_type(D3DFMT_X8R8G8B8), VideoType::Argb);
        assert_eq!(
            subtype_video_type(u32::from_le_bytes(*b"NV12")),
            VideoType::Nv12
        );
        assert_eq!(
            subtype_video_type(u32::from_le_bytes(*b"MJPG")),
            VideoType::Mjpeg
        );
    }

    #[test]
    fn packed_attributes() {
        assert_eq!(unpack_u64((1280u64 << 32) | 720), (1280, 720));
        assert_eq!(unpack_u64((30u64 << 32) | 1), (30, 1));
    }

    #[test]
    fn transports_from_links() {
        assert_eq!(
            link_transport(r"\\?\USB#VID_046D&PID_0825&MI_00#6&2a8b1f5&0&0000#{e5323777-f976-4f5b-9b55-b94699c46e44}\global"),
            DeviceTransport::Usb
        );
        assert_eq!(
            link_transport(r"\\?\ROOT#IMAGE#0000#{e5323777-f976-4f5b-9b55-b94699c46e44}\global"),
            DeviceTransport::Virtual
        );
    }
}
