use std::fmt;

use serde::{Deserialize, Serialize};

/// Raw pixel or compressed format of captured frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VideoType {
    /// Format not recognised
    Unknown,
    /// Planar YUV 4:2:0, U before V
    I420,
    /// Alias of I420 used by some drivers
    Iyuv,
    /// Packed 24 bit RGB
    Rgb24,
    /// Packed 32 bit ARGB
    Argb,
    /// Packed 32 bit BGRA
    Bgra,
    /// Packed 16 bit RGB 5:6:5
    Rgb565,
    /// Packed YUV 4:2:2, Y0 U Y1 V
    Yuy2,
    /// Planar YUV 4:2:0, V before U
    Yv12,
    /// Packed YUV 4:2:2, U Y0 V Y1
    Uyvy,
    /// Motion JPEG
    Mjpeg,
    /// Semi-planar YUV 4:2:0, interleaved UV
    Nv12,
    /// Semi-planar YUV 4:2:0, interleaved VU
    Nv21,
}

impl VideoType {
    /// Maps a FourCC code to a video type.
    ///
    /// Covers the codes used by V4L2, Media Foundation subtypes and
    /// CoreVideo pixel formats.
    pub fn from_fourcc(code: [u8; 4]) -> Self {
        match &code {
            b"I420" | b"YU12" => VideoType::I420,
            b"IYUV" => VideoType::Iyuv,
            b"RGB3" | b"24BG" => VideoType::Rgb24,
            b"RGB4" | b"ARGB" => VideoType::Argb,
            b"BGR4" | b"BGRA" => VideoType::Bgra,
            b"RGBP" => VideoType::Rgb565,
            b"YUY2" | b"YUYV" | b"yuvs" => VideoType::Yuy2,
            b"YV12" => VideoType::Yv12,
            b"UYVY" | b"2vuy" => VideoType::Uyvy,
            b"MJPG" | b"dmb1" | b"jpeg" => VideoType::Mjpeg,
            b"NV12" | b"420v" | b"420f" => VideoType::Nv12,
            b"NV21" => VideoType::Nv21,
            _ => VideoType::Unknown,
        }
    }

    /// Maps a FourCC stored as a little-endian `u32`, as in V4L2 and
    /// Media Foundation subtype GUIDs.
    pub fn from_fourcc_le(code: u32) -> Self {
        Self::from_fourcc(code.to_le_bytes())
    }

    /// Maps a FourCC stored big-endian, as in CoreVideo `FourCharCode`.
    pub fn from_fourcc_be(code: u32) -> Self {
        Self::from_fourcc(code.to_be_bytes())
    }
}

impl fmt::Display for VideoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VideoType::Unknown => "unknown",
            VideoType::I420 => "I420",
            VideoType::Iyuv => "IYUV",
            VideoType::Rgb24 => "RGB24",
            VideoType::Argb => "ARGB",
            VideoType::Bgra => "BGRA",
            VideoType::Rgb565 => "RGB565",
            VideoType::Yuy2 => "YUY2",
            VideoType::Yv12 => "YV12",
            VideoType::Uyvy => "UYVY",
            VideoType::Mjpeg => "MJPEG",
            VideoType::Nv12 => "NV12",
            VideoType::Nv21 => "NV21",
        };

        f.write_str(name)
    }
}

/// One frame size, rate and format combination a capture device offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VideoCaptureCapability {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Highest frame rate at this size
    pub max_fps: u32,
    /// Frame format
    pub video_type: VideoType,
}

impl VideoCaptureCapability {
    /// Creates a capability.
    pub fn new(width: u32, height: u32, max_fps: u32, video_type: VideoType) -> Self {
        Self {
            width,
            height,
            max_fps,
            video_type,
        }
    }

    /// Frame rate of a frame interval given as `numerator / denominator`
    /// seconds. Zero numerators yield zero.
    pub fn fps_from_interval(numerator: u32, denominator: u32) -> u32 {
        if numerator == 0 {
            0
        } else {
            denominator / numerator
        }
    }
}

impl fmt::Display for VideoCaptureCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} @ {} fps, {}",
            self.width, self.height, self.max_fps, self.video_type
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_v4l2_codes() {
        assert_eq!(VideoType::from_fourcc(*b"YUYV"), VideoType::Yuy2);
        assert_eq!(VideoType::from_fourcc(*b"MJPG"), VideoType::Mjpeg);
        assert_eq!(VideoType::from_fourcc(*b"YU12"), VideoType::I420);
        assert_eq!(VideoType::from_fourcc(*b"H264"), VideoType::Unknown);
    }

    #[test]
    fn byte_order_variants_agree() {
        let le = u32::from_le_bytes(*b"NV12");
        let be = u32::from_be_bytes(*b"NV12");

        assert_eq!(VideoType::from_fourcc_le(le), VideoType::Nv12);
        assert_eq!(VideoType::from_fourcc_be(be), VideoType::Nv12);
    }

    #[test]
    fn fps_from_frame_interval() {
        assert_eq!(VideoCaptureCapability::fps_from_interval(1, 30), 30);
        assert_eq!(VideoCaptureCapability::fps_from_interval(1001, 30000), 29);
        assert_eq!(VideoCaptureCapability::fps_from_interval(0, 30), 0);
    }

    #[test]
    fn formats_for_humans() {
        let capability = VideoCaptureCapability::new(1280, 720, 30, VideoType::Mjpeg);

        assert_eq!(capability.to_string(), "1280x720 @ 30 fps, MJPEG");
    }
}
