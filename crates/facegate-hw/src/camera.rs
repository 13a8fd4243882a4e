//! Kiosk camera over V4L2 (`v4l` crate).

use crate::frame::{self, Frame};
use crate::source::FrameSource;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::capability::Flags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

/// Requested preview resolution; the driver may pick the nearest it supports.
const PREVIEW_WIDTH: u32 = 640;
const PREVIEW_HEIGHT: u32 = 480;
const STREAM_BUFFERS: u32 = 4;
/// A dequeue that waits longer than this fails the tick instead of stalling it.
const DEQUEUE_TIMEOUT: Duration = Duration::from_secs(1);
/// Highest `/dev/videoN` probed by [`Camera::list_devices`].
const MAX_VIDEO_NODES: u32 = 16;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
}

/// A video capture node found by [`Camera::list_devices`].
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{} ({}, {})", self.path, self.name, self.driver, self.bus)
    }
}

/// Pixel layouts the kiosk can turn into RGB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Packed YUYV 4:2:2, the usual webcam default.
    Yuyv,
    Grey,
    /// Little-endian 16-bit luminance.
    Y16,
}

impl PixelFormat {
    pub fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(Self::Yuyv),
            b"GREY" => Some(Self::Grey),
            b"Y16 " | b"Y16\0" => Some(Self::Y16),
            _ => None,
        }
    }

    /// Convert one raw driver buffer into packed RGB8.
    pub fn to_rgb(self, buf: &[u8], width: u32, height: u32) -> Result<Vec<u8>, CameraError> {
        let converted = match self {
            Self::Yuyv => frame::yuyv_to_rgb(buf, width, height),
            Self::Y16 => frame::y16_to_rgb(buf, width, height),
            Self::Grey => {
                let pixels = (width * height) as usize;
                buf.get(..pixels)
                    .map(frame::grey_to_rgb)
                    .ok_or(frame::FrameError::InvalidLength {
                        expected: pixels,
                        actual: buf.len(),
                    })
            }
        };
        converted.map_err(|e| CameraError::DeviceUnavailable(format!("{self:?} conversion: {e}")))
    }
}

/// An open camera with a negotiated format and a running capture stream.
///
/// The stream is set up once and reused for every frame, so the driver keeps
/// streaming (and auto-exposure keeps its state) between preview ticks.
pub struct Camera {
    stream: MmapStream<'static>,
    path: String,
    pub width: u32,
    pub height: u32,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open `device_path` (e.g. "/dev/video0") and negotiate a preview format.
    pub fn open(device_path: &str) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| match e.raw_os_error() {
            Some(16) => CameraError::DeviceBusy, // EBUSY
            _ => CameraError::DeviceUnavailable(format!("{device_path}: {e}")),
        })?;

        let caps = device
            .query_caps()
            .map_err(|e| CameraError::DeviceUnavailable(format!("query capabilities: {e}")))?;
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        let (width, height, pixel_format) = negotiate(&device)?;
        // The stream holds its own handle to the device, so it outlives `device`.
        let mut stream = MmapStream::with_buffers(&device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| CameraError::DeviceUnavailable(format!("mmap stream: {e}")))?;
        stream.set_timeout(DEQUEUE_TIMEOUT);
        tracing::info!(
            device = device_path,
            card = %caps.card,
            width,
            height,
            format = ?pixel_format,
            "camera opened"
        );

        Ok(Self {
            stream,
            path: device_path.to_string(),
            width,
            height,
            pixel_format,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    /// Dequeue the next buffer from the running stream as an RGB frame.
    /// Streaming starts on the first call.
    pub fn capture_frame(&mut self) -> Result<Frame, CameraError> {
        let (buf, meta) = self
            .stream
            .next()
            .map_err(|e| CameraError::DeviceUnavailable(format!("dequeue buffer: {e}")))?;

        let rgb = self.pixel_format.to_rgb(buf, self.width, self.height)?;
        Frame::from_rgb(rgb, self.width, self.height, meta.sequence)
            .map_err(|e| CameraError::DeviceUnavailable(e.to_string()))
    }

    /// Read and drop `count` frames so auto-exposure can settle.
    pub fn discard_frames(&mut self, count: usize) {
        for _ in 0..count {
            if let Err(err) = self.capture_frame() {
                tracing::debug!(error = %err, "warmup frame failed");
            }
        }
    }

    /// Video capture nodes among `/dev/video0..15`.
    pub fn list_devices() -> Vec<DeviceInfo> {
        (0..MAX_VIDEO_NODES)
            .map(|i| format!("/dev/video{i}"))
            .filter(|path| Path::new(path).exists())
            .filter_map(|path| {
                let caps = Device::with_path(&path).ok()?.query_caps().ok()?;
                caps.capabilities.contains(Flags::VIDEO_CAPTURE).then(|| DeviceInfo {
                    path,
                    name: caps.card,
                    driver: caps.driver,
                    bus: caps.bus,
                })
            })
            .collect()
    }
}

/// Ask for YUYV at the preview size and accept whatever supported layout the
/// driver settles on.
fn negotiate(device: &Device) -> Result<(u32, u32, PixelFormat), CameraError> {
    let mut requested = device
        .format()
        .map_err(|e| CameraError::FormatNegotiationFailed(format!("get format: {e}")))?;
    requested.fourcc = FourCC::new(b"YUYV");
    requested.width = PREVIEW_WIDTH;
    requested.height = PREVIEW_HEIGHT;

    let actual = device
        .set_format(&requested)
        .map_err(|e| CameraError::FormatNegotiationFailed(format!("set format: {e}")))?;
    let pixel_format = PixelFormat::from_fourcc(actual.fourcc).ok_or_else(|| {
        CameraError::FormatNegotiationFailed(format!(
            "driver chose {} (supported: YUYV, GREY, Y16)",
            actual.fourcc
        ))
    })?;
    Ok((actual.width, actual.height, pixel_format))
}

impl FrameSource for Camera {
    fn read(&mut self) -> Result<Frame, CameraError> {
        self.capture_frame()
    }
}
