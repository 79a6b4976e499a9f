//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, Frame};
use std::ops::ControlFlow;
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const STREAM_BUFFERS: u32 = 4;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("video capture not supported")]
    CaptureNotSupported,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed.
    Yuyv,
    /// Motion-JPEG, one JPEG per buffer.
    Mjpeg,
}

impl PixelFormat {
    fn fourcc(self) -> FourCC {
        match self {
            PixelFormat::Yuyv => FourCC::new(b"YUYV"),
            PixelFormat::Mjpeg => FourCC::new(b"MJPG"),
        }
    }
}

/// V4L2 camera device handle.
pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub pixel_format: PixelFormat,
}

impl Camera {
    /// Open a camera and request `width`×`height`, preferring YUYV and
    /// falling back to MJPEG. The driver may pick a nearby resolution.
    pub fn open(device_path: &str, width: u32, height: u32) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device
            .query_caps()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to query capabilities: {e}")))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::CaptureNotSupported);
        }
        tracing::info!(device = device_path, driver = %caps.driver, card = %caps.card, "opened camera");

        let mut negotiated = None;
        for wanted in [PixelFormat::Yuyv, PixelFormat::Mjpeg] {
            let mut fmt = device.format().map_err(|e| {
                CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
            })?;
            fmt.fourcc = wanted.fourcc();
            fmt.width = width;
            fmt.height = height;
            match device.set_format(&fmt) {
                Ok(got) if got.fourcc == wanted.fourcc() => {
                    negotiated = Some((wanted, got));
                    break;
                }
                Ok(got) => tracing::debug!(wanted = ?wanted.fourcc(), got = ?got.fourcc, "format not accepted"),
                Err(e) => tracing::debug!(wanted = ?wanted.fourcc(), error = %e, "set_format failed"),
            }
        }
        let Some((pixel_format, fmt)) = negotiated else {
            return Err(CameraError::FormatNegotiationFailed(
                "device supports neither YUYV nor MJPG".into(),
            ));
        };

        tracing::info!(
            width = fmt.width,
            height = fmt.height,
            format = ?pixel_format,
            "negotiated format"
        );

        Ok(Self {
            device,
            width: fmt.width,
            height: fmt.height,
            device_path: device_path.to_string(),
            pixel_format,
        })
    }

    /// Stream frames into `on_frame` until it breaks or a read fails.
    ///
    /// The mmap stream lives only for this call and is released on return.
    /// Buffers that fail to convert are skipped; a failed dequeue ends the
    /// stream with an error.
    pub fn stream<F>(&self, mut on_frame: F) -> Result<(), CameraError>
    where
        F: FnMut(Frame) -> ControlFlow<()>,
    {
        let mut stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))?;

        loop {
            let (buf, meta) = stream
                .next()
                .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;
            let used = (meta.bytesused as usize).min(buf.len());
            // A corrupt buffer costs one frame, not the stream
            let image = match self.decode(&buf[..used]) {
                Ok(image) => image,
                Err(e) => {
                    tracing::warn!(seq = meta.sequence, error = %e, "dropping undecodable frame");
                    continue;
                }
            };
            let frame = Frame {
                image,
                timestamp: std::time::Instant::now(),
                sequence: meta.sequence,
            };
            if on_frame(frame).is_break() {
                return Ok(());
            }
        }
    }

    fn decode(&self, buf: &[u8]) -> Result<image::RgbImage, CameraError> {
        let image = match self.pixel_format {
            PixelFormat::Yuyv => frame::yuyv_to_rgb(buf, self.width, self.height),
            PixelFormat::Mjpeg => frame::mjpeg_to_rgb(buf),
        };
        image.map_err(|e| CameraError::CaptureFailed(format!("frame conversion failed: {e}")))
    }
}
