//! Camera capture for the recognition loop.
//!
//! Provides V4L2-based capture producing RGB frames from YUYV or MJPEG
//! devices.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, PixelFormat};
pub use frame::{Frame, FrameError};
