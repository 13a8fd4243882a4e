//! facegate-hw — Frame source for the kiosk camera.
//!
//! Provides V4L2-based capture, pixel-format conversion to RGB, and the
//! single-handle device slot the session uses to own the camera.

pub mod camera;
pub mod frame;
pub mod source;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use frame::{Frame, FrameError};
pub use source::{DeviceSlot, FrameSource};
