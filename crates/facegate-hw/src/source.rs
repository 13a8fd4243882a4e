//! Frame source contract and the single-handle device slot.

use crate::camera::CameraError;
use crate::frame::Frame;

/// A live, non-restartable sequence of frames.
///
/// `read` fails with [`CameraError::DeviceUnavailable`] when the device cannot
/// deliver a frame; callers skip the cycle and try again on the next tick.
pub trait FrameSource {
    fn read(&mut self) -> Result<Frame, CameraError>;
}

/// Holds at most one open device handle.
///
/// The handle is opened lazily on first acquire and reused afterwards. A failed
/// open leaves the slot empty so the next acquire retries.
pub struct DeviceSlot<S> {
    handle: Option<S>,
    opens: usize,
}

impl<S: FrameSource> DeviceSlot<S> {
    pub fn new() -> Self {
        Self {
            handle: None,
            opens: 0,
        }
    }

    /// Return the open handle, calling `open` only if none exists yet.
    pub fn acquire_with<F>(&mut self, open: F) -> Result<&mut S, CameraError>
    where
        F: FnOnce() -> Result<S, CameraError>,
    {
        if self.handle.is_none() {
            self.handle = Some(open()?);
            self.opens += 1;
        }
        self.handle
            .as_mut()
            .ok_or_else(|| CameraError::DeviceUnavailable("device slot empty".into()))
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    /// Number of successful opens over the slot's lifetime.
    pub fn opens(&self) -> usize {
        self.opens
    }
}

impl<S: FrameSource> Default for DeviceSlot<S> {
    fn default() -> Self {
        Self::new()
    }
}
