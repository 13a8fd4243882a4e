//! Capture manager: holds the most recent raw frame and freezes it on demand.

use facegate_core::{Capture, CapturePurpose};
use facegate_hw::Frame;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("no frame has been produced yet")]
    NoFrameAvailable,
}

/// Single slot for the latest frame. Each new frame replaces the previous one.
#[derive(Default)]
pub struct CaptureManager {
    latest: Option<Frame>,
}

impl CaptureManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, frame: Frame) {
        self.latest = Some(frame);
    }

    pub fn latest(&self) -> Option<&Frame> {
        self.latest.as_ref()
    }

    /// Freeze the latest frame into a still image tagged with `purpose`.
    pub fn capture(&self, purpose: CapturePurpose) -> Result<Capture, CaptureError> {
        let frame = self.latest.as_ref().ok_or(CaptureError::NoFrameAvailable)?;
        // Frames are built with a length check, so conversion only fails on a
        // corrupted slot; treat that like having no frame.
        let image = frame
            .to_rgb_image()
            .map_err(|_| CaptureError::NoFrameAvailable)?;
        Ok(Capture::new(purpose, image))
    }
}
