use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Instant;

/// Axis-aligned face bounding box in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceRegion {
    /// Build a region from corner coordinates, clamped to a `frame_w` × `frame_h` frame.
    ///
    /// Returns `None` when nothing of the box remains inside the frame.
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32, frame_w: u32, frame_h: u32) -> Option<Self> {
        if frame_w == 0 || frame_h == 0 || !(x1.is_finite() && y1.is_finite() && x2.is_finite() && y2.is_finite()) {
            return None;
        }
        let left = x1.min(x2).clamp(0.0, frame_w as f32);
        let top = y1.min(y2).clamp(0.0, frame_h as f32);
        let right = x1.max(x2).clamp(0.0, frame_w as f32);
        let bottom = y1.max(y2).clamp(0.0, frame_h as f32);

        let width = (right - left).round() as u32;
        let height = (bottom - top).round() as u32;
        if width == 0 || height == 0 {
            return None;
        }
        Some(Self {
            x: left.round() as u32,
            y: top.round() as u32,
            width,
            height,
        })
    }
}

/// Why a capture was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapturePurpose {
    LoginProbe,
    Enrollment,
}

/// A still image frozen from the most recent frame.
#[derive(Clone)]
pub struct Capture {
    pub purpose: CapturePurpose,
    pub image: RgbImage,
    pub taken_at: Instant,
}

impl Capture {
    pub fn new(purpose: CapturePurpose, image: RgbImage) -> Self {
        Self {
            purpose,
            image,
            taken_at: Instant::now(),
        }
    }
}

impl std::fmt::Debug for Capture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capture")
            .field("purpose", &self.purpose)
            .field("dimensions", &self.image.dimensions())
            .finish()
    }
}

/// One enrolled user and the reference image backing them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentRecord {
    pub username: String,
    pub image_path: PathBuf,
}

/// Result of a single verification attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationOutcome {
    Identified(String),
    UnknownIdentity,
    NoFaceFound,
    /// The matcher failed, timed out, or produced unreadable output.
    MatcherError(String),
}

impl VerificationOutcome {
    /// Only a confirmed identity lets the user in.
    pub fn grants_access(&self) -> bool {
        matches!(self, Self::Identified(_))
    }

    /// Message shown to the user. Matcher failures read as an unknown identity.
    pub fn message(&self) -> String {
        match self {
            Self::Identified(user) => format!("Welcome, {user}!"),
            Self::UnknownIdentity | Self::MatcherError(_) => {
                "Unknown user! Please register or try again.".to_string()
            }
            Self::NoFaceFound => "No face found. Please try again.".to_string(),
        }
    }
}
