//! Enrollment: `EnrollmentCapture → EnrollmentReview → {committed, LivePreview}`.

use crate::session::{SessionContext, UiState};
use facegate_core::store::validate_username;
use facegate_core::{Capture, CapturePurpose, EnrollmentRecord, EnrollmentStore, StoreError};
use facegate_hw::FrameSource;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnrollmentError {
    #[error("username cannot be empty")]
    EmptyUsername,
    #[error("username {0:?} is not allowed")]
    InvalidUsername(String),
    #[error("capture is empty, please try again")]
    NoCaptureAvailable,
    #[error("user {0} is already registered")]
    AlreadyExists(String),
    #[error("enrollment store unavailable: {}", .0.display())]
    StoreUnavailable(PathBuf),
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for EnrollmentError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::EmptyUsername => Self::EmptyUsername,
            StoreError::InvalidUsername(name) => Self::InvalidUsername(name),
            StoreError::AlreadyExists(name) => Self::AlreadyExists(name),
            StoreError::StoreUnavailable(dir) => Self::StoreUnavailable(dir),
            other => Self::Store(other),
        }
    }
}

/// Validate and write one enrollment. The store is only touched on the
/// success path, and `put` itself never overwrites.
pub fn commit_candidate(
    store: &dyn EnrollmentStore,
    candidate: Option<&Capture>,
    username: &str,
) -> Result<EnrollmentRecord, EnrollmentError> {
    let name = validate_username(username)?;
    let capture = candidate.ok_or(EnrollmentError::NoCaptureAvailable)?;
    if store.exists(name) {
        return Err(EnrollmentError::AlreadyExists(name.to_string()));
    }
    Ok(store.put(name, &capture.image)?)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollStart {
    /// In review; `false` when no frame was available to capture.
    Reviewing { has_candidate: bool },
    Ignored(UiState),
}

/// Holds the review candidate between capture and commit.
#[derive(Default)]
pub struct EnrollmentOrchestrator {
    candidate: Option<Capture>,
}

impl EnrollmentOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn candidate(&self) -> Option<&Capture> {
        self.candidate.as_ref()
    }

    /// Enter enrollment and freeze the current frame for review.
    pub fn begin<S: FrameSource>(&mut self, ctx: &mut SessionContext<S>) -> EnrollStart {
        if !matches!(ctx.state, UiState::LivePreview | UiState::ShowingOutcome) {
            return EnrollStart::Ignored(ctx.state);
        }
        ctx.state = UiState::EnrollmentCapture;

        self.candidate = match ctx.captures.capture(CapturePurpose::Enrollment) {
            Ok(capture) => Some(capture),
            Err(err) => {
                tracing::info!(error = %err, "enrollment started without a frame");
                None
            }
        };

        ctx.state = UiState::EnrollmentReview;
        EnrollStart::Reviewing {
            has_candidate: self.candidate.is_some(),
        }
    }

    /// Discard the candidate and go back to the live preview.
    pub fn retake<S: FrameSource>(&mut self, ctx: &mut SessionContext<S>) {
        self.candidate = None;
        if ctx.state == UiState::EnrollmentReview {
            ctx.state = UiState::LivePreview;
        }
    }

    /// Commit the candidate under `username`.
    ///
    /// Name problems keep the candidate so the user can correct the name.
    pub fn commit<S: FrameSource>(
        &mut self,
        ctx: &mut SessionContext<S>,
        username: &str,
    ) -> Result<EnrollmentRecord, EnrollmentError> {
        let result = commit_candidate(&ctx.store, self.candidate.as_ref(), username);
        match &result {
            Ok(record) => {
                tracing::info!(user = %record.username, "enrollment committed");
                self.candidate = None;
                ctx.state = UiState::LivePreview;
            }
            Err(EnrollmentError::NoCaptureAvailable) => {
                if ctx.state == UiState::EnrollmentReview {
                    ctx.state = UiState::LivePreview;
                }
            }
            Err(err) => {
                tracing::info!(error = %err, "enrollment rejected");
            }
        }
        result
    }
}
