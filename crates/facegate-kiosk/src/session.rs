//! Session context: the device handle, store, detector and last frame for one
//! kiosk process, passed explicitly to each orchestrator.

use crate::capture::CaptureManager;
use crate::config::Config;
use facegate_core::{DirectoryStore, DisabledDetector, FaceDetector, ScrfdDetector};
use facegate_hw::{Camera, CameraError, DeviceSlot, Frame, FrameSource};
use std::path::Path;

/// Interaction state of the kiosk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiState {
    LivePreview,
    EnrollmentCapture,
    EnrollmentReview,
    ResolvingLogin,
    ShowingOutcome,
}

/// Opens the frame source. Called at most once per successful open.
pub type Opener<S> = Box<dyn FnMut() -> Result<S, CameraError>>;

pub struct SessionContext<S: FrameSource> {
    pub config: Config,
    camera: DeviceSlot<S>,
    opener: Opener<S>,
    pub detector: Box<dyn FaceDetector>,
    pub captures: CaptureManager,
    pub store: DirectoryStore,
    pub state: UiState,
}

impl SessionContext<Camera> {
    /// Build the production context: V4L2 camera, SCRFD detector (if the
    /// model is installed) and the enrollment directory.
    pub fn from_config(config: Config) -> Self {
        let device = config.camera_device.clone();
        let warmup = config.warmup_frames;
        let opener: Opener<Camera> = Box::new(move || {
            let mut camera = Camera::open(&device)?;
            if warmup > 0 {
                tracing::info!(count = warmup, "discarding warmup frames");
                camera.discard_frames(warmup);
            }
            Ok(camera)
        });

        let detector = load_detector(&config.detector_model_path());
        let store = DirectoryStore::open(&config.store_dir);
        Self::new(config, opener, detector, store)
    }
}

impl<S: FrameSource> SessionContext<S> {
    pub fn new(
        config: Config,
        opener: Opener<S>,
        detector: Box<dyn FaceDetector>,
        store: DirectoryStore,
    ) -> Self {
        Self {
            config,
            camera: DeviceSlot::new(),
            opener,
            detector,
            captures: CaptureManager::new(),
            store,
            state: UiState::LivePreview,
        }
    }

    /// Read the next frame, opening the device on first use.
    pub fn read_frame(&mut self) -> Result<Frame, CameraError> {
        let opener = &mut self.opener;
        self.camera.acquire_with(|| opener())?.read()
    }

    pub fn camera_open(&self) -> bool {
        self.camera.is_open()
    }

    pub fn camera_opens(&self) -> usize {
        self.camera.opens()
    }
}

fn load_detector(model_path: &str) -> Box<dyn FaceDetector> {
    if !Path::new(model_path).exists() {
        tracing::warn!(path = model_path, "detection model not installed; live overlay disabled");
        return Box::new(DisabledDetector);
    }
    match ScrfdDetector::load(model_path) {
        Ok(detector) => {
            tracing::info!(path = model_path, "SCRFD detector loaded");
            Box::new(detector)
        }
        Err(err) => {
            tracing::warn!(path = model_path, error = %err, "failed to load detector; live overlay disabled");
            Box::new(DisabledDetector)
        }
    }
}
