use std::path::PathBuf;
use std::time::Duration;

/// Kiosk configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Enrollment directory holding one reference image per user.
    pub store_dir: PathBuf,
    /// Directory containing the detection model.
    pub model_dir: PathBuf,
    /// Matcher program, invoked as `<matcher> <store_dir> <probe>`.
    pub matcher_program: String,
    /// Deadline for one matcher invocation.
    pub matcher_timeout: Duration,
    /// Preview cadence.
    pub frame_interval: Duration,
    /// Frames discarded after the camera opens (auto-exposure settling).
    pub warmup_frames: usize,
    /// Where transient probe images are written.
    pub probe_dir: PathBuf,
    /// If set, each overlaid preview frame is written here as JPEG.
    pub preview_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from `FACEGATE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("facegate");

        Self {
            camera_device: std::env::var("FACEGATE_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            store_dir: env_path("FACEGATE_STORE_DIR").unwrap_or_else(|| data_dir.join("db")),
            model_dir: env_path("FACEGATE_MODEL_DIR").unwrap_or_else(|| data_dir.join("models")),
            matcher_program: std::env::var("FACEGATE_MATCHER")
                .unwrap_or_else(|_| "face_recognition".to_string()),
            matcher_timeout: Duration::from_secs(env_u64("FACEGATE_MATCHER_TIMEOUT_SECS", 10).max(1)),
            frame_interval: Duration::from_millis(env_u64("FACEGATE_FRAME_INTERVAL_MS", 50).max(1)),
            warmup_frames: env_usize("FACEGATE_WARMUP_FRAMES", 4),
            probe_dir: env_path("FACEGATE_PROBE_DIR").unwrap_or_else(std::env::temp_dir),
            preview_path: env_path("FACEGATE_PREVIEW_PATH"),
        }
    }

    /// Path to the SCRFD detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_dir
            .join(facegate_core::detector::SCRFD_MODEL_FILE)
            .to_string_lossy()
            .into_owned()
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
