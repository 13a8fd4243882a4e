//! Login verification: capture a probe, hand it to the matcher off the
//! preview loop, and turn the matcher's answer into a [`VerificationOutcome`].

use crate::session::{SessionContext, UiState};
use facegate_core::matcher::identify_with_timeout;
use facegate_core::{
    Capture, CapturePurpose, DirectoryStore, EnrollmentStore, IdentityMatcher, MatchToken,
    VerificationOutcome,
};
use facegate_hw::FrameSource;
use image::ImageFormat;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tempfile::NamedTempFile;
use tokio::sync::mpsc;

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("probe encoding failed: {0}")]
    Image(#[from] image::ImageError),
}

/// Transient probe image. The file is removed when this value is dropped,
/// whichever way verification ends.
pub struct ProbeFile {
    file: NamedTempFile,
}

impl ProbeFile {
    pub fn write(capture: &Capture, dir: &Path) -> Result<Self, ProbeError> {
        let mut file = tempfile::Builder::new()
            .prefix(".probe-")
            .suffix(".jpg")
            .tempfile_in(dir)?;
        {
            let mut writer = BufWriter::new(file.as_file_mut());
            capture.image.write_to(&mut writer, ImageFormat::Jpeg)?;
            writer.flush()?;
        }
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Delete the file now, logging instead of failing.
    pub fn remove(self) {
        let path = self.file.path().to_path_buf();
        if let Err(err) = self.file.close() {
            tracing::warn!(path = %path.display(), error = %err, "failed to remove probe file");
        }
    }
}

/// Ask the matcher about `probe` and map the answer. The probe is removed
/// before returning.
pub async fn resolve<M: IdentityMatcher + ?Sized>(
    probe: ProbeFile,
    store: &DirectoryStore,
    matcher: &M,
    timeout: Duration,
) -> VerificationOutcome {
    let result = identify_with_timeout(matcher, store.dir(), probe.path(), timeout).await;
    probe.remove();

    let outcome = match result {
        Ok(MatchToken::Unknown) => VerificationOutcome::UnknownIdentity,
        Ok(MatchToken::NoFace) => VerificationOutcome::NoFaceFound,
        Ok(MatchToken::Candidate(name)) if store.exists(&name) => {
            VerificationOutcome::Identified(name)
        }
        Ok(MatchToken::Candidate(name)) => {
            tracing::warn!(user = %name, "matcher named a user with no reference image");
            VerificationOutcome::UnknownIdentity
        }
        Err(err) => {
            tracing::warn!(error = %err, "matcher failed; treating as unknown identity");
            VerificationOutcome::MatcherError(err.to_string())
        }
    };
    tracing::info!(?outcome, "verification finished");
    outcome
}

/// Write `capture` as a probe and resolve it in one go.
pub async fn verify_capture<M: IdentityMatcher + ?Sized>(
    capture: &Capture,
    store: &DirectoryStore,
    matcher: &M,
    probe_dir: &Path,
    timeout: Duration,
) -> VerificationOutcome {
    match ProbeFile::write(capture, probe_dir) {
        Ok(probe) => resolve(probe, store, matcher, timeout).await,
        Err(err) => {
            tracing::warn!(error = %err, dir = %probe_dir.display(), "could not write probe");
            VerificationOutcome::MatcherError(err.to_string())
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum LoginStart {
    /// Matcher running; the outcome arrives on the orchestrator's channel.
    Pending,
    /// Resolved without calling the matcher.
    Finished(VerificationOutcome),
    /// Login is only accepted from the live preview.
    Ignored(UiState),
}

/// Drives `LivePreview → ResolvingLogin → ShowingOutcome → LivePreview`.
pub struct VerificationOrchestrator<M: IdentityMatcher + 'static> {
    matcher: Arc<M>,
    timeout: Duration,
    outcomes: mpsc::Sender<VerificationOutcome>,
}

impl<M: IdentityMatcher + 'static> VerificationOrchestrator<M> {
    /// Returns the orchestrator and the receiver its outcomes are delivered on.
    pub fn new(matcher: M, timeout: Duration) -> (Self, mpsc::Receiver<VerificationOutcome>) {
        let (tx, rx) = mpsc::channel(4);
        (
            Self {
                matcher: Arc::new(matcher),
                timeout,
                outcomes: tx,
            },
            rx,
        )
    }

    /// Start a login attempt from the current frame.
    pub fn login<S: FrameSource>(&self, ctx: &mut SessionContext<S>) -> LoginStart {
        if ctx.state != UiState::LivePreview {
            tracing::debug!(state = ?ctx.state, "login ignored");
            return LoginStart::Ignored(ctx.state);
        }
        ctx.state = UiState::ResolvingLogin;

        let capture = match ctx.captures.capture(CapturePurpose::LoginProbe) {
            Ok(capture) => capture,
            Err(err) => {
                tracing::info!(error = %err, "login without a frame");
                return LoginStart::Finished(self.finish(ctx, VerificationOutcome::NoFaceFound));
            }
        };

        let probe = match ProbeFile::write(&capture, &ctx.config.probe_dir) {
            Ok(probe) => probe,
            Err(err) => {
                tracing::warn!(error = %err, "could not write probe");
                let outcome = VerificationOutcome::MatcherError(err.to_string());
                return LoginStart::Finished(self.finish(ctx, outcome));
            }
        };
        tracing::debug!(probe = %probe.path().display(), "probe written");

        let matcher = Arc::clone(&self.matcher);
        let store = ctx.store.clone();
        let tx = self.outcomes.clone();
        let timeout = self.timeout;
        tokio::spawn(async move {
            let outcome = resolve(probe, &store, matcher.as_ref(), timeout).await;
            if tx.send(outcome).await.is_err() {
                tracing::debug!("kiosk loop gone; verification outcome dropped");
            }
        });

        LoginStart::Pending
    }

    /// Record an outcome delivered by the matcher task.
    pub fn finish<S: FrameSource>(
        &self,
        ctx: &mut SessionContext<S>,
        outcome: VerificationOutcome,
    ) -> VerificationOutcome {
        ctx.state = UiState::ShowingOutcome;
        outcome
    }

    /// User dismissed the outcome.
    pub fn acknowledge<S: FrameSource>(&self, ctx: &mut SessionContext<S>) -> bool {
        if ctx.state == UiState::ShowingOutcome {
            ctx.state = UiState::LivePreview;
            true
        } else {
            false
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fakes::*;
    use super::*;
    use crate::preview::{tick, TracingSink};
    use crate::session::testing::test_context;
    use facegate_core::{DisabledDetector, MatcherError};
    use image::RgbImage;
    use tempfile::TempDir;

    fn face(seed: u8) -> Capture {
        Capture::new(
            CapturePurpose::LoginProbe,
            RgbImage::from_fn(16, 16, |x, y| image::Rgb([seed, (x * 8) as u8, (y * 8) as u8])),
        )
    }

    fn ready_store(tmp: &TempDir) -> DirectoryStore {
        DirectoryStore::open(tmp.path().join("db"))
    }

    fn probe_dir(tmp: &TempDir) -> std::path::PathBuf {
        let dir = tmp.path().join("probes");
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn probes_left(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    const T: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_identical_probe_is_identified() {
        let tmp = TempDir::new().unwrap();
        let store = ready_store(&tmp);
        let alice = face(1);
        store.put("alice", &alice.image).unwrap();
        store.put("bob", &face(2).image).unwrap();
        let dir = probe_dir(&tmp);

        let outcome = verify_capture(&alice, &store, &ByteMatcher, &dir, T).await;
        assert_eq!(outcome, VerificationOutcome::Identified("alice".into()));
        assert_eq!(probes_left(&dir), 0);
    }

    #[tokio::test]
    async fn test_unenrolled_probe_is_unknown() {
        let tmp = TempDir::new().unwrap();
        let store = ready_store(&tmp);
        store.put("alice", &face(1).image).unwrap();
        let dir = probe_dir(&tmp);

        let outcome = verify_capture(&face(77), &store, &ByteMatcher, &dir, T).await;
        assert_eq!(outcome, VerificationOutcome::UnknownIdentity);
        assert_eq!(probes_left(&dir), 0);
    }

    #[tokio::test]
    async fn test_candidate_without_reference_is_downgraded() {
        let tmp = TempDir::new().unwrap();
        let store = ready_store(&tmp);
        let dir = probe_dir(&tmp);
        let matcher = ScriptedMatcher::new(|| Ok(MatchToken::Candidate("ghost".into())));

        let outcome = verify_capture(&face(1), &store, &matcher, &dir, T).await;
        assert_eq!(outcome, VerificationOutcome::UnknownIdentity);
    }

    #[tokio::test]
    async fn test_path_like_candidate_never_identified() {
        let tmp = TempDir::new().unwrap();
        let store = ready_store(&tmp);
        let dir = probe_dir(&tmp);
        let matcher = ScriptedMatcher::new(|| Ok(MatchToken::Candidate("../db/x".into())));

        let outcome = verify_capture(&face(1), &store, &matcher, &dir, T).await;
        assert_eq!(outcome, VerificationOutcome::UnknownIdentity);
    }

    #[tokio::test]
    async fn test_probe_removed_on_every_branch() {
        let replies: [fn() -> Result<MatchToken, MatcherError>; 4] = [
            || Ok(MatchToken::Unknown),
            || Ok(MatchToken::NoFace),
            || Ok(MatchToken::Candidate("nobody".into())),
            || {
                Err(MatcherError::Failed {
                    status: "exit status: 1".into(),
                    stderr: "crash".into(),
                })
            },
        ];
        let tmp = TempDir::new().unwrap();
        let store = ready_store(&tmp);
        let dir = probe_dir(&tmp);

        for reply in replies {
            let matcher = ScriptedMatcher::new(reply);
            verify_capture(&face(3), &store, &matcher, &dir, T).await;
            let seen = matcher.seen().unwrap();
            assert!(!seen.exists(), "probe {} left behind", seen.display());
        }
        assert_eq!(probes_left(&dir), 0);
    }

    #[tokio::test]
    async fn test_matcher_timeout_is_matcher_error_and_cleans_up() {
        let tmp = TempDir::new().unwrap();
        let store = ready_store(&tmp);
        let dir = probe_dir(&tmp);
        let mut matcher = ScriptedMatcher::new(|| Ok(MatchToken::Unknown));
        matcher.delay = Duration::from_secs(30);

        let outcome = verify_capture(&face(4), &store, &matcher, &dir, Duration::from_millis(50)).await;
        assert!(matches!(outcome, VerificationOutcome::MatcherError(ref d) if d.contains("timed out")));
        assert!(!outcome.grants_access());
        assert_eq!(probes_left(&dir), 0);
    }

    #[tokio::test]
    async fn test_no_face_sentinel() {
        let tmp = TempDir::new().unwrap();
        let store = ready_store(&tmp);
        let dir = probe_dir(&tmp);
        let matcher = ScriptedMatcher::new(|| Ok(MatchToken::NoFace));
        let outcome = verify_capture(&face(5), &store, &matcher, &dir, T).await;
        assert_eq!(outcome, VerificationOutcome::NoFaceFound);
    }

    #[tokio::test]
    async fn test_unwritable_probe_dir_is_matcher_error() {
        let tmp = TempDir::new().unwrap();
        let store = ready_store(&tmp);
        let outcome = verify_capture(
            &face(6),
            &store,
            &ByteMatcher,
            &tmp.path().join("missing"),
            T,
        )
        .await;
        assert!(matches!(outcome, VerificationOutcome::MatcherError(_)));
    }

    #[tokio::test]
    async fn test_login_before_first_frame_shows_no_face() {
        let tmp = TempDir::new().unwrap();
        let (mut ctx, _) = test_context(&tmp, Box::new(DisabledDetector));
        let (verifier, _rx) = VerificationOrchestrator::new(ByteMatcher, T);

        let start = verifier.login(&mut ctx);
        assert_eq!(start, LoginStart::Finished(VerificationOutcome::NoFaceFound));
        assert_eq!(ctx.state, UiState::ShowingOutcome);
        assert!(verifier.acknowledge(&mut ctx));
        assert_eq!(ctx.state, UiState::LivePreview);
    }

    #[tokio::test]
    async fn test_login_round_trip_through_channel() {
        let tmp = TempDir::new().unwrap();
        let (mut ctx, _) = test_context(&tmp, Box::new(DisabledDetector));
        tick(&mut ctx, &mut TracingSink);

        // Enroll exactly what the camera currently shows.
        let current = ctx.captures.capture(CapturePurpose::Enrollment).unwrap();
        ctx.store.put("alice", &current.image).unwrap();

        let (verifier, mut rx) = VerificationOrchestrator::new(ByteMatcher, T);
        assert_eq!(verifier.login(&mut ctx), LoginStart::Pending);
        assert_eq!(ctx.state, UiState::ResolvingLogin);

        // A second trigger while resolving is ignored.
        assert_eq!(
            verifier.login(&mut ctx),
            LoginStart::Ignored(UiState::ResolvingLogin)
        );

        // The preview keeps ticking while the matcher runs.
        tick(&mut ctx, &mut TracingSink);

        let outcome = rx.recv().await.unwrap();
        let shown = verifier.finish(&mut ctx, outcome);
        assert_eq!(shown, VerificationOutcome::Identified("alice".into()));
        assert_eq!(ctx.state, UiState::ShowingOutcome);
        assert_eq!(probes_left(&ctx.config.probe_dir), 0);
    }

    #[tokio::test]
    async fn test_acknowledge_outside_outcome_is_noop() {
        let tmp = TempDir::new().unwrap();
        let (mut ctx, _) = test_context(&tmp, Box::new(DisabledDetector));
        let (verifier, _rx) = VerificationOrchestrator::new(ByteMatcher, T);
        assert!(!verifier.acknowledge(&mut ctx));
        assert_eq!(ctx.state, UiState::LivePreview);
    }
}
