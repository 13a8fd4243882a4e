//! Identity matcher contract and the external-process matcher.
//!
//! The matcher is invoked as `<program> [args..] <store_dir> <probe_path>`.
//! Exit status zero with one line on stdout is success; the second field of
//! that line is the identity token. Fields are comma-separated when the line
//! contains a comma (`<probe>,<name>[,<distance>]`), whitespace-separated
//! otherwise.

use crate::store::IMAGE_EXTENSIONS;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

const UNKNOWN_TOKEN: &str = "unknown_person";
const NO_FACE_TOKENS: [&str; 2] = ["no_person_found", "no_persons_found"];

#[derive(Error, Debug)]
pub enum MatcherError {
    #[error("failed to start matcher: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("matcher exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
    #[error("matcher timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed matcher output: {0:?}")]
    Malformed(String),
}

/// What the matcher reported for one probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchToken {
    Unknown,
    NoFace,
    Candidate(String),
}

/// Compares a probe image against the enrollment directory.
#[async_trait]
pub trait IdentityMatcher: Send + Sync {
    async fn identify(&self, store_dir: &Path, probe: &Path) -> Result<MatchToken, MatcherError>;
}

/// Runs an external program such as `face_recognition`.
///
/// The child is killed if the returned future is dropped, so a caller-side
/// timeout also ends the process.
#[derive(Debug, Clone)]
pub struct CommandMatcher {
    program: OsString,
    args: Vec<OsString>,
}

impl CommandMatcher {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Arguments placed before the store directory and probe path.
    pub fn with_args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<OsString>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn program(&self) -> &OsString {
        &self.program
    }
}

#[async_trait]
impl IdentityMatcher for CommandMatcher {
    async fn identify(&self, store_dir: &Path, probe: &Path) -> Result<MatchToken, MatcherError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(store_dir)
            .arg(probe)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(MatcherError::Spawn)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(MatcherError::Failed {
                status: output.status.to_string(),
                stderr,
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        tracing::debug!(output = %stdout.trim(), "matcher output");
        parse_matcher_output(&stdout)
    }
}

/// Parse matcher stdout into a [`MatchToken`].
///
/// Only the first non-empty line counts; later candidates are ignored.
pub fn parse_matcher_output(stdout: &str) -> Result<MatchToken, MatcherError> {
    let line = stdout
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| MatcherError::Malformed(stdout.to_string()))?;

    let token = if line.contains(',') {
        line.split(',').nth(1).map(str::trim)
    } else {
        line.split_whitespace().nth(1)
    };
    let token = match token {
        Some(t) if !t.is_empty() => t,
        _ => return Err(MatcherError::Malformed(line.to_string())),
    };

    if token == UNKNOWN_TOKEN {
        return Ok(MatchToken::Unknown);
    }
    if NO_FACE_TOKENS.contains(&token) {
        return Ok(MatchToken::NoFace);
    }

    let name = strip_image_extension(token);
    if name.is_empty() {
        return Err(MatcherError::Malformed(line.to_string()));
    }
    Ok(MatchToken::Candidate(name.to_string()))
}

fn strip_image_extension(token: &str) -> &str {
    match token.rsplit_once('.') {
        Some((stem, ext)) if IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) => stem,
        _ => token,
    }
}

/// Run `matcher` with a deadline. Dropping the inner future on timeout kills
/// an external process.
pub async fn identify_with_timeout<M: IdentityMatcher + ?Sized>(
    matcher: &M,
    store_dir: &Path,
    probe: &Path,
    timeout: Duration,
) -> Result<MatchToken, MatcherError> {
    tokio::time::timeout(timeout, matcher.identify(store_dir, probe))
        .await
        .map_err(|_| MatcherError::Timeout(timeout))?
}
