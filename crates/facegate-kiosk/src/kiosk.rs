//! Kiosk event loop: preview ticks, operator commands and verification
//! outcomes multiplexed on one task.

use crate::enroll::{EnrollStart, EnrollmentOrchestrator};
use crate::preview::{self, PreviewSink, TickOutcome};
use crate::session::{SessionContext, UiState};
use crate::verify::{LoginStart, VerificationOrchestrator};
use facegate_core::{EnrollmentStore, IdentityMatcher, VerificationOutcome};
use facegate_hw::FrameSource;
use std::future::Future;
use std::io::BufRead;
use std::str::FromStr;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

const HELP: &str = "\
commands:
  login          verify the face in front of the camera
  enroll         capture the current frame for registration
  commit <name>  register the captured frame under <name>
  retake         discard the captured frame
  ack            dismiss the last login result
  list           show enrolled users
  status         print kiosk status as JSON
  quit           exit";

/// One line of operator input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KioskCommand {
    Login,
    Enroll,
    Commit(String),
    Retake,
    Ack,
    List,
    Status,
    Help,
    Quit,
}

#[derive(Error, Debug)]
#[error("unknown command {0:?}, type `help` for a list")]
pub struct UnknownCommand(String);

impl FromStr for KioskCommand {
    type Err = UnknownCommand;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        match word.to_ascii_lowercase().as_str() {
            "login" | "l" => Ok(Self::Login),
            "enroll" | "register" | "e" => Ok(Self::Enroll),
            // The name is validated on commit; an empty one is reported there.
            "commit" | "c" => Ok(Self::Commit(rest.trim().to_string())),
            "retake" | "r" => Ok(Self::Retake),
            "ack" | "ok" => Ok(Self::Ack),
            "list" => Ok(Self::List),
            "status" => Ok(Self::Status),
            "help" | "?" => Ok(Self::Help),
            "quit" | "exit" | "q" => Ok(Self::Quit),
            _ => Err(UnknownCommand(line.to_string())),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Reply {
    Say(String),
    Silent,
    Quit,
}

pub struct Kiosk<S: FrameSource, M: IdentityMatcher + 'static> {
    ctx: SessionContext<S>,
    verifier: VerificationOrchestrator<M>,
    enrollment: EnrollmentOrchestrator,
    outcomes: mpsc::Receiver<VerificationOutcome>,
    sink: Box<dyn PreviewSink>,
}

impl<S: FrameSource, M: IdentityMatcher + 'static> Kiosk<S, M> {
    pub fn new(ctx: SessionContext<S>, matcher: M, sink: Box<dyn PreviewSink>) -> Self {
        let (verifier, outcomes) = VerificationOrchestrator::new(matcher, ctx.config.matcher_timeout);
        Self {
            ctx,
            verifier,
            enrollment: EnrollmentOrchestrator::new(),
            outcomes,
            sink,
        }
    }

    pub fn state(&self) -> UiState {
        self.ctx.state
    }

    pub fn tick(&mut self) -> TickOutcome {
        preview::tick(&mut self.ctx, self.sink.as_mut())
    }

    /// Show a matcher outcome delivered from the verification task.
    pub fn deliver(&mut self, outcome: VerificationOutcome) -> String {
        let outcome = self.verifier.finish(&mut self.ctx, outcome);
        outcome.message()
    }

    pub fn handle(&mut self, command: KioskCommand) -> Reply {
        tracing::debug!(?command, state = ?self.ctx.state, "command");
        match command {
            KioskCommand::Login => match self.verifier.login(&mut self.ctx) {
                LoginStart::Pending => Reply::Say("Verifying...".into()),
                LoginStart::Finished(outcome) => Reply::Say(outcome.message()),
                LoginStart::Ignored(state) => busy(state),
            },
            KioskCommand::Enroll => match self.enrollment.begin(&mut self.ctx) {
                EnrollStart::Reviewing { has_candidate: true } => Reply::Say(
                    "Captured. Type `commit <name>` to register or `retake` to try again.".into(),
                ),
                EnrollStart::Reviewing { has_candidate: false } => Reply::Say(
                    "Capture is empty. Type `retake` and try again once the camera is live.".into(),
                ),
                EnrollStart::Ignored(state) => busy(state),
            },
            KioskCommand::Commit(name) => {
                if self.ctx.state != UiState::EnrollmentReview {
                    return Reply::Say("Nothing to commit. Type `enroll` first.".into());
                }
                match self.enrollment.commit(&mut self.ctx, &name) {
                    Ok(record) => Reply::Say(format!("Registered {}.", record.username)),
                    Err(err) => Reply::Say(capitalize(&err.to_string())),
                }
            }
            KioskCommand::Retake => {
                if self.ctx.state != UiState::EnrollmentReview {
                    return Reply::Silent;
                }
                self.enrollment.retake(&mut self.ctx);
                Reply::Say("Capture discarded.".into())
            }
            KioskCommand::Ack => {
                if self.verifier.acknowledge(&mut self.ctx) {
                    Reply::Silent
                } else {
                    Reply::Say("Nothing to dismiss.".into())
                }
            }
            KioskCommand::List => {
                let names: Vec<String> = self
                    .ctx
                    .store
                    .list()
                    .into_iter()
                    .map(|r| r.username)
                    .collect();
                if names.is_empty() {
                    Reply::Say("No users enrolled.".into())
                } else {
                    Reply::Say(format!("Enrolled: {}", names.join(", ")))
                }
            }
            KioskCommand::Status => Reply::Say(self.status().to_string()),
            KioskCommand::Help => Reply::Say(HELP.into()),
            KioskCommand::Quit => Reply::Quit,
        }
    }

    pub fn status(&self) -> serde_json::Value {
        serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "state": format!("{:?}", self.state()),
            "camera": {
                "device": self.ctx.config.camera_device,
                "open": self.ctx.camera_open(),
                "opens": self.ctx.camera_opens(),
            },
            "last_frame": self.ctx.captures.latest().map(|f| f.sequence),
            "store": {
                "dir": self.ctx.store.dir().display().to_string(),
                "available": self.ctx.store.is_available(),
                "enrolled": self.ctx.store.len(),
            },
            "enrollment_candidate": self.enrollment.candidate().is_some(),
        })
    }

    /// Run until `quit` or Ctrl-C. The preview keeps running after `input`
    /// closes.
    pub async fn run<W>(&mut self, input: mpsc::Receiver<String>, output: W) -> anyhow::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let interrupted = async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %err, "cannot listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        };
        self.run_until(input, output, interrupted).await
    }

    /// Event loop; returns on `quit` or when `shutdown` completes, whether or
    /// not `input` is still open.
    pub async fn run_until<W, F>(
        &mut self,
        mut input: mpsc::Receiver<String>,
        mut output: W,
        shutdown: F,
    ) -> anyhow::Result<()>
    where
        W: AsyncWrite + Unpin,
        F: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval(self.ctx.config.frame_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut input_open = true;
        tokio::pin!(shutdown);

        tracing::info!(interval = ?self.ctx.config.frame_interval, "kiosk ready");
        say(&mut output, "Face kiosk ready. Type `help` for commands.").await?;

        loop {
            tokio::select! {
                biased;

                _ = interval.tick() => {
                    self.tick();
                }
                Some(outcome) = self.outcomes.recv() => {
                    let message = self.deliver(outcome);
                    say(&mut output, &message).await?;
                }
                line = input.recv(), if input_open => match line {
                    Some(line) if line.trim().is_empty() => {}
                    Some(line) => {
                        let reply = match line.parse::<KioskCommand>() {
                            Ok(command) => self.handle(command),
                            Err(err) => Reply::Say(err.to_string()),
                        };
                        match reply {
                            Reply::Say(message) => say(&mut output, &message).await?,
                            Reply::Silent => {}
                            Reply::Quit => break,
                        }
                    }
                    None => {
                        tracing::info!("input closed; preview continues until interrupted");
                        input_open = false;
                    }
                },
                _ = &mut shutdown => {
                    tracing::info!("interrupted");
                    break;
                }
            }
        }

        tracing::info!("kiosk shutting down");
        Ok(())
    }
}

/// Feed stdin lines into a channel from a plain OS thread.
///
/// A read blocked in this thread never holds up runtime shutdown; the thread
/// simply dies with the process.
pub fn stdin_lines() -> std::io::Result<mpsc::Receiver<String>> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::Builder::new()
        .name("stdin".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.blocking_send(line).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "failed to read input; ignoring further commands");
                        break;
                    }
                }
            }
        })?;
    Ok(rx)
}

fn busy(state: UiState) -> Reply {
    Reply::Say(format!("Busy ({state:?}), try again in a moment."))
}

fn capitalize(message: &str) -> String {
    let mut chars = message.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

async fn say<W: AsyncWrite + Unpin>(output: &mut W, message: &str) -> std::io::Result<()> {
    output.write_all(message.as_bytes()).await?;
    output.write_all(b"\n").await?;
    output.flush().await
}
