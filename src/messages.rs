//! Command types for the controller's message loop.
//!
//! Callers (the console menu, the non-interactive runner, tests) never touch the
//! engine directly. They send a [`Command`] over an mpsc channel; the controller task
//! processes commands one at a time and answers through the oneshot channel embedded
//! in each variant.
//!
//! # Message Flow
//!
//! ```text
//! Caller                             Controller Task
//! ------                             ---------------
//! 1. Create command with oneshot
//! 2. Send via mpsc channel    ------>
//!                                    3. Receive command
//!                                    4. Dispatch to the engine
//!                                    5. Send response
//! 6. Await oneshot receiver   <------
//! ```
//!
//! # Helper Methods
//!
//! Each variant has a helper that creates the command and returns the receiver:
//!
//! ```rust
//! use xyz_tank::messages::Command;
//!
//! let (cmd, rx) = Command::stop();
//! // cmd_tx.send(cmd).await?;
//! // rx.await??;
//! ```

use serde::Serialize;
use std::path::PathBuf;
use tokio::sync::oneshot;

use crate::engine::EngineStatus;
use crate::error::AppResult;
use crate::geometry::{Probe, Vec3};
use crate::plan::MeasurementPlan;

/// Reply channel carried by every command.
pub type Responder<T> = oneshot::Sender<AppResult<T>>;

/// Commands accepted by the [`Controller`](crate::controller::Controller).
#[derive(Debug)]
pub enum Command {
    /// Load a settings file, configure its plan and start measuring.
    Start {
        /// Path of the TOML settings file
        settings: PathBuf,
        /// Configure + start result
        response: Responder<()>,
    },

    /// Configure an in-memory plan and start measuring.
    StartPlan {
        /// Plan to run
        plan: Box<MeasurementPlan>,
        /// Probe the safety check runs against
        probe: Probe,
        /// Configure + start result
        response: Responder<()>,
    },

    /// Stop the running measurement after its current step. No-op when idle.
    Stop {
        /// Acknowledgement
        response: Responder<()>,
    },

    /// Continue a stopped measurement.
    Resume {
        /// Resume result
        response: Responder<()>,
    },

    /// Save the latest data. Relative paths land in the configured output directory.
    Save {
        /// Destination file
        path: PathBuf,
        /// Resolved path the result was written to
        response: Responder<PathBuf>,
    },

    /// Report engine state and progress.
    Status {
        /// Current report
        response: Responder<StatusReport>,
    },

    /// Shut the engine down and end the command loop.
    Exit {
        /// Acknowledgement, sent once the engine is down
        response: Responder<()>,
    },
}

impl Command {
    /// Short name for log lines.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Start { .. } => "start",
            Command::StartPlan { .. } => "start_plan",
            Command::Stop { .. } => "stop",
            Command::Resume { .. } => "resume",
            Command::Save { .. } => "save",
            Command::Status { .. } => "status",
            Command::Exit { .. } => "exit",
        }
    }

    /// Helper to create a Start command
    pub fn start(settings: impl Into<PathBuf>) -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::Start {
                settings: settings.into(),
                response: tx,
            },
            rx,
        )
    }

    /// Helper to create a StartPlan command
    pub fn start_plan(
        plan: MeasurementPlan,
        probe: Probe,
    ) -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::StartPlan {
                plan: Box::new(plan),
                probe,
                response: tx,
            },
            rx,
        )
    }

    /// Helper to create a Stop command
    pub fn stop() -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::Stop { response: tx }, rx)
    }

    /// Helper to create a Resume command
    pub fn resume() -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::Resume { response: tx }, rx)
    }

    /// Helper to create a Save command
    pub fn save(path: impl Into<PathBuf>) -> (Self, oneshot::Receiver<AppResult<PathBuf>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::Save {
                path: path.into(),
                response: tx,
            },
            rx,
        )
    }

    /// Helper to create a Status command
    pub fn status() -> (Self, oneshot::Receiver<AppResult<StatusReport>>) {
        let (tx, rx) = oneshot::channel();
        (Self::Status { response: tx }, rx)
    }

    /// Helper to create an Exit command
    pub fn exit() -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::Exit { response: tx }, rx)
    }
}

/// Answer to [`Command::Status`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    /// Engine status
    pub status: EngineStatus,
    /// Name of the configured plan
    pub plan: Option<String>,
    /// Percent complete of the current run
    pub percent: Option<u8>,
    /// Last completed route step
    pub last_index: Option<usize>,
    /// Number of route steps
    pub total_steps: Option<usize>,
    /// Tracked motor positions, local frame
    pub positions: Vec3,
}

impl std::fmt::Display for StatusReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "state: {}", self.status.state)?;
        if let Some(plan) = &self.plan {
            write!(f, ", plan: {plan}")?;
        }
        if let (Some(percent), Some(total)) = (self.percent, self.total_steps) {
            let done = self.last_index.map_or(0, |i| i + 1);
            write!(f, ", progress: {percent}% ({done}/{total})")?;
        }
        let [x, y, z] = self.positions;
        write!(f, ", motors: ({x:.4}, {y:.4}, {z:.4}) m")?;
        if let Some(err) = &self.status.last_error {
            write!(f, ", last error: {err}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::XyzSystemState;
    use crate::error::TankError;

    #[test]
    fn helpers_pair_command_with_receiver() {
        let (cmd, mut rx) = Command::save("scan.json");
        assert_eq!(cmd.name(), "save");
        match cmd {
            Command::Save { path, response } => {
                assert_eq!(path, PathBuf::from("scan.json"));
                response.send(Err(TankError::NoProgress)).unwrap();
            }
            other => panic!("unexpected command {}", other.name()),
        }
        assert!(matches!(rx.try_recv(), Ok(Err(TankError::NoProgress))));
    }

    #[test]
    fn status_report_display() {
        let report = StatusReport {
            status: EngineStatus {
                state: XyzSystemState::Stopped,
                run_id: None,
                last_error: None,
            },
            plan: Some("short".to_string()),
            percent: Some(50),
            last_index: Some(1),
            total_steps: Some(4),
            positions: [0.1, 0.0, 0.25],
        };
        let text = report.to_string();
        assert!(text.starts_with("state: stopped"));
        assert!(text.contains("progress: 50% (2/4)"));
        assert!(text.contains("(0.1000, 0.0000, 0.2500)"));
    }
}
