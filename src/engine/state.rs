//! Acquisition state machine.
//!
//! Transitions are functions on [`XyzSystemState`] that return either the next state or
//! an error, so illegal transitions are rejected at the engine boundary.
//!
//! # State Machine
//!
//! ```text
//! AtOrigin ──start──> Running ──last step──> Finished
//!                      │   ▲  ▲                 │
//!          stop / fault│   │  └──start (fresh)──┘
//!                      ▼   │resume / start
//!                     Stopped
//! ```

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppResult, TankError};

/// Lifecycle state of the measurement system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum XyzSystemState {
    /// Homed, no measurement run yet
    AtOrigin,
    /// A run was interrupted by a stop request or a fault; can be resumed
    Stopped,
    /// The acquisition task is walking the route
    Running,
    /// The last route step was acquired
    Finished,
}

impl std::fmt::Display for XyzSystemState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            XyzSystemState::AtOrigin => write!(f, "at origin"),
            XyzSystemState::Stopped => write!(f, "stopped"),
            XyzSystemState::Running => write!(f, "running"),
            XyzSystemState::Finished => write!(f, "finished"),
        }
    }
}

impl XyzSystemState {
    /// `start()` / `resume()`: any idle state may begin a run.
    pub fn begin_run(self) -> AppResult<Self> {
        match self {
            XyzSystemState::Running => Err(TankError::AlreadyRunning),
            _ => Ok(XyzSystemState::Running),
        }
    }

    /// `stop()`: only a running system stops. `None` means there is nothing to stop.
    pub fn request_stop(self) -> Option<Self> {
        match self {
            XyzSystemState::Running => Some(XyzSystemState::Stopped),
            _ => None,
        }
    }

    /// `configure()` is refused while a run is in progress.
    pub fn ensure_idle(self, action: &str) -> AppResult<()> {
        match self {
            XyzSystemState::Running => Err(TankError::Busy(format!(
                "cannot {action} while a measurement is running"
            ))),
            _ => Ok(()),
        }
    }

    /// Whether the acquisition task is active.
    pub fn is_running(self) -> bool {
        self == XyzSystemState::Running
    }
}

/// Engine status published to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStatus {
    /// Current lifecycle state
    pub state: XyzSystemState,
    /// Identifier of the current (or last) run; kept across resumes
    pub run_id: Option<Uuid>,
    /// Last fault that ended a run, cleared when a new run starts
    pub last_error: Option<String>,
}

impl Default for EngineStatus {
    fn default() -> Self {
        Self {
            state: XyzSystemState::AtOrigin,
            run_id: None,
            last_error: None,
        }
    }
}
