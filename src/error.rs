//! Custom error types for the application.
//!
//! This module defines the primary error type, `TankError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the different failures a scan session can run into, from an invalid measurement plan
//! to a motor asked to leave its travel range.
//!
//! ## Error Hierarchy
//!
//! `TankError` consolidates the following groups (see [`ErrorKind`]):
//!
//! - **Configuration**: invalid plan bounds, safety-margin violations, unreadable
//!   configuration files. Raised by `configure()` before any motion is scheduled.
//! - **Busy**: the engine is already running a measurement.
//! - **Range**: a motor was asked to travel outside `[0, max_travel]`. Fatal to the run.
//! - **Collaborator**: the motor transport or the capture device failed. Fatal to the run,
//!   the core never retries a physical action on its own.
//! - **Save**: nothing to save yet, or the persistence layer failed. Never fatal.
//! - **Internal**: channel or task failures inside the crate itself.
//!
//! By using `#[from]`, `TankError` can be created from the underlying I/O, serde and
//! figment errors, so the `?` operator works throughout.

use crate::geometry::{Axis, Wall};
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, TankError>;

/// Coarse classification of a [`TankError`], matching how the engine reacts to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected before anything moved; no state change.
    Configuration,
    /// Rejected because a measurement is in progress; no state change.
    Busy,
    /// Motor travel violation.
    Range,
    /// Transport or capture failure reported by a collaborator.
    Collaborator,
    /// Saving the result failed; engine state is untouched.
    Save,
    /// Failure inside the crate plumbing.
    Internal,
}

#[derive(Error, Debug)]
pub enum TankError {
    #[error("Min position can't be bigger than max position on axis {axis}")]
    InvertedBounds { axis: Axis },

    #[error("Grid is too big for the tank: probe would come too close to the {wall} wall on axis {axis}")]
    TooCloseToTankWall { axis: Axis, wall: Wall },

    #[error("Invalid measurement plan: {0}")]
    InvalidPlan(String),

    #[error("No measurement plan configured")]
    NotConfigured,

    #[error("The system is already running a measurement")]
    AlreadyRunning,

    #[error("The system is busy: {0}")]
    Busy(String),

    #[error("Motor {axis}: requested position {requested:.6} m is outside [0, {max_travel:.6}] m")]
    OutOfRange {
        axis: Axis,
        requested: f64,
        max_travel: f64,
    },

    #[error("Motor transport error on axis {axis}: {message}")]
    Transport { axis: Axis, message: String },

    #[error("Capture error: {0}")]
    Capture(String),

    #[error("So far no measurement has been performed, run some measurement plan first")]
    NoProgress,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Controller channel closed")]
    ChannelClosed,

    #[error("Acquisition task failed: {0}")]
    TaskFailed(String),
}

impl TankError {
    /// Classify the error the way the engine and controller react to it.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TankError::InvertedBounds { .. }
            | TankError::TooCloseToTankWall { .. }
            | TankError::InvalidPlan(_)
            | TankError::NotConfigured
            | TankError::Config(_)
            | TankError::Configuration(_) => ErrorKind::Configuration,
            TankError::AlreadyRunning | TankError::Busy(_) => ErrorKind::Busy,
            TankError::OutOfRange { .. } => ErrorKind::Range,
            TankError::Transport { .. } | TankError::Capture(_) => ErrorKind::Collaborator,
            TankError::NoProgress | TankError::Io(_) | TankError::Serialization(_) => {
                ErrorKind::Save
            }
            TankError::ChannelClosed | TankError::TaskFailed(_) => ErrorKind::Internal,
        }
    }

    /// Whether this error ends the current acquisition run.
    pub fn is_fatal_to_run(&self) -> bool {
        matches!(self.kind(), ErrorKind::Range | ErrorKind::Collaborator)
    }

    pub(crate) fn transport(axis: Axis, err: anyhow::Error) -> Self {
        TankError::Transport {
            axis,
            message: format!("{err:#}"),
        }
    }

    pub(crate) fn capture(err: anyhow::Error) -> Self {
        TankError::Capture(format!("{err:#}"))
    }
}
