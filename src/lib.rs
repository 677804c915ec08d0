//! # XYZ Tank Scan Library
//!
//! Orchestration core for a three-axis motorized stage that carries a hydrophone through
//! a grid of points inside a water tank and takes one reading at each point. The
//! instrument and motor drivers are collaborators behind small async traits; this crate
//! owns planning, safety, execution and persistence of a scan.
//!
//! ## Crate Structure
//!
//! - **`geometry`**: tank and probe bodies in the global frame, and the safety check that
//!   keeps the probe away from the tank walls.
//! - **`plan`**: the declarative `MeasurementPlan` and its materialized grid.
//! - **`route`**: the serpentine `ScanRoutePlanner` turning a grid into a motor-efficient
//!   traversal with per-step motion codes.
//! - **`hardware`**: capability traits for the motor transport and the capture device,
//!   bounded motors, the three-axis stage, and simulated collaborators.
//! - **`engine`**: the `AcquisitionEngine` state machine with its cancellable, resumable
//!   background task and published progress snapshots.
//! - **`controller`** / **`messages`**: the single-consumer command loop that serializes
//!   start, stop, resume, save and exit requests.
//! - **`storage`**: the persistence collaborator and its JSON implementation.
//! - **`config`**: figment-based application configuration and scan settings files.
//! - **`logging`**: tracing subscriber setup.
//! - **`error`**: the crate-wide `TankError` and `AppResult`.

pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod geometry;
pub mod hardware;
pub mod logging;
pub mod messages;
pub mod plan;
pub mod route;
pub mod storage;

pub use engine::{AcquisitionEngine, MeasurementProgress, MeasurementResult, XyzSystemState};
pub use error::{AppResult, TankError};
