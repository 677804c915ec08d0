//! Measurement execution: state machine, progress snapshots, background acquisition.

pub mod acquisition;
pub mod progress;
pub mod state;

pub use acquisition::AcquisitionEngine;
pub use progress::{DataGrid, MeasurementProgress, MeasurementResult};
pub use state::{EngineStatus, XyzSystemState};
