//! Hardware seams of the scan core.
//!
//! - [`capabilities`]: the two collaborator traits (motor transport, capture device)
//! - [`motor`]: bounded motors and the three-axis stage
//! - [`mock`]: simulated collaborators for tests and the simulated CLI mode

pub mod capabilities;
pub mod mock;
pub mod motor;

pub use capabilities::{CaptureDevice, MotorTransport, Reading};
pub use motor::{Motor, Stage};
