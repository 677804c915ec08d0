//! Hardware capability traits consumed by the scan core.
//!
//! The core never speaks a wire protocol. It needs exactly two things from the outside
//! world, each expressed as a small capability trait:
//!
//! - [`MotorTransport`]: command one physical axis to an absolute position.
//! - [`CaptureDevice`]: take one reading at the current stage position.
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors
//! - Focuses on ONE thing
//!
//! Implementations own their timeout and retry policy. Whatever error they return is
//! wrapped into [`TankError`](crate::error::TankError) by the caller and ends the
//! current run.
//!
//! # Example
//!
//! ```rust,ignore
//! struct SerialStage { port: Mutex<SerialStream> }
//!
//! #[async_trait]
//! impl MotorTransport for SerialStage {
//!     async fn move_absolute(&self, axis: Axis, position: f64) -> Result<()> {
//!         let mut port = self.port.lock().await;
//!         port.write_all(format!("{}MA{:.6}\r", axis, position).as_bytes()).await?;
//!         Ok(())
//!     }
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::geometry::Axis;

/// Capability: Absolute Motion
///
/// One transport handle drives all three axes. It is constructed once at process
/// start and shared by the motors.
///
/// # Contract
/// - `position` is in meters, in the motor's local frame (`0` is the homed end)
/// - Returns once the axis has accepted the command
#[async_trait]
pub trait MotorTransport: Send + Sync {
    /// Command `axis` to the absolute local `position`.
    async fn move_absolute(&self, axis: Axis, position: f64) -> Result<()>;
}

/// One measured value pair, e.g. magnitude and phase.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Reading {
    /// First channel (magnitude)
    pub magnitude: f64,
    /// Second channel (phase or sign)
    pub phase: f64,
}

impl Reading {
    /// Create a reading from its two channels.
    pub fn new(magnitude: f64, phase: f64) -> Self {
        Self { magnitude, phase }
    }

    /// The pair as stored in a data grid cell.
    pub fn as_pair(&self) -> [f64; 2] {
        [self.magnitude, self.phase]
    }
}

/// Capability: Point Capture
///
/// Devices that produce one [`Reading`] per call (oscilloscope, lock-in amplifier).
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    /// Take a reading at the current stage position.
    async fn capture(&self) -> Result<Reading>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::RwLock;

    struct LastCommand {
        last: RwLock<Option<(Axis, f64)>>,
    }

    #[async_trait]
    impl MotorTransport for LastCommand {
        async fn move_absolute(&self, axis: Axis, position: f64) -> Result<()> {
            if position.is_nan() {
                anyhow::bail!("position is not a number");
            }
            *self.last.write().await = Some((axis, position));
            Ok(())
        }
    }

    struct Constant(Reading);

    #[async_trait]
    impl CaptureDevice for Constant {
        async fn capture(&self) -> Result<Reading> {
            Ok(self.0)
        }
    }

    #[tokio::test]
    async fn transport_is_usable_as_trait_object() {
        let concrete = Arc::new(LastCommand {
            last: RwLock::new(None),
        });
        let transport: Arc<dyn MotorTransport> = concrete.clone();

        transport.move_absolute(Axis::Y, 0.25).await.unwrap();
        assert_eq!(*concrete.last.read().await, Some((Axis::Y, 0.25)));
        assert!(transport.move_absolute(Axis::Y, f64::NAN).await.is_err());
    }

    #[tokio::test]
    async fn capture_is_usable_as_trait_object() {
        let device: Arc<dyn CaptureDevice> = Arc::new(Constant(Reading::new(2.0, -1.0)));
        let reading = device.capture().await.unwrap();
        assert_eq!(reading.as_pair(), [2.0, -1.0]);
    }
}
