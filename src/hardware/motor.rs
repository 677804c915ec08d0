//! Bounded single-axis motors and the three-axis stage built from them.
//!
//! Every motor works in its own local frame: `0` is the homed end of the rail and
//! `max_travel` the opposite end. The [`Stage`] knows where the local zero of each
//! axis sits in the global frame (`origin`) and converts plan coordinates accordingly.

use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::error::{AppResult, TankError};
use crate::geometry::{Axis, Vec3};
use crate::hardware::capabilities::MotorTransport;
use crate::plan::MeasurementPlan;
use crate::route::{Direction, MotionCode};

/// Slack absorbing floating error accumulated over many relative moves.
const TRAVEL_TOLERANCE: f64 = 1e-9;

/// One linear axis with a tracked position and a hard travel range.
pub struct Motor {
    axis: Axis,
    position: f64,
    max_travel: f64,
    transport: Arc<dyn MotorTransport>,
}

impl std::fmt::Debug for Motor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Motor")
            .field("axis", &self.axis)
            .field("position", &self.position)
            .field("max_travel", &self.max_travel)
            .finish_non_exhaustive()
    }
}

impl Motor {
    /// Create a motor. The tracked position is `0` until [`move_to_origin`](Self::move_to_origin)
    /// establishes it for real.
    pub fn new(axis: Axis, max_travel: f64, transport: Arc<dyn MotorTransport>) -> Self {
        Self {
            axis,
            position: 0.0,
            max_travel,
            transport,
        }
    }

    /// Axis this motor drives.
    pub fn axis(&self) -> Axis {
        self.axis
    }

    /// Tracked position in the local frame.
    pub fn position(&self) -> f64 {
        self.position
    }

    /// Length of the rail.
    pub fn max_travel(&self) -> f64 {
        self.max_travel
    }

    /// Move toward the local origin by `distance`.
    pub async fn move_left(&mut self, distance: f64) -> AppResult<()> {
        check_distance(self.axis, distance)?;
        self.move_to(self.position - distance).await
    }

    /// Move away from the local origin by `distance`.
    pub async fn move_right(&mut self, distance: f64) -> AppResult<()> {
        check_distance(self.axis, distance)?;
        self.move_to(self.position + distance).await
    }

    /// Move to an absolute local position.
    ///
    /// The range check runs before the transport is called: a rejected move sends
    /// nothing and leaves the tracked position untouched. The tracked position only
    /// changes once the transport acknowledged the command.
    pub async fn move_to(&mut self, target: f64) -> AppResult<()> {
        if !(target >= -TRAVEL_TOLERANCE && target <= self.max_travel + TRAVEL_TOLERANCE) {
            return Err(TankError::OutOfRange {
                axis: self.axis,
                requested: target,
                max_travel: self.max_travel,
            });
        }
        let target = target.clamp(0.0, self.max_travel);

        self.transport
            .move_absolute(self.axis, target)
            .await
            .map_err(|e| TankError::transport(self.axis, e))?;

        debug!(axis = %self.axis, from = self.position, to = target, "motor moved");
        self.position = target;
        Ok(())
    }

    /// Homing: assume the far end, then travel the whole rail back to `0`.
    ///
    /// Establishes a known reference regardless of where the carriage physically was.
    pub async fn move_to_origin(&mut self) -> AppResult<()> {
        self.position = self.max_travel;
        self.move_left(self.max_travel).await
    }
}

fn check_distance(axis: Axis, distance: f64) -> AppResult<()> {
    if distance.is_finite() && distance >= 0.0 {
        Ok(())
    } else {
        Err(TankError::InvalidPlan(format!(
            "move distance on axis {axis} must be a non-negative number, got {distance}"
        )))
    }
}

/// The three motors of the gantry plus the route step they currently sit at.
#[derive(Debug)]
pub struct Stage {
    motors: [Motor; 3],
    origin: Vec3,
    at_step: Option<usize>,
}

impl Stage {
    /// Build the stage. `origin` is the global position of every motor's local zero.
    pub fn new(transport: Arc<dyn MotorTransport>, origin: Vec3, max_travel: Vec3) -> Self {
        let motor = |axis: Axis| Motor::new(axis, max_travel[axis.index()], transport.clone());
        Self {
            motors: [motor(Axis::X), motor(Axis::Y), motor(Axis::Z)],
            origin,
            at_step: None,
        }
    }

    /// Motor driving `axis`.
    pub fn motor(&self, axis: Axis) -> &Motor {
        &self.motors[axis.index()]
    }

    fn motor_mut(&mut self, axis: Axis) -> &mut Motor {
        &mut self.motors[axis.index()]
    }

    /// Tracked positions in the motors' local frames.
    pub fn positions(&self) -> Vec3 {
        [
            self.motors[0].position(),
            self.motors[1].position(),
            self.motors[2].position(),
        ]
    }

    /// Tracked position in the global frame.
    pub fn global_position(&self) -> Vec3 {
        let local = self.positions();
        [
            self.origin[0] + local[0],
            self.origin[1] + local[1],
            self.origin[2] + local[2],
        ]
    }

    /// Route step the carriage is known to sit at, if any.
    pub fn at_step(&self) -> Option<usize> {
        self.at_step
    }

    /// Mark the carriage as sitting at route step `step`.
    pub(crate) fn set_at_step(&mut self, step: Option<usize>) {
        self.at_step = step;
    }

    /// Home every axis.
    #[instrument(skip(self))]
    pub async fn home(&mut self) -> AppResult<()> {
        self.at_step = None;
        for motor in &mut self.motors {
            motor.move_to_origin().await?;
        }
        info!("stage homed");
        Ok(())
    }

    /// Apply one motion code using the plan's spacing as the step length.
    pub async fn apply(&mut self, code: MotionCode, plan: &MeasurementPlan) -> AppResult<()> {
        match code {
            MotionCode::Move { axis, direction } => {
                let distance = plan.spacing(axis);
                let motor = self.motor_mut(axis);
                match direction {
                    Direction::TowardOrigin => motor.move_left(distance).await,
                    Direction::AwayFromOrigin => motor.move_right(distance).await,
                }
            }
            MotionCode::Complete => Ok(()),
        }
    }

    /// Move every axis to a point given in the global frame.
    ///
    /// The cursor is cleared first, so a failure half way leaves the stage at an
    /// unknown step rather than a wrong one.
    pub async fn move_to_global(&mut self, point: Vec3) -> AppResult<()> {
        self.at_step = None;
        for axis in Axis::ALL {
            let i = axis.index();
            let local = point[i] - self.origin[i];
            self.motor_mut(axis).move_to(local).await?;
        }
        Ok(())
    }
}
