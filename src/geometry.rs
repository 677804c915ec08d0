//! Physical bodies in the shared global frame and the safety check between them.
//!
//! All lengths are meters. The global frame is the one the tank, the probes and the
//! plan corners are expressed in; motors work in their own local frame (see
//! [`crate::hardware::motor`]).

use crate::error::{AppResult, TankError};
use crate::plan::MeasurementPlan;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A point or extent with one component per physical axis, ordered x, y, z.
pub type Vec3 = [f64; 3];

/// Physical axis of the stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    /// Width of the tank.
    X,
    /// Depth of the tank.
    Y,
    /// Height of the tank.
    Z,
}

impl Axis {
    /// All axes in component order.
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    /// Component index of this axis in a [`Vec3`].
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::X => write!(f, "x"),
            Axis::Y => write!(f, "y"),
            Axis::Z => write!(f, "z"),
        }
    }
}

/// Which of the two tank walls on an axis a check failed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wall {
    /// The wall at the tank position (low coordinate).
    Near,
    /// The wall at tank position + dimension (high coordinate).
    Far,
}

impl fmt::Display for Wall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Wall::Near => write!(f, "near"),
            Wall::Far => write!(f, "far"),
        }
    }
}

/// Tank (aquarium) the measurement happens in.
///
/// `position` is the corner closest to the global origin; `dimensions` are
/// width (x), depth (y) and height (z).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tank {
    /// Name of the tank
    pub name: String,
    /// Width, depth, height
    pub dimensions: Vec3,
    /// Corner closest to the global origin
    pub position: Vec3,
}

impl Tank {
    /// Create a tank, rejecting non-positive dimensions.
    pub fn new(name: impl Into<String>, dimensions: Vec3, position: Vec3) -> AppResult<Self> {
        let tank = Self {
            name: name.into(),
            dimensions,
            position,
        };
        tank.validate()?;
        Ok(tank)
    }

    /// Check the tank invariant (all dimensions > 0, finite position).
    pub fn validate(&self) -> AppResult<()> {
        for axis in Axis::ALL {
            let dim = self.dimensions[axis.index()];
            if !(dim.is_finite() && dim > 0.0) {
                return Err(TankError::InvalidPlan(format!(
                    "tank '{}' dimension on axis {} must be positive, got {}",
                    self.name, axis, dim
                )));
            }
            let position = self.position[axis.index()];
            if !position.is_finite() {
                return Err(TankError::InvalidPlan(format!(
                    "tank '{}' position on axis {} must be finite, got {}",
                    self.name, axis, position
                )));
            }
        }
        Ok(())
    }

    /// Lowest admissible coordinate on `axis`.
    pub fn near_wall(&self, axis: Axis) -> f64 {
        self.position[axis.index()]
    }

    /// Highest admissible coordinate on `axis`.
    pub fn far_wall(&self, axis: Axis) -> f64 {
        self.position[axis.index()] + self.dimensions[axis.index()]
    }
}

/// The two kinds of bodies mounted in the tank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    /// Receiving sensor carried by the stage.
    Hydrophone,
    /// Emitting transducer, fixed in the tank.
    UltrasoundTransducer,
}

/// A hydrophone or transducer, used only for safety-bound checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Probe {
    /// Name of the probe
    pub name: String,
    /// Kind of probe
    pub kind: ProbeKind,
    /// Extent along x, y, z in the vertical mounting
    pub dimensions: Vec3,
    /// Center point in the global frame
    pub position: Vec3,
    /// Clearance kept around the probe; only the receiving sensor carries one
    #[serde(default)]
    pub safety_margin: f64,
}

impl Probe {
    /// Create a hydrophone with a clearance margin.
    pub fn hydrophone(
        name: impl Into<String>,
        dimensions: Vec3,
        position: Vec3,
        safety_margin: f64,
    ) -> Self {
        Self {
            name: name.into(),
            kind: ProbeKind::Hydrophone,
            dimensions,
            position,
            safety_margin,
        }
    }

    /// Create an ultrasound transducer (no clearance margin).
    pub fn transducer(name: impl Into<String>, dimensions: Vec3, position: Vec3) -> Self {
        Self {
            name: name.into(),
            kind: ProbeKind::UltrasoundTransducer,
            dimensions,
            position,
            safety_margin: 0.0,
        }
    }

    /// The probe as mounted for the given orientation.
    ///
    /// Horizontal mounting rotates the probe so its y and z extents swap. Returns a
    /// new value; the stored dimensions always describe the vertical mounting.
    pub fn oriented(&self, is_vertical: bool) -> Probe {
        let mut probe = self.clone();
        if !is_vertical {
            probe.dimensions.swap(Axis::Y.index(), Axis::Z.index());
        }
        probe
    }

    /// Half of the extent on `axis`.
    pub fn half_size(&self, axis: Axis) -> f64 {
        0.5 * self.dimensions[axis.index()]
    }
}

/// Validates a requested scan volume against the tank and the probe footprint.
pub struct SafetyChecker;

impl SafetyChecker {
    /// Check `plan` for the probe it will carry.
    ///
    /// Pure: nothing is moved and nothing is mutated. The probe is re-oriented
    /// according to `plan.is_vertical` before its extents are used.
    pub fn validate(plan: &MeasurementPlan, probe: &Probe) -> AppResult<()> {
        plan.tank.validate()?;

        for axis in Axis::ALL {
            let i = axis.index();
            let (min, max) = (plan.min_position[i], plan.max_position[i]);
            // NaN would slip through every comparison below
            if !(min.is_finite() && max.is_finite()) {
                return Err(TankError::InvalidPlan(format!(
                    "scan bounds on axis {axis} must be finite, got {min}..{max}"
                )));
            }
            if min > max {
                return Err(TankError::InvertedBounds { axis });
            }
        }

        let mounted = probe.oriented(plan.is_vertical);
        for axis in Axis::ALL {
            let i = axis.index();
            let reach = mounted.half_size(axis) + mounted.safety_margin;
            if !(reach.is_finite() && reach >= 0.0) {
                return Err(TankError::InvalidPlan(format!(
                    "probe '{}' extent on axis {axis} is not usable: {reach}",
                    mounted.name
                )));
            }
            if plan.min_position[i] - reach < plan.tank.near_wall(axis) {
                return Err(TankError::TooCloseToTankWall {
                    axis,
                    wall: Wall::Near,
                });
            }
            if plan.max_position[i] + reach > plan.tank.far_wall(axis) {
                return Err(TankError::TooCloseToTankWall {
                    axis,
                    wall: Wall::Far,
                });
            }
        }
        Ok(())
    }
}
