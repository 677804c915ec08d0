//! Serpentine traversal of a measurement grid.
//!
//! The planner works in a logical *sweep frame* with three roles:
//!
//! - **fast**: advanced on every step, reversing direction every row;
//! - **middle**: advanced once per row, reversing direction every layer;
//! - **slow**: advanced once per layer, starting at its far end.
//!
//! [`Orientation`] is the single place mapping roles onto physical axes. The fast role
//! is always x. A vertical plan sweeps y as the middle role and z as the slow one; a
//! horizontal plan swaps the two. Route indices and motion codes are emitted in the
//! physical frame, so callers never see sweep roles.
//!
//! ```text
//! layer 0 (slow = far end)        layer 1
//!   row 0  x → → → →               row 2  x ← ← ← ←
//!   row 1  x ← ← ← ←               row 1  x → → → →
//!   row 2  x → → → → ─ slow ─▶     row 0  x ← ← ← ←
//! ```

use crate::error::{AppResult, TankError};
use crate::geometry::Axis;
use crate::plan::{Grid, MeasurementPlan};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which way a motor turns for a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Decreasing coordinate ("left").
    TowardOrigin,
    /// Increasing coordinate ("right").
    AwayFromOrigin,
}

impl Direction {
    fn forward(ascending: bool) -> Self {
        if ascending {
            Direction::AwayFromOrigin
        } else {
            Direction::TowardOrigin
        }
    }

    /// `+1.0` away from the origin, `-1.0` toward it.
    pub fn sign(self) -> f64 {
        match self {
            Direction::TowardOrigin => -1.0,
            Direction::AwayFromOrigin => 1.0,
        }
    }
}

/// Motion attached to a route step: how the stage gets from this step to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MotionCode {
    /// Move one physical axis by one grid spacing.
    Move {
        /// Physical axis to move
        axis: Axis,
        /// Direction of travel
        direction: Direction,
    },
    /// Last step of the route; nothing left to move.
    Complete,
}

impl MotionCode {
    /// Axis addressed by this code, if any.
    pub fn axis(&self) -> Option<Axis> {
        match self {
            MotionCode::Move { axis, .. } => Some(*axis),
            MotionCode::Complete => None,
        }
    }
}

impl fmt::Display for MotionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MotionCode::Move {
                axis,
                direction: Direction::AwayFromOrigin,
            } => write!(f, "{axis}+"),
            MotionCode::Move {
                axis,
                direction: Direction::TowardOrigin,
            } => write!(f, "{axis}-"),
            MotionCode::Complete => write!(f, "complete"),
        }
    }
}

/// Logical role of an axis while sweeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepRole {
    /// Changes every step.
    Fast,
    /// Changes once per row.
    Middle,
    /// Changes once per layer.
    Slow,
}

/// Mapping between the sweep frame and the physical frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Orientation {
    is_vertical: bool,
}

impl Orientation {
    /// Orientation of the given plan flag.
    pub fn new(is_vertical: bool) -> Self {
        Self { is_vertical }
    }

    /// Physical axis playing `role`.
    pub fn to_physical(self, role: SweepRole) -> Axis {
        match (role, self.is_vertical) {
            (SweepRole::Fast, _) => Axis::X,
            (SweepRole::Middle, true) | (SweepRole::Slow, false) => Axis::Y,
            (SweepRole::Slow, true) | (SweepRole::Middle, false) => Axis::Z,
        }
    }

    fn sweep_shape(self, grid: &Grid) -> [usize; 3] {
        [
            grid.axis(self.to_physical(SweepRole::Fast)).len(),
            grid.axis(self.to_physical(SweepRole::Middle)).len(),
            grid.axis(self.to_physical(SweepRole::Slow)).len(),
        ]
    }

    /// Reorder sweep-frame indices `[fast, middle, slow]` into `[x, y, z]`.
    fn to_physical_indices(self, sweep: [usize; 3]) -> [usize; 3] {
        let mut physical = [0; 3];
        physical[self.to_physical(SweepRole::Fast).index()] = sweep[0];
        physical[self.to_physical(SweepRole::Middle).index()] = sweep[1];
        physical[self.to_physical(SweepRole::Slow).index()] = sweep[2];
        physical
    }
}

/// One entry of a [`ScanRoute`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteStep {
    /// Index into the x grid
    pub ix: usize,
    /// Index into the y grid
    pub iy: usize,
    /// Index into the z grid
    pub iz: usize,
    /// Motion leading to the next step
    pub code: MotionCode,
}

/// Ordered traversal of every grid point, derived from a configured plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRoute {
    indexes_x: Vec<usize>,
    indexes_y: Vec<usize>,
    indexes_z: Vec<usize>,
    codes: Vec<MotionCode>,
}

impl ScanRoute {
    /// Number of scan steps (one per grid point).
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    /// Whether the route has no steps.
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Step at position `i` of the route.
    pub fn step(&self, i: usize) -> Option<RouteStep> {
        Some(RouteStep {
            ix: *self.indexes_x.get(i)?,
            iy: *self.indexes_y.get(i)?,
            iz: *self.indexes_z.get(i)?,
            code: *self.codes.get(i)?,
        })
    }

    /// Iterate over all steps in order.
    pub fn iter(&self) -> impl Iterator<Item = RouteStep> + '_ {
        (0..self.len()).filter_map(move |i| self.step(i))
    }

    /// Per-step x indices.
    pub fn indexes_x(&self) -> &[usize] {
        &self.indexes_x
    }

    /// Per-step y indices.
    pub fn indexes_y(&self) -> &[usize] {
        &self.indexes_y
    }

    /// Per-step z indices.
    pub fn indexes_z(&self) -> &[usize] {
        &self.indexes_z
    }

    /// Per-step motion codes.
    pub fn codes(&self) -> &[MotionCode] {
        &self.codes
    }
}

/// Builds serpentine [`ScanRoute`]s.
pub struct ScanRoutePlanner;

impl ScanRoutePlanner {
    /// Plan the route for a plan whose grid has been materialized.
    pub fn plan(plan: &MeasurementPlan) -> AppResult<ScanRoute> {
        let grid = plan.grid().ok_or(TankError::NotConfigured)?;
        if grid.is_empty() {
            return Err(TankError::InvalidPlan("grid has no points".to_string()));
        }
        Ok(Self::build(grid, Orientation::new(plan.is_vertical)))
    }

    /// Plan the route for an explicit grid and orientation.
    pub fn build(grid: &Grid, orientation: Orientation) -> ScanRoute {
        let [n_fast, n_middle, n_slow] = orientation.sweep_shape(grid);
        // capacity hint only; plans are size-checked when their grid is materialized
        let total = n_fast
            .checked_mul(n_middle)
            .and_then(|n| n.checked_mul(n_slow))
            .unwrap_or(0);

        let mut route = ScanRoute {
            indexes_x: Vec::with_capacity(total),
            indexes_y: Vec::with_capacity(total),
            indexes_z: Vec::with_capacity(total),
            codes: Vec::with_capacity(total),
        };

        let physical_move = |role: SweepRole, direction: Direction| MotionCode::Move {
            axis: orientation.to_physical(role),
            direction,
        };

        let mut fast_ascending = true;
        let mut middle_ascending = true;
        for layer in 0..n_slow {
            // the slow axis enters at its far end and works toward the origin
            let slow = n_slow - 1 - layer;
            for row in 0..n_middle {
                let middle = if middle_ascending {
                    row
                } else {
                    n_middle - 1 - row
                };
                for col in 0..n_fast {
                    let fast = if fast_ascending { col } else { n_fast - 1 - col };

                    let code = if col + 1 < n_fast {
                        physical_move(SweepRole::Fast, Direction::forward(fast_ascending))
                    } else if row + 1 < n_middle {
                        physical_move(SweepRole::Middle, Direction::forward(middle_ascending))
                    } else if layer + 1 < n_slow {
                        physical_move(SweepRole::Slow, Direction::TowardOrigin)
                    } else {
                        MotionCode::Complete
                    };

                    let [ix, iy, iz] = orientation.to_physical_indices([fast, middle, slow]);
                    route.indexes_x.push(ix);
                    route.indexes_y.push(iy);
                    route.indexes_z.push(iz);
                    route.codes.push(code);
                }
                fast_ascending = !fast_ascending;
            }
            middle_ascending = !middle_ascending;
        }

        route
    }
}
